use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::media::{
    Codec, LAW_CHANNEL_COUNT, LAW_SAMPLE_RATE, OPUS_CHANNEL_COUNT, OPUS_SAMPLE_RATE,
};

pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";

/// PcmFormat describes a decoded 16-bit PCM stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u8,
}

impl PcmFormat {
    /// normalized is the format a track of `codec` is decoded to.
    pub fn normalized(codec: Codec) -> Self {
        match codec {
            Codec::Opus { .. } => PcmFormat {
                sample_rate: OPUS_SAMPLE_RATE,
                channels: OPUS_CHANNEL_COUNT,
            },
            Codec::Pcmu | Codec::Pcma => PcmFormat {
                sample_rate: LAW_SAMPLE_RATE,
                channels: LAW_CHANNEL_COUNT,
            },
        }
    }

    fn channel_layout(&self) -> &'static str {
        if self.channels == 1 {
            "mono"
        } else {
            "stereo"
        }
    }
}

/// Transcoder is the external audio toolchain used to rebuild a room.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// normalize decodes a captured track into a 16-bit PCM wav file.
    async fn normalize(&self, codec: Codec, input: &Path, output: &Path) -> Result<()>;

    /// pad_with_silence writes `input` prefixed with `offset_ms` of silence.
    async fn pad_with_silence(
        &self,
        input: &Path,
        output: &Path,
        offset_ms: f64,
        format: PcmFormat,
    ) -> Result<()>;

    /// mix sums all inputs into one file as long as the longest input.
    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

/// format_offset renders a millisecond offset as seconds with two decimals,
/// which is also the precision silence is generated with.
pub fn format_offset(offset_ms: f64) -> String {
    format!("{:.2}", offset_ms.max(0.0) / 1000.0)
}

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub program: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        FfmpegConfig {
            program: PathBuf::from(DEFAULT_FFMPEG_PROGRAM),
        }
    }
}

/// Ffmpeg runs every transcoding step as an ffmpeg child process.
#[derive(Debug, Clone, Default)]
pub struct Ffmpeg {
    config: FfmpegConfig,
}

impl Ffmpeg {
    pub fn new(config: FfmpegConfig) -> Self {
        Ffmpeg { config }
    }

    async fn run(&self, args: Vec<OsString>) -> Result<()> {
        log::debug!("{} {:?}", self.config.program.display(), args);

        let output = Command::new(&self.config.program)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::ErrTranscoder {
                program: self.config.program.display().to_string(),
                status: "spawn error".to_owned(),
                output: err.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::ErrTranscoder {
                program: self.config.program.display().to_string(),
                status: output.status.to_string(),
                output: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

fn os(s: impl Into<OsString>) -> OsString {
    s.into()
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn normalize(&self, codec: Codec, input: &Path, output: &Path) -> Result<()> {
        let format = PcmFormat::normalized(codec);
        let mut args = vec![];
        match codec {
            Codec::Opus { .. } => {
                args.extend([os("-i"), os(input)]);
            }
            Codec::Pcmu | Codec::Pcma => {
                let demuxer = if codec == Codec::Pcmu { "mulaw" } else { "alaw" };
                args.extend([
                    os("-f"),
                    os(demuxer),
                    os("-ar"),
                    os(format.sample_rate.to_string()),
                    os("-ac"),
                    os(format.channels.to_string()),
                    os("-i"),
                    os(input),
                ]);
            }
        }
        args.extend([
            os("-acodec"),
            os("pcm_s16le"),
            os("-ar"),
            os(format.sample_rate.to_string()),
            os("-ac"),
            os(format.channels.to_string()),
            os(output),
        ]);
        self.run(args).await
    }

    async fn pad_with_silence(
        &self,
        input: &Path,
        output: &Path,
        offset_ms: f64,
        format: PcmFormat,
    ) -> Result<()> {
        let duration = format_offset(offset_ms);
        let args = if duration == "0.00" {
            vec![os("-i"), os(input), os(output)]
        } else {
            vec![
                os("-f"),
                os("lavfi"),
                os("-t"),
                os(duration),
                os("-i"),
                os(format!(
                    "anullsrc=r={}:cl={}",
                    format.sample_rate,
                    format.channel_layout()
                )),
                os("-i"),
                os(input),
                os("-filter_complex"),
                os("[0][1]concat=n=2:v=0:a=1[a]"),
                os("-map"),
                os("[a]"),
                os(output),
            ]
        };
        self.run(args).await
    }

    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut args = Vec::with_capacity(inputs.len() * 2 + 3);
        for input in inputs {
            args.push(os("-i"));
            args.push(os(input));
        }
        args.extend([
            os("-filter_complex"),
            os(format!(
                "amix=inputs={}:duration=longest:dropout_transition=3",
                inputs.len()
            )),
            os(output),
        ]);
        self.run(args).await
    }
}
