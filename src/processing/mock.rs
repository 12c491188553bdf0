use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::transcoder::{PcmFormat, Transcoder};
use crate::error::{Error, Result};
use crate::media::Codec;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Normalize {
        codec: Codec,
        input: PathBuf,
        output: PathBuf,
    },
    Pad {
        input: PathBuf,
        output: PathBuf,
        offset_ms: f64,
        format: PcmFormat,
    },
    Mix {
        inputs: Vec<PathBuf>,
        output: PathBuf,
    },
}

/// FakeTranscoder records every call and writes an empty output file so that
/// later stages find their inputs.
#[derive(Default)]
pub(crate) struct FakeTranscoder {
    calls: Mutex<Vec<Call>>,
    fail_on: Option<String>,
    delay: Option<Duration>,
}

impl FakeTranscoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// fail_on makes every call whose input path contains `needle` fail.
    pub(crate) fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_owned());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        let calls = self.calls.lock().unwrap();
        calls.clone()
    }

    pub(crate) fn mixes(&self) -> Vec<(Vec<PathBuf>, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mix { inputs, output } => Some((inputs, output)),
                _ => None,
            })
            .collect()
    }

    async fn step(&self, call: Call, inputs: &[&Path], output: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(needle) = &self.fail_on {
            if inputs
                .iter()
                .any(|p| p.to_string_lossy().contains(needle.as_str()))
            {
                return Err(Error::Other(format!("fake failure on {needle}")));
            }
        }
        tokio::fs::write(output, b"").await?;
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn normalize(&self, codec: Codec, input: &Path, output: &Path) -> Result<()> {
        self.step(
            Call::Normalize {
                codec,
                input: input.to_path_buf(),
                output: output.to_path_buf(),
            },
            &[input],
            output,
        )
        .await
    }

    async fn pad_with_silence(
        &self,
        input: &Path,
        output: &Path,
        offset_ms: f64,
        format: PcmFormat,
    ) -> Result<()> {
        self.step(
            Call::Pad {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
                offset_ms,
                format,
            },
            &[input],
            output,
        )
        .await
    }

    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let paths: Vec<&Path> = inputs.iter().map(|p| p.as_path()).collect();
        self.step(
            Call::Mix {
                inputs: inputs.to_vec(),
                output: output.to_path_buf(),
            },
            &paths,
            output,
        )
        .await
    }
}
