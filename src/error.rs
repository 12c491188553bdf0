use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// ErrNonAudioTrack indicates that recording was requested for a track
    /// that does not carry audio.
    #[error("track {0} is not an audio track")]
    ErrNonAudioTrack(String),

    /// ErrUnsupportedCodec indicates that no recorder exists for the track's codec.
    #[error("unsupported codec: {0}")]
    ErrUnsupportedCodec(String),

    /// ErrInvalidPathComponent indicates a room, client or track id that
    /// cannot be used as a directory name.
    #[error("invalid id for a recording path: {0:?}")]
    ErrInvalidPathComponent(String),

    /// ErrRecorderNotRunning indicates pause/resume on a stopped recorder.
    #[error("recorder is not running")]
    ErrRecorderNotRunning,

    /// ErrRecorderClosed indicates an operation on a recorder after close.
    #[error("recorder is closed")]
    ErrRecorderClosed,

    #[error("chunk writer is closed")]
    ErrChunkWriterClosed,

    #[error("opus payload is empty")]
    ErrEmptyOpusPayload,

    #[error("failed to read metadata {path}: {reason}")]
    ErrMetadata { path: PathBuf, reason: String },

    #[error("room directory does not exist: {0}")]
    ErrRoomNotFound(PathBuf),

    #[error("no audio file found in {0}")]
    ErrNoAudioFile(PathBuf),

    #[error("{program} failed with {status}: {output}")]
    ErrTranscoder {
        program: String,
        status: String,
        output: String,
    },

    #[error("no tracks to mix for room {0}")]
    ErrNothingToMix(String),

    #[error("post processor is closed")]
    ErrPostProcessorClosed,

    #[error("failed to load certificate: {0}")]
    ErrCertificate(String),

    #[error("connection attempt timed out")]
    ErrConnectTimeout,

    #[error("failed to send handshake: {0}")]
    ErrHandshake(String),

    #[error("failed to establish recorder session after {attempts} attempts: {source}")]
    ErrRetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    #[allow(non_camel_case_types)]
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Rtp(#[from] rtp::Error),
    #[error("dtls: {0}")]
    Dtls(String),
    #[error("json: {0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<dtls::Error> for Error {
    fn from(e: dtls::Error) -> Self {
        Error::Dtls(e.to_string())
    }
}
