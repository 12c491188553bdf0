#[cfg(test)]
mod remote_test;

pub mod dtls_dialer;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
pub use dtls_dialer::{load_certificate, DtlsDialer};

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel routes a client's audio to one side of the remote stereo mix.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Channel {
    Left = 1,
    Right = 2,
}

impl From<Channel> for u8 {
    fn from(c: Channel) -> u8 {
        c as u8
    }
}

impl TryFrom<u8> for Channel {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            1 => Ok(Channel::Left),
            2 => Ok(Channel::Right),
            _ => Err(format!("invalid channel {v}")),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Channel::Left => "left",
            Channel::Right => "right",
        };
        write!(f, "{s}")
    }
}

/// ClientConfig is the handshake sent as the first datagram of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientConfig {
    pub client_id: String,
    pub bucket_name: String,
    pub file_name: String,
    pub channel: Channel,
}

/// SplitConfig asks the remote recorder to cut `[start, end)` of the
/// recording into its own file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SplitConfig {
    #[serde(with = "duration_nanos")]
    pub start: Duration,
    #[serde(with = "duration_nanos")]
    pub end: Duration,
    pub file_name: String,
}

/// StopConfig is sent when recording ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopConfig {
    pub splits: Vec<SplitConfig>,
    /// channel assignment per client id
    pub channel_config: BTreeMap<String, Channel>,
}

// Durations travel as integer nanoseconds.
mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        s.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(d)?))
    }
}

/// RemoteRecorderConfig locates and authenticates against a remote recorder.
#[derive(Debug, Clone)]
pub struct RemoteRecorderConfig {
    pub host: String,
    pub port: u16,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub server_name: String,
    /// The remote recorder runs with a self-signed certificate.
    pub insecure_skip_verify: bool,
    pub max_attempts: usize,
    pub attempt_timeout: Duration,
}

impl Default for RemoteRecorderConfig {
    fn default() -> Self {
        RemoteRecorderConfig {
            host: "127.0.0.1".to_owned(),
            port: 4444,
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            server_name: "localhost".to_owned(),
            insecure_skip_verify: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RemoteRecorderConfig {
    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_owned();
        self.port = port;
        self
    }

    pub fn with_key_pair(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.cert_file = cert_file.into();
        self.key_file = key_file.into();
        self
    }

    pub fn with_server_name(mut self, server_name: &str) -> Self {
        self.server_name = server_name.to_owned();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// DatagramSession is an established, secured session to a remote recorder.
#[async_trait]
pub trait DatagramSession: Send + Sync {
    async fn send_datagram(&self, payload: &[u8]) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Dialer opens datagram sessions. Every call is one connection attempt.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Arc<dyn DatagramSession>>;
}

/// RemoteSession is a session whose handshake has been sent.
pub struct RemoteSession {
    session: Arc<dyn DatagramSession>,
    client: ClientConfig,
}

impl RemoteSession {
    pub fn client_config(&self) -> &ClientConfig {
        &self.client
    }

    pub async fn send_datagram(&self, payload: &[u8]) -> Result<()> {
        self.session.send_datagram(payload).await
    }

    /// stop sends the stop message and closes the session.
    pub async fn stop(&self, stop: &StopConfig) -> Result<()> {
        let payload = serde_json::to_vec(stop)?;
        let result = self.session.send_datagram(&payload).await;
        self.session.close().await?;
        result
    }

    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}

/// backoff is the wait after failed attempt `attempt` (0-based): 2s, 4s, 8s...
pub fn backoff(attempt: usize) -> Duration {
    Duration::from_secs(2u64 << attempt.min(32))
}

/// connect_with_retry dials the remote recorder and sends `client` as the
/// handshake. Failed or timed out dials are retried with exponential
/// backoff. A failed handshake send is returned at once: the remote side
/// already holds session state for the connection.
pub async fn connect_with_retry(
    client: &ClientConfig,
    config: &RemoteRecorderConfig,
    dialer: &dyn Dialer,
) -> Result<RemoteSession> {
    let addr = config.address();
    let handshake = serde_json::to_vec(client)?;
    let max_attempts = config.max_attempts.max(1);

    let mut last_err = Error::ErrConnectTimeout;
    for attempt in 0..max_attempts {
        log::debug!("connecting to recorder {} (attempt {})", addr, attempt + 1);

        match tokio::time::timeout(config.attempt_timeout, dialer.dial(&addr)).await {
            Ok(Ok(session)) => {
                if let Err(err) = session.send_datagram(&handshake).await {
                    if let Err(close_err) = session.close().await {
                        log::warn!("failed to close recorder session {}: {}", addr, close_err);
                    }
                    return Err(Error::ErrHandshake(err.to_string()));
                }
                log::info!(
                    "recorder session {} established for client {} ({} channel)",
                    addr,
                    client.client_id,
                    client.channel
                );
                return Ok(RemoteSession {
                    session,
                    client: client.clone(),
                });
            }
            Ok(Err(err)) => last_err = err,
            Err(_) => last_err = Error::ErrConnectTimeout,
        }

        log::warn!(
            "connection to recorder {} failed (attempt {}): {}",
            addr,
            attempt + 1,
            last_err
        );
        if attempt + 1 < max_attempts {
            tokio::time::sleep(backoff(attempt)).await;
        }
    }

    Err(Error::ErrRetriesExhausted {
        attempts: max_attempts,
        source: Box::new(last_err),
    })
}

/// connect loads the client certificate and connects over DTLS.
/// Certificate errors are returned before any connection attempt.
pub async fn connect(client: &ClientConfig, config: &RemoteRecorderConfig) -> Result<RemoteSession> {
    let dialer = DtlsDialer::new(config)?;
    connect_with_retry(client, config, &dialer).await
}
