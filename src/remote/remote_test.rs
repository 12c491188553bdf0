use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as SyncMutex;

use tokio::time::Instant;

use super::*;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Refuse,
    Hang,
    Accept,
    AcceptBrokenPipe,
}

#[derive(Default)]
struct FakeSession {
    datagrams: SyncMutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
    broken: bool,
}

#[async_trait]
impl DatagramSession for FakeSession {
    async fn send_datagram(&self, payload: &[u8]) -> Result<()> {
        if self.broken {
            return Err(Error::Other("broken pipe".to_owned()));
        }
        self.datagrams.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeDialer {
    outcomes: SyncMutex<VecDeque<Outcome>>,
    dials: SyncMutex<Vec<(String, Instant)>>,
    sessions: SyncMutex<Vec<Arc<FakeSession>>>,
}

impl FakeDialer {
    fn new(outcomes: &[Outcome]) -> Self {
        FakeDialer {
            outcomes: SyncMutex::new(outcomes.iter().copied().collect()),
            dials: SyncMutex::new(vec![]),
            sessions: SyncMutex::new(vec![]),
        }
    }

    fn dial_times(&self) -> Vec<Instant> {
        self.dials.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    fn session(&self) -> Arc<FakeSession> {
        let sessions = self.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        Arc::clone(&sessions[0])
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, addr: &str) -> Result<Arc<dyn DatagramSession>> {
        self.dials
            .lock()
            .unwrap()
            .push((addr.to_owned(), Instant::now()));
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Refuse);

        match outcome {
            Outcome::Refuse => Err(Error::Other("connection refused".to_owned())),
            Outcome::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Outcome::Accept | Outcome::AcceptBrokenPipe => {
                let session = Arc::new(FakeSession {
                    broken: outcome == Outcome::AcceptBrokenPipe,
                    ..Default::default()
                });
                self.sessions.lock().unwrap().push(Arc::clone(&session));
                Ok(session)
            }
        }
    }
}

fn client() -> ClientConfig {
    ClientConfig {
        client_id: "client1".to_owned(),
        bucket_name: "calls".to_owned(),
        file_name: "room1/client1.wav".to_owned(),
        channel: Channel::Right,
    }
}

fn config() -> RemoteRecorderConfig {
    RemoteRecorderConfig::default().with_address("10.0.0.7", 5000)
}

#[test]
fn test_client_config_wire_format() -> Result<()> {
    let value = serde_json::to_value(client())?;
    assert_eq!(
        value,
        serde_json::json!({
            "ClientId": "client1",
            "BucketName": "calls",
            "FileName": "room1/client1.wav",
            "Channel": 2,
        })
    );

    let parsed: ClientConfig = serde_json::from_str(
        r#"{"Channel":1,"FileName":"f","BucketName":"b","ClientId":"c"}"#,
    )?;
    assert_eq!(parsed.channel, Channel::Left);

    let invalid: std::result::Result<ClientConfig, _> = serde_json::from_str(
        r#"{"Channel":3,"FileName":"f","BucketName":"b","ClientId":"c"}"#,
    );
    assert!(invalid.is_err());
    Ok(())
}

#[test]
fn test_stop_config_wire_format() -> Result<()> {
    let mut stop = StopConfig {
        splits: vec![SplitConfig {
            start: Duration::from_millis(1500),
            end: Duration::from_secs(3),
            file_name: "part1.wav".to_owned(),
        }],
        ..Default::default()
    };
    stop.channel_config.insert("client1".to_owned(), Channel::Left);

    assert_eq!(
        serde_json::to_value(&stop)?,
        serde_json::json!({
            "Splits": [{"Start": 1_500_000_000u64, "End": 3_000_000_000u64, "FileName": "part1.wav"}],
            "ChannelConfig": {"client1": 1},
        })
    );
    Ok(())
}

#[test]
fn test_backoff_and_address() {
    let waits: Vec<u64> = (0..5).map(|n| backoff(n).as_secs()).collect();
    assert_eq!(waits, vec![2, 4, 8, 16, 32]);

    assert_eq!(config().address(), "10.0.0.7:5000");
    assert_eq!(
        RemoteRecorderConfig::default()
            .with_address("::1", 4444)
            .address(),
        "[::1]:4444"
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_then_succeeds() -> Result<()> {
    use Outcome::*;
    let dialer = FakeDialer::new(&[Refuse, Refuse, Refuse, Accept]);

    let start = Instant::now();
    let session = connect_with_retry(&client(), &config(), &dialer).await?;
    assert_eq!(start.elapsed(), Duration::from_secs(2 + 4 + 8));
    assert_eq!(session.client_config(), &client());

    let times = dialer.dial_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8)
        ]
    );
    assert!(dialer
        .dials
        .lock()
        .unwrap()
        .iter()
        .all(|(addr, _)| addr == "10.0.0.7:5000"));

    let fake = dialer.session();
    let datagrams = fake.datagrams.lock().unwrap().clone();
    assert_eq!(datagrams.len(), 1);
    let handshake: ClientConfig = serde_json::from_slice(&datagrams[0])?;
    assert_eq!(handshake, client());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up_after_max_attempts() {
    let dialer = FakeDialer::new(&[]);

    let start = Instant::now();
    let result = connect_with_retry(&client(), &config(), &dialer).await;
    // no wait after the last attempt
    assert_eq!(start.elapsed(), Duration::from_secs(2 + 4 + 8 + 16));
    assert_eq!(dialer.dial_times().len(), 5);
    assert_eq!(
        result.err(),
        Some(Error::ErrRetriesExhausted {
            attempts: 5,
            source: Box::new(Error::Other("connection refused".to_owned())),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_attempt_timeout() {
    use Outcome::*;
    let dialer = FakeDialer::new(&[Hang, Hang]);
    let config = config()
        .with_max_attempts(2)
        .with_attempt_timeout(Duration::from_secs(5));

    let start = Instant::now();
    let result = connect_with_retry(&client(), &config, &dialer).await;
    assert_eq!(start.elapsed(), Duration::from_secs(5 + 2 + 5));
    assert_eq!(
        result.err(),
        Some(Error::ErrRetriesExhausted {
            attempts: 2,
            source: Box::new(Error::ErrConnectTimeout),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_handshake_failure_is_not_retried() {
    use Outcome::*;
    let dialer = FakeDialer::new(&[AcceptBrokenPipe, Accept]);

    let result = connect_with_retry(&client(), &config(), &dialer).await;
    assert_eq!(
        result.err(),
        Some(Error::ErrHandshake("broken pipe".to_owned()))
    );
    assert_eq!(dialer.dial_times().len(), 1);
    assert!(dialer.session().closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_sends_and_closes() -> Result<()> {
    let dialer = FakeDialer::new(&[Outcome::Accept]);
    let session = connect_with_retry(&client(), &config(), &dialer).await?;

    session.stop(&StopConfig::default()).await?;

    let fake = dialer.session();
    let datagrams = fake.datagrams.lock().unwrap().clone();
    assert_eq!(datagrams.len(), 2);
    assert_eq!(datagrams[1], br#"{"Splits":[],"ChannelConfig":{}}"#.to_vec());
    assert!(fake.closed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_dtls_dialer_rejects_missing_key_pair() {
    let config = config().with_key_pair("/nonexistent/cert.pem", "/nonexistent/key.pem");
    let result = connect(&client(), &config).await;
    assert!(matches!(result, Err(Error::ErrCertificate(_))));
}

#[test]
fn test_load_certificate_from_split_files() -> Result<()> {
    let generated = dtls::crypto::Certificate::generate_self_signed(vec!["localhost".to_owned()])
        .map_err(Error::from)?;
    let blocks = pem::parse_many(generated.serialize_pem())
        .map_err(|err| Error::Other(err.to_string()))?;

    // files as written by openssl: PKCS#8 key, then the certificate chain
    let key = pem::Pem::new("PRIVATE KEY", blocks[0].contents().to_vec());
    let certs: Vec<pem::Pem> = blocks[1..].to_vec();

    let tmp = tempfile::tempdir()?;
    let key_file = tmp.path().join("key.pem");
    let cert_file = tmp.path().join("cert.pem");
    std::fs::write(&key_file, pem::encode(&key))?;
    std::fs::write(&cert_file, pem::encode_many(&certs))?;

    let loaded = load_certificate(&cert_file, &key_file)?;
    assert_eq!(loaded.certificate, generated.certificate);

    // a certificate file without a key is rejected
    let result = load_certificate(&cert_file, &cert_file);
    assert!(matches!(result, Err(Error::ErrCertificate(_))));
    Ok(())
}
