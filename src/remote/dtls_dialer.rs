use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dtls::config::{Config, ExtendedMasterSecretType};
use dtls::conn::DTLSConn;
use dtls::crypto::Certificate;
use tokio::net::UdpSocket;

use super::{DatagramSession, Dialer, RemoteRecorderConfig};
use crate::error::{Error, Result};

/// load_certificate reads a PEM certificate chain and its PKCS#8 private key.
pub fn load_certificate(cert_file: &Path, key_file: &Path) -> Result<Certificate> {
    let key = read_pem(key_file)?
        .into_iter()
        .find(|p| p.tag() == "PRIVATE KEY" || p.tag() == "PRIVATE_KEY")
        .ok_or_else(|| {
            Error::ErrCertificate(format!("{}: no private key found", key_file.display()))
        })?;
    let certs: Vec<pem::Pem> = read_pem(cert_file)?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .collect();
    if certs.is_empty() {
        return Err(Error::ErrCertificate(format!(
            "{}: no certificate found",
            cert_file.display()
        )));
    }

    let mut blocks = vec![pem::Pem::new("PRIVATE_KEY", key.contents().to_vec())];
    blocks.extend(certs);
    Certificate::from_pem(&pem::encode_many(&blocks))
        .map_err(|err| Error::ErrCertificate(err.to_string()))
}

fn read_pem(path: &Path) -> Result<Vec<pem::Pem>> {
    let data = std::fs::read_to_string(path)
        .map_err(|err| Error::ErrCertificate(format!("{}: {}", path.display(), err)))?;
    pem::parse_many(data)
        .map_err(|err| Error::ErrCertificate(format!("{}: {}", path.display(), err)))
}

/// DtlsDialer connects to the remote recorder over DTLS on UDP,
/// authenticating with a client certificate.
pub struct DtlsDialer {
    certificate: Certificate,
    server_name: String,
    insecure_skip_verify: bool,
}

impl DtlsDialer {
    pub fn new(config: &RemoteRecorderConfig) -> Result<Self> {
        let certificate = load_certificate(&config.cert_file, &config.key_file)?;
        Ok(Self::with_certificate(
            certificate,
            &config.server_name,
            config.insecure_skip_verify,
        ))
    }

    pub fn with_certificate(
        certificate: Certificate,
        server_name: &str,
        insecure_skip_verify: bool,
    ) -> Self {
        DtlsDialer {
            certificate,
            server_name: server_name.to_owned(),
            insecure_skip_verify,
        }
    }
}

#[async_trait]
impl Dialer for DtlsDialer {
    async fn dial(&self, addr: &str) -> Result<Arc<dyn DatagramSession>> {
        let remote = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| Error::Other(format!("{addr}: no address found")))?;
        let local = if remote.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;

        let config = Config {
            certificates: vec![self.certificate.clone()],
            extended_master_secret: ExtendedMasterSecretType::Require,
            insecure_skip_verify: self.insecure_skip_verify,
            server_name: self.server_name.clone(),
            ..Default::default()
        };
        let conn = DTLSConn::new(Arc::new(socket), config, true, None).await?;
        log::debug!("dtls handshake with {} done", remote);

        Ok(Arc::new(DtlsSession { conn }))
    }
}

struct DtlsSession {
    conn: DTLSConn,
}

#[async_trait]
impl DatagramSession for DtlsSession {
    async fn send_datagram(&self, payload: &[u8]) -> Result<()> {
        self.conn.write(payload, None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}
