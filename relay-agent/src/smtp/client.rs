//! SMTP client with implicit TLS, STARTTLS and AUTH support.

use std::{future::Future, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{self, ClientConfig, RootCertStore, pki_types::ServerName},
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Starting capacity for buffered replies.
const READ_CHUNK: usize = 8192;

/// Replies larger than this are refused.
const READ_LIMIT: usize = 1024 * 1024;

/// The socket under a session, before or after the TLS upgrade.
enum Transport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::Tls("Connection is already TLS".to_string()));
        };

        let connector = TlsConnector::from(Arc::new(tls_config(accept_invalid_certs)?));
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| ClientError::Tls(format!("Invalid domain: {e}")))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

fn tls_config(accept_invalid_certs: bool) -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        if let Err(e) = root_store.add(cert) {
            tracing::debug!(error = %e, "Skipping unusable system certificate");
        }
    }
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ClientError::Tls(e.to_string()))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(config)
}

/// Trusts every certificate. Only reachable through `--accept-invalid-certs`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// One submission session with an SMTP server.
///
/// Every command waits at most `timeout` for its reply.
pub struct SmtpClient {
    transport: Option<Transport>,
    inbox: Vec<u8>,
    filled: usize,
    server_domain: String,
    accept_invalid_certs: bool,
    timeout: Duration,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_domain", &self.server_domain)
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    /// Opens a plain TCP connection to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or does not complete within
    /// `timeout`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ClientError::Timeout("connect"))??;

        Ok(Self {
            transport: Some(Transport::Plain(stream)),
            inbox: vec![0u8; READ_CHUNK],
            filled: 0,
            server_domain: host.to_string(),
            accept_invalid_certs: false,
            timeout,
        })
    }

    /// Skip certificate verification on the TLS upgrade. Testing only.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub const fn is_encrypted(&self) -> bool {
        matches!(self.transport, Some(Transport::Tls(_)))
    }

    /// Wraps the connection in TLS before any SMTP traffic (port 465).
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    pub async fn implicit_tls(&mut self) -> Result<()> {
        self.upgrade().await
    }

    /// Reads the initial server greeting, which must be 220.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is not 220.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await?.expect(220)
    }

    /// Writes one command line and waits for its reply.
    ///
    /// # Errors
    ///
    /// If the write fails, the reply does not arrive in time or cannot be
    /// parsed.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        let data = format!("{command}\r\n");
        self.send(data.as_bytes()).await?;
        self.read_response().await
    }

    /// Sends EHLO and requires a 250 reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is refused.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await?.expect(250)
    }

    /// Sends STARTTLS and upgrades the connection to TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is refused or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?.expect(220)?;
        self.upgrade().await?;
        Ok(response)
    }

    /// `AUTH PLAIN` with an initial response.
    ///
    /// # Errors
    ///
    /// [`ClientError::Smtp`] when the credentials are refused.
    pub async fn auth_plain(&mut self, user: &str, pass: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{user}\0{pass}"));
        self.command(&format!("AUTH PLAIN {token}")).await?.expect(235)
    }

    /// `AUTH LOGIN`, answering the username and password challenges.
    ///
    /// # Errors
    ///
    /// [`ClientError::Smtp`] when the credentials are refused.
    pub async fn auth_login(&mut self, user: &str, pass: &str) -> Result<Response> {
        self.command("AUTH LOGIN").await?.expect(334)?;
        self.command(&STANDARD.encode(user)).await?.expect(334)?;
        self.command(&STANDARD.encode(pass)).await?.expect(235)
    }

    /// # Errors
    ///
    /// Returns an error if the sender is refused.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>"))
            .await?
            .expect_success()
    }

    /// # Errors
    ///
    /// Returns an error if the recipient is refused.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>"))
            .await?
            .expect_success()
    }

    /// Sends DATA, which must be answered with 354.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses to accept data.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await?.expect(354)
    }

    /// Writes the message, dot-stuffed, followed by the `<CRLF>.<CRLF>`
    /// terminator. Does not wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn write_message(&mut self, message: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(message.len() + 64);
        let mut at_line_start = true;

        for &byte in message {
            if at_line_start && byte == b'.' {
                payload.push(b'.');
            }
            payload.push(byte);
            at_line_start = byte == b'\n';
        }

        if !payload.ends_with(b"\r\n") {
            if payload.ends_with(b"\n") {
                payload.pop();
            }
            payload.extend_from_slice(b"\r\n");
        }
        payload.extend_from_slice(b".\r\n");

        self.send(&payload).await
    }

    /// Reads the reply to the end of data, which must be 2xx.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is refused or the connection fails.
    pub async fn read_data_reply(&mut self) -> Result<Response> {
        self.read_response().await?.expect_success()
    }

    /// # Errors
    ///
    /// If the server cannot be reached.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    async fn upgrade(&mut self) -> Result<()> {
        let transport = self.transport.take().ok_or(ClientError::ConnectionClosed)?;
        let upgraded = self
            .bounded(
                "TLS handshake",
                transport.upgrade_to_tls(&self.server_domain, self.accept_invalid_certs),
            )
            .await?;
        self.transport = Some(upgraded);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let transport = self
            .transport
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;

        tokio::time::timeout(timeout, transport.send(data))
            .await
            .map_err(|_| ClientError::Timeout("write"))?
    }

    async fn bounded<T>(
        &self,
        stage: &'static str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| ClientError::Timeout(stage))?
    }

    /// Buffers until a whole reply is available, keeping any bytes that
    /// follow it for the next call.
    async fn read_response(&mut self) -> Result<Response> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.inbox[..self.filled])?
            {
                self.inbox.copy_within(consumed..self.filled, 0);
                self.filled -= consumed;
                return Ok(response);
            }

            if self.filled >= self.inbox.len() {
                let grown = self.inbox.len() * 2;
                if grown > READ_LIMIT {
                    return Err(ClientError::Parse(format!(
                        "Reply exceeds {READ_LIMIT} bytes"
                    )));
                }
                self.inbox.resize(grown, 0);
            }

            let transport = self
                .transport
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = tokio::time::timeout_at(
                deadline,
                transport.read(&mut self.inbox[self.filled..]),
            )
            .await
            .map_err(|_| ClientError::Timeout("read"))??;
            self.filled += n;
        }
    }
}
