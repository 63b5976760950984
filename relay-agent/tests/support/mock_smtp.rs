//! Configurable SMTP server for submission tests, plaintext or TLS.
#![allow(dead_code)] // Not every test uses every knob

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rcgen::{Certificate, CertificateParams, SanType};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
};

/// What the server saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// A TLS handshake completed, implicit or after STARTTLS.
    TlsHandshake,
    Ehlo(String),
    StartTls,
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Security {
    Plaintext,
    StartTls,
    Implicit,
}

#[derive(Debug, Clone)]
struct Config {
    greeting: Reply,
    capabilities: Vec<String>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    drop_after_data: bool,
    /// Bytes of message data read before the connection is torn down.
    reset_mid_data: Option<usize>,
    security: Security,
    tls: Option<Arc<ServerConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.example.com ESMTP ready"),
            capabilities: vec![
                "mock.example.com".to_string(),
                "SIZE 10000000".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
            ],
            auth: Reply::new(235, "2.7.0 Authentication successful"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "2.0.0 Ok: queued"),
            drop_after_data: false,
            reset_mid_data: None,
            security: Security::Plaintext,
            tls: None,
        }
    }
}

/// A self-signed certificate for `localhost` and `127.0.0.1`.
fn self_signed_tls() -> Arc<ServerConfig> {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]);
    params.subject_alt_names = vec![
        SanType::DnsName("localhost".to_string()),
        SanType::IpAddress("127.0.0.1".parse().unwrap()),
    ];
    let cert = Certificate::from_params(params).unwrap();
    let cert_der = cert.serialize_der().unwrap();
    let key_der = cert.serialize_private_key_der();

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(cert_der)],
            PrivateKeyDer::Pkcs8(key_der.into()),
        )
        .unwrap();
    Arc::new(config)
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

type Session = BufReader<Box<dyn Io>>;

async fn accept_tls(session: Session, tls: &Arc<ServerConfig>) -> std::io::Result<Session> {
    let stream = TlsAcceptor::from(Arc::clone(tls))
        .accept(session.into_inner())
        .await?;
    Ok(BufReader::new(Box::new(stream)))
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: Config::default(),
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Bodies of every message received, terminator excluded.
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<Config>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut session: Session = BufReader::new(Box::new(stream));
        let mut encrypted = false;
        let mut line = String::new();

        if let (Security::Implicit, Some(tls)) = (config.security, &config.tls) {
            session = accept_tls(session, tls).await?;
            encrypted = true;
            commands.write().await.push(SmtpCommand::TlsHandshake);
        }

        session.write_all(&config.greeting.to_bytes()).await?;
        session.flush().await?;

        loop {
            line.clear();
            let read = timeout(Duration::from_secs(10), session.read_line(&mut line)).await;
            let Ok(read) = read else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let command_line = line.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line.as_str(), ""));

            let offers_starttls = config.security == Security::StartTls && !encrypted;

            let (command, reply) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    let mut capabilities = config.capabilities.clone();
                    if offers_starttls {
                        capabilities.push("STARTTLS".to_string());
                    }

                    let mut reply = String::new();
                    let last = capabilities.len() - 1;
                    for (i, capability) in capabilities.iter().enumerate() {
                        let separator = if i == last { ' ' } else { '-' };
                        reply.push_str(&format!("250{separator}{capability}\r\n"));
                    }
                    (SmtpCommand::Ehlo(argument.to_string()), reply.into_bytes())
                }
                "STARTTLS" => match (&config.tls, offers_starttls) {
                    (Some(tls), true) => {
                        commands.write().await.push(SmtpCommand::StartTls);
                        session
                            .write_all(&Reply::new(220, "2.0.0 Ready to start TLS").to_bytes())
                            .await?;
                        session.flush().await?;

                        session = accept_tls(session, tls).await?;
                        encrypted = true;
                        commands.write().await.push(SmtpCommand::TlsHandshake);
                        continue;
                    }
                    _ => (
                        SmtpCommand::StartTls,
                        Reply::new(502, "5.5.1 STARTTLS not available").to_bytes(),
                    ),
                },
                "AUTH" => {
                    let mechanism = argument.split(' ').next().unwrap_or_default().to_string();
                    if mechanism.eq_ignore_ascii_case("LOGIN") {
                        for prompt in ["VXNlcm5hbWU6", "UGFzc3dvcmQ6"] {
                            session
                                .write_all(format!("334 {prompt}\r\n").as_bytes())
                                .await?;
                            session.flush().await?;
                            line.clear();
                            session.read_line(&mut line).await?;
                        }
                    }
                    (SmtpCommand::Auth(mechanism), config.auth.to_bytes())
                }
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.to_string()),
                    config.mail_from.to_bytes(),
                ),
                "RCPT" => (
                    SmtpCommand::RcptTo(argument.to_string()),
                    config.rcpt_to.to_bytes(),
                ),
                "DATA" => (SmtpCommand::Data, config.data.to_bytes()),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    session.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    session.flush().await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(command_line.clone()),
                    Reply::new(500, "Unknown command").to_bytes(),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);
            session.write_all(&reply).await?;
            session.flush().await?;

            if !is_data || config.data.code != 354 {
                continue;
            }

            if let Some(limit) = config.reset_mid_data {
                // Closing with unread data pending makes the kernel send RST.
                let mut chunk = vec![0u8; 8192];
                let mut consumed = 0;
                while consumed < limit {
                    let n = session.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    consumed += n;
                }
                return Ok(());
            }

            let mut content = Vec::new();
            loop {
                line.clear();
                if session.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                if line == ".\r\n" {
                    break;
                }
                content.extend_from_slice(line.as_bytes());
            }
            commands
                .write()
                .await
                .push(SmtpCommand::MessageContent(content));

            if config.drop_after_data {
                return Ok(());
            }
            session.write_all(&config.data_end.to_bytes()).await?;
            session.flush().await?;
        }
    }
}

pub struct MockSmtpServerBuilder {
    config: Config,
}

impl MockSmtpServerBuilder {
    /// Replace the EHLO keywords; the first entry is the greeting line.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    /// Close the connection after the data terminator instead of replying.
    #[must_use]
    pub const fn dropping_after_data(mut self) -> Self {
        self.config.drop_after_data = true;
        self
    }

    /// Reset the connection after reading `bytes` of message data, before
    /// the terminator can arrive.
    #[must_use]
    pub const fn resetting_mid_data(mut self, bytes: usize) -> Self {
        self.config.reset_mid_data = Some(bytes);
        self
    }

    /// Advertise STARTTLS and upgrade with a self-signed certificate.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.config.security = Security::StartTls;
        self.config.tls = Some(self_signed_tls());
        self
    }

    /// Negotiate TLS before the greeting, with a self-signed certificate.
    #[must_use]
    pub fn with_implicit_tls(mut self) -> Self {
        self.config.security = Security::Implicit;
        self.config.tls = Some(self_signed_tls());
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        tokio::spawn({
            let commands = Arc::clone(&commands);
            let shutdown = Arc::clone(&shutdown);
            async move {
                while !shutdown.load(Ordering::Relaxed) {
                    let Ok(Ok((stream, _))) =
                        timeout(Duration::from_millis(100), listener.accept()).await
                    else {
                        continue;
                    };

                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        if let Err(e) =
                            MockSmtpServer::handle_client(stream, config, commands).await
                        {
                            tracing::debug!("Mock server client error: {e}");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            shutdown,
        })
    }
}
