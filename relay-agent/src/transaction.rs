//! One SMTP submission, from connect to QUIT.

use std::time::Duration;

use relay_common::{SmtpAuth, SmtpServer};

use crate::{
    message::Message,
    smtp::{ClientError, SmtpClient},
};

/// Submission port where TLS starts before the greeting, and the port used
/// when a task names none.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// How the agent talks to third-party SMTP servers.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    /// Bounds connect plus greeting plus TLS handshake, and each reply.
    pub timeout: Duration,
    pub helo_name: String,
    /// When `false`, STARTTLS is used if offered and plaintext otherwise.
    pub require_tls: bool,
    pub accept_invalid_certs: bool,
    /// Connections to this port negotiate TLS before the greeting.
    pub implicit_tls_port: u16,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            helo_name: "localhost".to_string(),
            require_tls: true,
            accept_invalid_certs: false,
            implicit_tls_port: IMPLICIT_TLS_PORT,
        }
    }
}

/// A failed submission, and whether the message had already been handed to
/// the server when it failed.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SendError {
    #[source]
    pub error: ClientError,
    pub handed_off: bool,
}

impl SendError {
    const fn before_hand_off(error: ClientError) -> Self {
        Self {
            error,
            handed_off: false,
        }
    }
}

/// Submits `message` through `server`.
///
/// # Errors
///
/// Any failure along the way, tagged with whether the whole message and its
/// terminator had been written before it happened.
pub async fn send(
    server: &SmtpServer,
    auth: Option<&SmtpAuth>,
    message: &Message,
    settings: &SmtpSettings,
) -> Result<(), SendError> {
    let mut client = open(server, auth, settings)
        .await
        .map_err(SendError::before_hand_off)?;

    client
        .mail_from(&message.envelope.sender)
        .await
        .map_err(SendError::before_hand_off)?;
    for recipient in &message.envelope.recipients {
        client
            .rcpt_to(recipient)
            .await
            .map_err(SendError::before_hand_off)?;
    }
    client.data().await.map_err(SendError::before_hand_off)?;

    // The server cannot accept a message before the terminator has been
    // written in full, so only the final reply can fail after hand-off.
    client
        .write_message(&message.content)
        .await
        .map_err(SendError::before_hand_off)?;
    client.read_data_reply().await.map_err(|error| SendError {
        error,
        handed_off: true,
    })?;

    if let Err(e) = client.quit().await {
        tracing::debug!(error = %e, "QUIT after accepted message failed");
    }

    Ok(())
}

/// Connects, secures and authenticates a session ready for MAIL FROM.
async fn open(
    server: &SmtpServer,
    auth: Option<&SmtpAuth>,
    settings: &SmtpSettings,
) -> Result<SmtpClient, ClientError> {
    let port = server.port.unwrap_or(IMPLICIT_TLS_PORT);

    let connecting = async {
        let mut client = SmtpClient::connect(&server.host, port, settings.timeout)
            .await?
            .accept_invalid_certs(settings.accept_invalid_certs);
        if port == settings.implicit_tls_port {
            client.implicit_tls().await?;
        }
        client.read_greeting().await?;
        Ok::<_, ClientError>(client)
    };
    let mut client = tokio::time::timeout(settings.timeout, connecting)
        .await
        .map_err(|_| ClientError::Timeout("connect"))??;

    let mut capabilities = client.ehlo(&settings.helo_name).await?;

    if !client.is_encrypted() {
        if capabilities.has_capability("STARTTLS") {
            client.starttls().await?;
            capabilities = client.ehlo(&settings.helo_name).await?;
        } else if settings.require_tls {
            return Err(ClientError::StartTlsUnavailable);
        } else {
            tracing::debug!(host = %server.host, "Server offers no STARTTLS, continuing in plaintext");
        }
    }

    if let Some(auth) = auth {
        let mechanisms = capabilities.auth_mechanisms();
        if mechanisms.iter().any(|m| m == "PLAIN") {
            client.auth_plain(&auth.user, &auth.pass).await?;
        } else if mechanisms.iter().any(|m| m == "LOGIN") {
            client.auth_login(&auth.user, &auth.pass).await?;
        } else {
            return Err(ClientError::AuthUnavailable);
        }
    }

    Ok(client)
}
