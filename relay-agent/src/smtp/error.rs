//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur while talking to an SMTP server.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    Parse(String),

    /// The server answered with a status code the client did not expect.
    #[error("SMTP error: {code} - {message}")]
    Smtp { code: u16, message: String },

    /// TLS handshake or configuration failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Encryption is mandatory but the server does not offer STARTTLS.
    #[error("Server does not offer STARTTLS")]
    StartTlsUnavailable,

    /// Credentials were supplied but no usable AUTH mechanism is advertised.
    #[error("Server offers no supported AUTH mechanism")]
    AuthUnavailable,

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// The server did not answer in time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Failures of the connection itself, as opposed to a reply from the
    /// server.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::Timeout(_) | Self::Tls(_)
        )
    }

    pub(crate) fn from_reply(response: &super::Response) -> Self {
        Self::Smtp {
            code: response.code,
            message: response.message(),
        }
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
