//! Validation errors for send tasks.

use thiserror::Error;

use crate::task::RecipientRole;

/// Reasons a [`SendTask`](crate::SendTask) is refused before any SMTP work.
///
/// These are task-level failures: they abort the one task and never the
/// process handling it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The body content type is neither `text/plain` nor `text/html`.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The content type names a character set other than UTF-8.
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// An address could not be parsed as a single mailbox.
    #[error("Malformed {role} address '{address}'")]
    MalformedAddress {
        role: RecipientRole,
        address: String,
    },

    /// The sender address could not be parsed.
    #[error("Malformed sender address '{0}'")]
    MalformedSender(String),

    /// The task has no recipients in any of to, cc or bcc.
    #[error("Task has no recipients")]
    NoRecipients,

    /// A required field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// An attachment names a transfer encoding the agent cannot produce.
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedEncoding(String),
}

impl TaskError {
    /// Returns `true` for the content-type family of failures.
    #[must_use]
    pub const fn is_content_type(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedContentType(_) | Self::UnsupportedCharset(_)
        )
    }

    /// Returns `true` when an address failed to parse.
    #[must_use]
    pub const fn is_address(&self) -> bool {
        matches!(self, Self::MalformedAddress { .. } | Self::MalformedSender(_))
    }
}
