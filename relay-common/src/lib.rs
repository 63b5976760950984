//! Types shared between the relay coordinator and its agents.
//!
//! Everything that crosses the wire lives here, along with the task
//! validation both sides run and the logging setup used by every binary.

pub mod error;
pub mod logging;
pub mod task;
pub mod wire;

pub use error::TaskError;
pub use task::{
    Attachment, BodyType, EmailAddress, Priority, RecipientRole, SendTask, SmtpAuth, SmtpServer,
    TransferEncoding,
};
pub use tracing;

/// Lifecycle signal broadcast to every long-running component of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
