//! The agent half of relay.
//!
//! An agent polls the coordinator for [`SendTask`](relay_common::SendTask)s,
//! submits each one through the SMTP server the task names, decides whether
//! the submission counts as delivered, and reports that back.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod message;
pub mod runtime;
pub mod smtp;
pub mod transaction;

pub use classify::Classification;
pub use config::AgentConfig;
pub use coordinator::CoordinatorClient;
pub use dispatch::{DispatchSettings, Dispatcher, TaskOutcome};
pub use error::{AgentError, ConfirmError, RequestError};
pub use message::Message;
pub use runtime::Agent;
pub use transaction::{SendError, SmtpSettings};
