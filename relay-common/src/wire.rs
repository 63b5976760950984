//! Request and response bodies exchanged between agents and the coordinator.

use serde::{Deserialize, Serialize};

pub const HEARTBEAT_PATH: &str = "/heartbeat";
pub const FETCH_PATH: &str = "/dispatch/fetch";
pub const CONFIRM_PATH: &str = "/dispatch/confirm";
pub const TASKS_PATH: &str = "/tasks";
pub const AGENTS_PATH: &str = "/agents";

/// The response envelope every coordinator endpoint returns.
///
/// An empty dispatch queue is `success: false` with no payload, still under
/// HTTP 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Option::default")]
    pub payload: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            msg: String::new(),
            payload: Some(payload),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            msg: msg.into(),
            payload: None,
        }
    }
}

impl Envelope<()> {
    /// A bare acknowledgement with no payload.
    pub fn ack() -> Self {
        Self {
            success: true,
            msg: String::new(),
            payload: None,
        }
    }
}

/// Liveness report from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub id: String,
    pub hostname: String,
}

/// The outcome an agent reports for a task it attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub id: String,
    pub success: bool,
}

/// Returned to producers once a task is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub id: String,
    pub records: usize,
}
