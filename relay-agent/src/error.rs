use thiserror::Error;

/// A request to the coordinator that did not produce a usable answer.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Coordinator answered {status}: {msg}")]
    Status { status: u16, msg: String },

    #[error("Malformed coordinator response: {0}")]
    Malformed(String),
}

impl RequestError {
    /// The coordinator could not be reached at all.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Error, Debug)]
#[error("Confirmation of task {id} abandoned after {attempts} attempts: {last}")]
pub struct ConfirmError {
    pub id: String,
    pub attempts: u32,
    #[source]
    pub last: RequestError,
}

/// Conditions that stop the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Coordinator unreachable after {failures} consecutive poll failures")]
    CoordinatorUnreachable { failures: u32 },

    #[error("Could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Invalid coordinator address '{0}'")]
    Address(String),

    #[error("Agent cycle failed: {0}")]
    Cycle(String),
}
