//! Error types for the coordinator.

use std::io;

use thiserror::Error;

use crate::record::{DeliveryStatus, RecordId};

/// Dispatch queue failures. Both are expected conditions, not faults.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Dispatch queue is full")]
    Full,

    #[error("Dispatch queue is empty")]
    Empty,
}

/// Durable record store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Record already exists: {0}")]
    AlreadyExists(RecordId),

    /// Terminal records never change status again.
    #[error("Record {id} is already {status}")]
    TerminalState { id: RecordId, status: DeliveryStatus },
}

impl StoreError {
    /// Whether retrying the same operation later could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Coordinator process failures.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Server error: {0}")]
    Server(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
