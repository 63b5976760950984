//! The durable record store and its backends.

mod file;
mod memory;

use std::{fmt::Debug, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

use crate::{
    error::StoreError,
    record::{DeliveryRecord, RecordId, RecordUpdate},
};

/// Persistence for delivery records.
///
/// Implementations must refuse to move a terminal record to any other status;
/// the reconciler relies on that to never revert an outcome.
#[async_trait]
pub trait RecordStore: Send + Sync + Debug {
    /// Persist new records.
    async fn insert(&self, records: Vec<DeliveryRecord>) -> Result<(), StoreError>;

    /// Every record still `pending`, oldest first.
    async fn find_pending(&self) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Every record for one task, oldest first.
    async fn find_by_task(&self, task_id: &str) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Apply a reconciliation update, returning the stored record.
    async fn update_status(
        &self,
        id: RecordId,
        update: RecordUpdate,
    ) -> Result<DeliveryRecord, StoreError>;
}

/// Which backend to use, selected in the coordinator config.
///
/// ```ron
/// store: File(path: "/var/lib/relay/records"),
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub enum StoreConfig {
    #[default]
    Memory,
    File { path: PathBuf },
}

impl StoreConfig {
    /// Build the configured backend.
    ///
    /// # Errors
    ///
    /// A file store whose directory cannot be created or read.
    pub fn into_store(self) -> Result<Arc<dyn RecordStore>, StoreError> {
        let store: Arc<dyn RecordStore> = match self {
            Self::Memory => Arc::new(MemoryRecordStore::new()),
            Self::File { path } => Arc::new(FileRecordStore::open(path)?),
        };
        Ok(store)
    }
}

/// Terminal records are frozen.
pub(crate) const fn check_transition(record: &DeliveryRecord) -> Result<(), StoreError> {
    if record.status.is_terminal() {
        return Err(StoreError::TerminalState {
            id: record.id,
            status: record.status,
        });
    }
    Ok(())
}
