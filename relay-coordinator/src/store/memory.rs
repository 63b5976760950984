use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{RecordStore, check_transition};
use crate::{
    error::StoreError,
    record::{DeliveryRecord, DeliveryStatus, RecordId, RecordUpdate},
};

/// In-memory record store.
///
/// Lost on restart. Used by tests and by single-process deployments that
/// only need status for the lifetime of the coordinator.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordId, DeliveryRecord>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn select(&self, predicate: impl Fn(&DeliveryRecord) -> bool) -> Vec<DeliveryRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, records: Vec<DeliveryRecord>) -> Result<(), StoreError> {
        let mut stored = self.records.write();
        if let Some(existing) = records.iter().find(|r| stored.contains_key(&r.id)) {
            return Err(StoreError::AlreadyExists(existing.id));
        }

        stored.extend(records.into_iter().map(|record| (record.id, record)));
        Ok(())
    }

    async fn find_pending(&self) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(self.select(|record| record.status == DeliveryStatus::Pending))
    }

    async fn find_by_task(&self, task_id: &str) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(self.select(|record| record.task_id == task_id))
    }

    async fn update_status(
        &self,
        id: RecordId,
        update: RecordUpdate,
    ) -> Result<DeliveryRecord, StoreError> {
        let mut stored = self.records.write();
        let record = stored.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        check_transition(record)?;

        record.apply(&update);
        Ok(record.clone())
    }
}
