use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;

use super::{RecordStore, check_transition};
use crate::{
    error::StoreError,
    record::{DeliveryRecord, DeliveryStatus, RecordId, RecordUpdate},
};

const TEMP_PREFIX: &str = ".tmp_";
const EXTENSION: &str = "json";

/// Record store keeping one JSON file per record.
///
/// Every write goes to `.tmp_{id}.json` first and is renamed into place, so a
/// crash mid-write leaves either the old record or the new one, never a torn
/// file. Leftover temporary files are removed on [`open`](Self::open).
///
/// Reads are served from an index loaded at startup and kept in step with
/// every successful write. A batch insert that fails part way removes the
/// files it already wrote, so it is all-or-nothing like the memory store.
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    index: RwLock<HashMap<RecordId, DeliveryRecord>>,
}

impl FileRecordStore {
    /// Open (creating if needed) the store rooted at `path`.
    ///
    /// # Errors
    ///
    /// If the directory cannot be created or listed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;

        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&path)? {
            let file = entry?.path();
            let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
                continue;
            };

            if name.starts_with(TEMP_PREFIX) {
                if let Err(e) = std::fs::remove_file(&file) {
                    tracing::warn!(file = %file.display(), error = %e, "Failed to remove stale temporary record");
                }
                continue;
            }

            if file.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }

            match std::fs::read(&file)
                .map_err(StoreError::from)
                .and_then(|bytes| serde_json::from_slice::<DeliveryRecord>(&bytes).map_err(StoreError::from))
            {
                Ok(record) => {
                    index.insert(record.id, record);
                }
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "Skipping unreadable record");
                }
            }
        }

        tracing::debug!(path = %path.display(), records = index.len(), "Opened file record store");

        Ok(Self {
            path,
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, id: RecordId) -> PathBuf {
        self.path.join(format!("{id}.{EXTENSION}"))
    }

    async fn persist(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let temp = self
            .path
            .join(format!("{TEMP_PREFIX}{}.{EXTENSION}", record.id));

        fs::write(&temp, bytes).await?;
        fs::rename(&temp, self.record_path(record.id)).await?;
        Ok(())
    }

    /// Removes the files of a partly written batch.
    async fn discard(&self, ids: &[RecordId]) {
        for &id in ids {
            if let Err(e) = fs::remove_file(self.record_path(id)).await {
                tracing::warn!(record = %id, error = %e, "Failed to roll back record file");
            }
        }
    }

    fn select(&self, predicate: impl Fn(&DeliveryRecord) -> bool) -> Vec<DeliveryRecord> {
        let mut records: Vec<_> = self
            .index
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
impl RecordStore for FileRecordStore {
    async fn insert(&self, records: Vec<DeliveryRecord>) -> Result<(), StoreError> {
        {
            let index = self.index.read();
            if let Some(existing) = records.iter().find(|r| index.contains_key(&r.id)) {
                return Err(StoreError::AlreadyExists(existing.id));
            }
        }

        let mut written = Vec::with_capacity(records.len());
        for record in &records {
            if let Err(e) = self.persist(record).await {
                self.discard(&written).await;
                return Err(e);
            }
            written.push(record.id);
        }

        self.index
            .write()
            .extend(records.into_iter().map(|record| (record.id, record)));
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
        let mut record = self
            .index
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        check_transition(&record)?;

        record.apply(&update);
        self.persist(&record).await?;
        self.index.write().insert(id, record.clone());
        Ok(record)
    }
}
