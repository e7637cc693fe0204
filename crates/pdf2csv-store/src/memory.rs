// In-memory metadata store
//
// Backs tests and DB-less local runs. A single mutex guards rows, insertion
// order, and entity records so the compound insert stays atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pdf2csv_core::{BatchAggregate, EntityRecord, FileMetadata, NewFile, ProcessingStatus};
use uuid::Uuid;

use crate::{StoreError, StoreResult};

#[derive(Default)]
struct MemoryInner {
    rows: HashMap<Uuid, FileMetadata>,
    order: Vec<Uuid>,
    records: HashMap<Uuid, Vec<EntityRecord>>,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity records persisted for a file (test helper).
    pub fn records_for(&self, file_id: Uuid) -> Vec<EntityRecord> {
        self.inner
            .lock()
            .records
            .get(&file_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.inner.lock().rows.len()
    }
}

#[async_trait]
impl crate::MetadataStore for MemoryMetadataStore {
    async fn create_for_batch(
        &self,
        collection_id: &str,
        batch_id: &str,
        files: &[NewFile],
    ) -> StoreResult<Vec<Uuid>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let mut ids = Vec::with_capacity(files.len());

        for file in files {
            let id = Uuid::new_v4();
            inner.rows.insert(
                id,
                FileMetadata {
                    id,
                    collection_id: collection_id.to_string(),
                    original_filename: file.original_filename.clone(),
                    file_size: file.file_size,
                    batch_id: Some(batch_id.to_string()),
                    processing_status: ProcessingStatus::Queued,
                    raw_storage_path: None,
                    processed_storage_path: None,
                    upload_progress: 0,
                    created_at: now,
                },
            );
            inner.order.push(id);
            ids.push(id);
        }

        Ok(ids)
    }

    async fn update_status(&self, id: Uuid, status: ProcessingStatus) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let row = inner.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.processing_status = status;
        Ok(())
    }

    async fn assign_batch(&self, id: Uuid, batch_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let row = inner.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.batch_id = Some(batch_id.to_string());
        Ok(())
    }

    async fn set_storage_paths(
        &self,
        id: Uuid,
        raw: Option<&str>,
        processed: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let row = inner.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(raw) = raw {
            row.raw_storage_path = Some(raw.to_string());
        }
        if let Some(processed) = processed {
            row.processed_storage_path = Some(processed.to_string());
        }
        Ok(())
    }

    async fn set_upload_progress(&self, id: Uuid, progress: u8) -> StoreResult<()> {
        if progress > 100 {
            return Err(StoreError::InvalidProgress(progress));
        }
        let mut inner = self.inner.lock();
        let row = inner.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.upload_progress = progress as i16;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<FileMetadata>> {
        Ok(self.inner.lock().rows.get(&id).cloned())
    }

    async fn find_by_batch(&self, batch_id: &str) -> StoreResult<Vec<FileMetadata>> {
        let inner = self.inner.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.rows.get(id))
            .filter(|row| row.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn aggregate_by_batch(&self, batch_id: &str) -> StoreResult<BatchAggregate> {
        let inner = self.inner.lock();
        let mut aggregate = BatchAggregate::default();
        for row in inner.rows.values() {
            if row.batch_id.as_deref() != Some(batch_id) {
                continue;
            }
            aggregate.total += 1;
            match row.processing_status {
                ProcessingStatus::Completed => aggregate.completed += 1,
                ProcessingStatus::Failed => aggregate.failed += 1,
                _ => {}
            }
        }
        Ok(aggregate)
    }

    async fn find_by_collection(&self, collection_id: &str) -> StoreResult<Vec<FileMetadata>> {
        let inner = self.inner.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.rows.get(id))
            .filter(|row| row.collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn delete_by_collection(&self, collection_id: &str) -> StoreResult<Vec<FileMetadata>> {
        let mut inner = self.inner.lock();
        let doomed: Vec<Uuid> = inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .rows
                    .get(*id)
                    .map(|row| row.collection_id == collection_id)
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for id in &doomed {
            if let Some(row) = inner.rows.remove(id) {
                removed.push(row);
            }
            inner.records.remove(id);
        }
        inner.order.retain(|id| !doomed.contains(id));

        Ok(removed)
    }

    async fn insert_records(
        &self,
        file_id: Uuid,
        records: &[EntityRecord],
        terminal: ProcessingStatus,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let row = inner
            .rows
            .get_mut(&file_id)
            .ok_or(StoreError::NotFound(file_id))?;
        row.processing_status = terminal;
        inner
            .records
            .entry(file_id)
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
