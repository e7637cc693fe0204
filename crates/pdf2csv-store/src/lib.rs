// pdf2csv-store - File metadata persistence and blob storage
//
// The metadata store owns the per-file row; the queue manager and runner
// mutate status only through this API. Two implementations: Postgres (sqlx)
// for deployments and an in-memory table for tests and DB-less local runs.
// Raw and processed payloads live behind an opendal operator.

use async_trait::async_trait;
use pdf2csv_core::{BatchAggregate, EntityRecord, FileMetadata, NewFile, ProcessingStatus};
use uuid::Uuid;

mod blob;
mod error;
mod memory;
mod postgres;

pub use blob::BlobStore;
pub use error::StoreError;
pub use memory::MemoryMetadataStore;
pub use postgres::PgMetadataStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Per-file row persistence.
///
/// `insert_records` is the one compound operation: validated entity rows and
/// the file's terminal status land in a single transaction, so a crash never
/// leaves a `completed` row without its records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create one `queued` row per file in a single statement; returns ids in
    /// input order.
    async fn create_for_batch(
        &self,
        collection_id: &str,
        batch_id: &str,
        files: &[NewFile],
    ) -> StoreResult<Vec<Uuid>>;

    async fn update_status(&self, id: Uuid, status: ProcessingStatus) -> StoreResult<()>;

    /// Point a row at a new batch (single-file reprocess runs under a fresh
    /// batch id).
    async fn assign_batch(&self, id: Uuid, batch_id: &str) -> StoreResult<()>;

    async fn set_storage_paths(
        &self,
        id: Uuid,
        raw: Option<&str>,
        processed: Option<&str>,
    ) -> StoreResult<()>;

    async fn set_upload_progress(&self, id: Uuid, progress: u8) -> StoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<FileMetadata>>;

    /// Rows for a batch, ordered by creation.
    async fn find_by_batch(&self, batch_id: &str) -> StoreResult<Vec<FileMetadata>>;

    /// Single aggregate query over a batch's rows.
    async fn aggregate_by_batch(&self, batch_id: &str) -> StoreResult<BatchAggregate>;

    async fn find_by_collection(&self, collection_id: &str) -> StoreResult<Vec<FileMetadata>>;

    /// Delete all rows for a collection; returns the removed rows so the
    /// caller can delete their blobs.
    async fn delete_by_collection(&self, collection_id: &str) -> StoreResult<Vec<FileMetadata>>;

    /// Persist validated records and the file's terminal status atomically.
    async fn insert_records(
        &self,
        file_id: Uuid,
        records: &[EntityRecord],
        terminal: ProcessingStatus,
    ) -> StoreResult<()>;

    /// Liveness check used by the readiness endpoint.
    async fn ping(&self) -> StoreResult<()>;
}
