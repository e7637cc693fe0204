// Postgres-backed metadata store
//
// Plain bind-style queries; the schema is created on startup if absent.
// Status values are stored as lowercase text and parsed back through the
// core enum.

use async_trait::async_trait;
use chrono::Utc;
use pdf2csv_core::{BatchAggregate, EntityRecord, FileMetadata, NewFile, ProcessingStatus};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;
use uuid::Uuid;

use crate::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS file_metadata (
    id UUID PRIMARY KEY,
    collection_id TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    file_size BIGINT NOT NULL,
    batch_id TEXT,
    processing_status TEXT NOT NULL,
    raw_storage_path TEXT,
    processed_storage_path TEXT,
    upload_progress SMALLINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_file_metadata_collection ON file_metadata (collection_id);
CREATE INDEX IF NOT EXISTS idx_file_metadata_batch ON file_metadata (batch_id);

CREATE TABLE IF NOT EXISTS extracted_records (
    id BIGSERIAL PRIMARY KEY,
    file_id UUID NOT NULL REFERENCES file_metadata (id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence DOUBLE PRECISION NOT NULL,
    page INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_extracted_records_file ON extracted_records (file_id);
"#;

pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Connect and ensure the schema exists.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(max_connections, "connected to metadata store");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_meta(row: &PgRow) -> StoreResult<FileMetadata> {
    let status: String = row.try_get("processing_status")?;
    Ok(FileMetadata {
        id: row.try_get("id")?,
        collection_id: row.try_get("collection_id")?,
        original_filename: row.try_get("original_filename")?,
        file_size: row.try_get("file_size")?,
        batch_id: row.try_get("batch_id")?,
        processing_status: status.parse::<ProcessingStatus>()?,
        raw_storage_path: row.try_get("raw_storage_path")?,
        processed_storage_path: row.try_get("processed_storage_path")?,
        upload_progress: row.try_get("upload_progress")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl crate::MetadataStore for PgMetadataStore {
    async fn create_for_batch(
        &self,
        collection_id: &str,
        batch_id: &str,
        files: &[NewFile],
    ) -> StoreResult<Vec<Uuid>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let ids: Vec<Uuid> = files.iter().map(|_| Uuid::new_v4()).collect();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO file_metadata \
             (id, collection_id, original_filename, file_size, batch_id, \
              processing_status, upload_progress, created_at) ",
        );
        builder.push_values(files.iter().zip(&ids), |mut b, (file, id)| {
            b.push_bind(id)
                .push_bind(collection_id)
                .push_bind(&file.original_filename)
                .push_bind(file.file_size)
                .push_bind(batch_id)
                .push_bind(ProcessingStatus::Queued.as_str())
                .push_bind(0i16)
                .push_bind(now);
        });
        builder.build().execute(&self.pool).await?;

        Ok(ids)
    }

    async fn update_status(&self, id: Uuid, status: ProcessingStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE file_metadata SET processing_status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn assign_batch(&self, id: Uuid, batch_id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE file_metadata SET batch_id = $1 WHERE id = $2")
            .bind(batch_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn set_storage_paths(
        &self,
        id: Uuid,
        raw: Option<&str>,
        processed: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE file_metadata SET \
             raw_storage_path = COALESCE($1, raw_storage_path), \
             processed_storage_path = COALESCE($2, processed_storage_path) \
             WHERE id = $3",
        )
        .bind(raw)
        .bind(processed)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn set_upload_progress(&self, id: Uuid, progress: u8) -> StoreResult<()> {
        if progress > 100 {
            return Err(StoreError::InvalidProgress(progress));
        }

        let result = sqlx::query("UPDATE file_metadata SET upload_progress = $1 WHERE id = $2")
            .bind(progress as i16)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<FileMetadata>> {
        let row = sqlx::query("SELECT * FROM file_metadata WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_meta).transpose()
    }

    async fn find_by_batch(&self, batch_id: &str) -> StoreResult<Vec<FileMetadata>> {
        let rows = sqlx::query(
            "SELECT * FROM file_metadata WHERE batch_id = $1 ORDER BY created_at, id",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_meta).collect()
    }

    async fn aggregate_by_batch(&self, batch_id: &str) -> StoreResult<BatchAggregate> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE processing_status = 'completed') AS completed, \
             COUNT(*) FILTER (WHERE processing_status = 'failed') AS failed \
             FROM file_metadata WHERE batch_id = $1",
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let completed: i64 = row.try_get("completed")?;
        let failed: i64 = row.try_get("failed")?;

        Ok(BatchAggregate {
            total: total as usize,
            completed: completed as usize,
            failed: failed as usize,
        })
    }

    async fn find_by_collection(&self, collection_id: &str) -> StoreResult<Vec<FileMetadata>> {
        let rows = sqlx::query(
            "SELECT * FROM file_metadata WHERE collection_id = $1 ORDER BY created_at, id",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_meta).collect()
    }

    async fn delete_by_collection(&self, collection_id: &str) -> StoreResult<Vec<FileMetadata>> {
        let rows = sqlx::query("DELETE FROM file_metadata WHERE collection_id = $1 RETURNING *")
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_meta).collect()
    }

    async fn insert_records(
        &self,
        file_id: Uuid,
        records: &[EntityRecord],
        terminal: ProcessingStatus,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        if !records.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO extracted_records (file_id, kind, value, confidence, page) ",
            );
            builder.push_values(records, |mut b, record| {
                b.push_bind(file_id)
                    .push_bind(&record.kind)
                    .push_bind(&record.value)
                    .push_bind(record.confidence)
                    .push_bind(record.page as i32);
            });
            builder.build().execute(&mut *tx).await?;
        }

        let result = sqlx::query("UPDATE file_metadata SET processing_status = $1 WHERE id = $2")
            .bind(terminal.as_str())
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(file_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
