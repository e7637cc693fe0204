// File metadata row types
//
// The persisted per-file row: one row per uploaded document, owned by the
// metadata store. The queue manager and runner mutate status only through
// the store's API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Per-file processing status, stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Reprocessing,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Reprocessing => "reprocessing",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown processing status: {0}")]
pub struct StatusParseError(pub String);

impl std::str::FromStr for ProcessingStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ProcessingStatus::Queued),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            "reprocessing" => Ok(ProcessingStatus::Reprocessing),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A persisted file-metadata row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: Uuid,
    pub collection_id: String,
    pub original_filename: String,
    pub file_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_storage_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_storage_path: Option<String>,
    /// 0..=100, updated while the multipart upload streams in.
    pub upload_progress: i16,
    pub created_at: DateTime<Utc>,
}

/// Input for row creation; ids and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub original_filename: String,
    pub file_size: i64,
}

/// The subset of a row carried by `FILES_PROCESSED` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetaSummary {
    pub id: Uuid,
    pub processing_status: ProcessingStatus,
    pub collection_id: String,
}

impl From<&FileMetadata> for FileMetaSummary {
    fn from(meta: &FileMetadata) -> Self {
        Self {
            id: meta.id,
            processing_status: meta.processing_status,
            collection_id: meta.collection_id.clone(),
        }
    }
}

/// Result of the single aggregate query over a batch's rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAggregate {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}
