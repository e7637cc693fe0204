// Hydration snapshot
//
// The authoritative per-batch view served on reconnect: queue/runner state
// combined with the aggregate over the batch's file rows. The client seeds
// its local entry from this and applies subsequent events on top.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::file_meta::{BatchAggregate, FileMetadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: String,
    pub collection_id: String,
    pub counts: BatchAggregate,
    pub files: Vec<FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// `queued`, `processing`, `completed`, or `failed`.
    pub status: String,
}
