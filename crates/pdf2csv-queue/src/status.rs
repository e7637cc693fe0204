// Public queue status snapshots
//
// Serializable aggregates served by the admin endpoints. Field names are
// camelCase on the wire to match the rest of the protocol.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Full aggregate returned by `queue_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queued_count: usize,
    pub active_count: usize,
    pub max_concurrent_batches: usize,
    pub max_queue_length: usize,
    /// Active slots as a percentage of configured capacity.
    pub utilization_percent: f64,
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    /// Mean of the recent completion samples; 0 until any batch finishes.
    pub average_completion_time_seconds: f64,
    pub throughput_batches_per_hour: f64,
    /// Mean estimated wait across currently queued jobs.
    pub average_wait_time_seconds: f64,
    pub uptime_seconds: u64,
    pub queued: Vec<QueuedSnapshot>,
    pub active: Vec<ActiveSnapshot>,
}

/// Lightweight counters for the metrics endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounters {
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub queued_count: usize,
    pub active_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSnapshot {
    pub batch_id: String,
    pub collection_id: String,
    pub file_count: usize,
    /// 1-based FIFO position.
    pub position: usize,
    pub estimated_wait_seconds: u64,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSnapshot {
    pub batch_id: String,
    pub collection_id: String,
    pub file_count: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub remaining_timeout_ms: u64,
}

/// Point-in-time view of one batch, for the hydration endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum BatchInfo {
    #[serde(rename = "processing")]
    Active {
        collection_id: String,
        file_count: usize,
        started_at: DateTime<Utc>,
        elapsed_seconds: u64,
        remaining_timeout_ms: u64,
    },
    #[serde(rename = "queued")]
    Queued {
        collection_id: String,
        file_count: usize,
        position: usize,
        estimated_wait_seconds: u64,
    },
}
