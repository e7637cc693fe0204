// Lifecycle event union
//
// One discriminated union backs both the in-process event bus and the
// WebSocket wire frames. The `type` tag and camelCase field names are the
// protocol contract the browser client consumes; serialization happens once,
// in the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::file_meta::FileMetaSummary;

/// Per-batch terminal counts carried by `BATCH_PROCESSING_COMPLETED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Queue lifecycle events.
///
/// `collection_id` is optional on the `BATCH_PROCESSING_*` variants: a client
/// that observes one without it falls back to its locally tracked batches or
/// the hydration endpoint. The manager and runner always populate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    #[serde(rename = "BATCH_QUEUED", rename_all = "camelCase")]
    BatchQueued {
        batch_id: String,
        collection_id: String,
        position: usize,
        file_count: usize,
        /// Seconds until the batch is expected to start.
        estimated_wait_time: u64,
        total_queued: usize,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "BATCH_QUEUE_POSITION_UPDATED", rename_all = "camelCase")]
    BatchQueuePositionUpdated {
        batch_id: String,
        collection_id: String,
        position: usize,
        estimated_wait_time: u64,
        total_queued: usize,
    },

    #[serde(rename = "BATCH_DEQUEUED", rename_all = "camelCase")]
    BatchDequeued {
        batch_id: String,
        collection_id: String,
        file_count: usize,
        started_at: DateTime<Utc>,
        total_queued: usize,
        active_count: usize,
        available_slots: usize,
    },

    #[serde(rename = "BATCH_PROCESSING_STARTED", rename_all = "camelCase")]
    BatchProcessingStarted {
        batch_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection_id: Option<String>,
        file_count: usize,
        started_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "BATCH_PROCESSING_PROGRESS", rename_all = "camelCase")]
    BatchProcessingProgress {
        batch_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection_id: Option<String>,
        /// Non-decreasing per batch, 0..=100.
        progress: u8,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "BATCH_PROCESSING_COMPLETED", rename_all = "camelCase")]
    BatchProcessingCompleted {
        batch_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection_id: Option<String>,
        file_count: usize,
        counts: BatchCounts,
    },

    #[serde(rename = "BATCH_PROCESSING_FAILED", rename_all = "camelCase")]
    BatchProcessingFailed {
        batch_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection_id: Option<String>,
        error: String,
    },

    #[serde(rename = "BATCH_TIMEOUT", rename_all = "camelCase")]
    BatchTimeout {
        batch_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection_id: Option<String>,
        timeout_ms: u64,
    },

    /// Global capacity notice; carries no batch identity.
    #[serde(rename = "QUEUE_FULL", rename_all = "camelCase")]
    QueueFull {
        message: String,
        queue_length: usize,
        max_length: usize,
    },

    #[serde(rename = "FILES_PROCESSED", rename_all = "camelCase")]
    FilesProcessed { file_metadata: FileMetaSummary },
}

impl QueueEvent {
    /// The wire `type` tag, for logging and metrics labels.
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::BatchQueued { .. } => "BATCH_QUEUED",
            QueueEvent::BatchQueuePositionUpdated { .. } => "BATCH_QUEUE_POSITION_UPDATED",
            QueueEvent::BatchDequeued { .. } => "BATCH_DEQUEUED",
            QueueEvent::BatchProcessingStarted { .. } => "BATCH_PROCESSING_STARTED",
            QueueEvent::BatchProcessingProgress { .. } => "BATCH_PROCESSING_PROGRESS",
            QueueEvent::BatchProcessingCompleted { .. } => "BATCH_PROCESSING_COMPLETED",
            QueueEvent::BatchProcessingFailed { .. } => "BATCH_PROCESSING_FAILED",
            QueueEvent::BatchTimeout { .. } => "BATCH_TIMEOUT",
            QueueEvent::QueueFull { .. } => "QUEUE_FULL",
            QueueEvent::FilesProcessed { .. } => "FILES_PROCESSED",
        }
    }

    pub fn batch_id(&self) -> Option<&str> {
        match self {
            QueueEvent::BatchQueued { batch_id, .. }
            | QueueEvent::BatchQueuePositionUpdated { batch_id, .. }
            | QueueEvent::BatchDequeued { batch_id, .. }
            | QueueEvent::BatchProcessingStarted { batch_id, .. }
            | QueueEvent::BatchProcessingProgress { batch_id, .. }
            | QueueEvent::BatchProcessingCompleted { batch_id, .. }
            | QueueEvent::BatchProcessingFailed { batch_id, .. }
            | QueueEvent::BatchTimeout { batch_id, .. } => Some(batch_id),
            QueueEvent::QueueFull { .. } => None,
            QueueEvent::FilesProcessed { .. } => None,
        }
    }

    pub fn collection_id(&self) -> Option<&str> {
        match self {
            QueueEvent::BatchQueued { collection_id, .. }
            | QueueEvent::BatchQueuePositionUpdated { collection_id, .. }
            | QueueEvent::BatchDequeued { collection_id, .. } => Some(collection_id),
            QueueEvent::BatchProcessingStarted { collection_id, .. }
            | QueueEvent::BatchProcessingProgress { collection_id, .. }
            | QueueEvent::BatchProcessingCompleted { collection_id, .. }
            | QueueEvent::BatchProcessingFailed { collection_id, .. }
            | QueueEvent::BatchTimeout { collection_id, .. } => collection_id.as_deref(),
            QueueEvent::QueueFull { .. } => None,
            QueueEvent::FilesProcessed { file_metadata } => Some(&file_metadata.collection_id),
        }
    }

    /// True for events that end a batch's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueEvent::BatchProcessingCompleted { .. }
                | QueueEvent::BatchProcessingFailed { .. }
                | QueueEvent::BatchTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_meta::ProcessingStatus;
    use uuid::Uuid;

    #[test]
    fn test_wire_tags_and_camel_case() {
        let event = QueueEvent::BatchQueued {
            batch_id: "b1".to_string(),
            collection_id: "c1".to_string(),
            position: 2,
            file_count: 3,
            estimated_wait_time: 150,
            total_queued: 2,
            timestamp: Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BATCH_QUEUED");
        assert_eq!(json["batchId"], "b1");
        assert_eq!(json["collectionId"], "c1");
        assert_eq!(json["estimatedWaitTime"], 150);
        assert_eq!(json["totalQueued"], 2);
    }

    #[test]
    fn test_optional_collection_id_omitted() {
        let event = QueueEvent::BatchProcessingProgress {
            batch_id: "b7".to_string(),
            collection_id: None,
            progress: 40,
            status: "ocr_complete".to_string(),
            message: None,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BATCH_PROCESSING_PROGRESS");
        assert!(json.get("collectionId").is_none());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_round_trip_from_wire() {
        let frame = r#"{"type":"BATCH_TIMEOUT","batchId":"b9","collectionId":"c2","timeoutMs":2000}"#;
        let event: QueueEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            event,
            QueueEvent::BatchTimeout {
                batch_id: "b9".to_string(),
                collection_id: Some("c2".to_string()),
                timeout_ms: 2000,
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn test_files_processed_summary() {
        let id = Uuid::new_v4();
        let event = QueueEvent::FilesProcessed {
            file_metadata: FileMetaSummary {
                id,
                processing_status: ProcessingStatus::Completed,
                collection_id: "c3".to_string(),
            },
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["fileMetadata"]["processingStatus"], "completed");
        assert_eq!(event.collection_id(), Some("c3"));
        assert_eq!(event.batch_id(), None);
    }
}
