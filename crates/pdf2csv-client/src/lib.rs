// pdf2csv-client - UI-side event processor
//
// A pure state machine over the wire-frame union: it keeps a per-batch map
// for the selected collection and answers each event with the actions the
// surrounding UI should take (re-render, hydrate an unknown batch, show the
// global capacity notice, schedule a terminal entry's removal). No I/O here;
// the embedding shell owns sockets, timers, and the hydration fetch.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use pdf2csv_core::{BatchSnapshot, QueueEvent};
use tracing::debug;

/// How long a completed batch stays on screen.
pub const COMPLETED_LINGER: Duration = Duration::from_millis(500);
/// Failures linger long enough to be read.
pub const FAILED_LINGER: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum BatchPhase {
    Queued { position: usize, estimated_wait: u64 },
    Processing { progress: u8, status: String },
    Completed,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBatch {
    pub collection_id: Option<String>,
    pub file_count: usize,
    pub phase: BatchPhase,
}

/// What the embedding UI should do in response to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    Render,
    /// Fetch the hydration snapshot for an unknown batch, then `seed` it.
    RequestHydration { batch_id: String },
    /// Global notice; shown regardless of selection, never auto-dismissed.
    ShowGlobalNotice { message: String },
    /// Drop the batch from the local map after the linger interval.
    ScheduleRemoval { batch_id: String, after: Duration },
}

#[derive(Debug, Default)]
pub struct ClientProcessor {
    selected_collection: Option<String>,
    batches: HashMap<String, TrackedBatch>,
    /// Terminal messages dedupe per batch id.
    terminal_seen: HashSet<String>,
    global_notice: Option<String>,
}

impl ClientProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_collection(&mut self, collection_id: Option<String>) {
        if self.selected_collection != collection_id {
            self.selected_collection = collection_id;
            self.batches.clear();
            self.terminal_seen.clear();
        }
    }

    pub fn selected_collection(&self) -> Option<&str> {
        self.selected_collection.as_deref()
    }

    pub fn tracked(&self, batch_id: &str) -> Option<&TrackedBatch> {
        self.batches.get(batch_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.batches.len()
    }

    pub fn global_notice(&self) -> Option<&str> {
        self.global_notice.as_deref()
    }

    /// Seed a local entry from a hydration snapshot. Ignored when the
    /// snapshot binds to a different collection than the current selection.
    pub fn seed(&mut self, snapshot: &BatchSnapshot) {
        if self.selected_collection.as_deref() != Some(snapshot.collection_id.as_str()) {
            debug!(
                batch_id = %snapshot.batch_id,
                collection_id = %snapshot.collection_id,
                "hydration snapshot for unselected collection; dropping"
            );
            return;
        }

        let done = snapshot.counts.completed + snapshot.counts.failed;
        let progress = if snapshot.counts.total == 0 {
            0
        } else {
            (done * 100 / snapshot.counts.total) as u8
        };

        let phase = match snapshot.status.as_str() {
            "queued" => BatchPhase::Queued {
                position: 0,
                estimated_wait: 0,
            },
            "completed" => BatchPhase::Completed,
            "failed" => BatchPhase::Failed {
                error: "batch failed".to_string(),
            },
            _ => BatchPhase::Processing {
                progress,
                status: "hydrated".to_string(),
            },
        };

        self.batches.insert(
            snapshot.batch_id.clone(),
            TrackedBatch {
                collection_id: Some(snapshot.collection_id.clone()),
                file_count: snapshot.counts.total,
                phase,
            },
        );
    }

    /// Drop a batch after its removal timer fires.
    pub fn remove(&mut self, batch_id: &str) {
        self.batches.remove(batch_id);
    }

    /// Feed one event through the state machine.
    pub fn apply(&mut self, event: &QueueEvent) -> Vec<ClientAction> {
        // The capacity notice is global: selection never filters it.
        if let QueueEvent::QueueFull { message, .. } = event {
            self.global_notice = Some(message.clone());
            return vec![ClientAction::ShowGlobalNotice {
                message: message.clone(),
            }];
        }

        if !self.is_relevant(event) {
            return match self.hydration_needed(event) {
                Some(batch_id) => vec![ClientAction::RequestHydration { batch_id }],
                None => Vec::new(),
            };
        }

        match event {
            QueueEvent::BatchQueued {
                batch_id,
                collection_id,
                position,
                file_count,
                estimated_wait_time,
                ..
            } => {
                self.batches.insert(
                    batch_id.clone(),
                    TrackedBatch {
                        collection_id: Some(collection_id.clone()),
                        file_count: *file_count,
                        phase: BatchPhase::Queued {
                            position: *position,
                            estimated_wait: *estimated_wait_time,
                        },
                    },
                );
                vec![ClientAction::Render]
            }

            QueueEvent::BatchQueuePositionUpdated {
                batch_id,
                position,
                estimated_wait_time,
                ..
            } => {
                if let Some(tracked) = self.batches.get_mut(batch_id) {
                    if matches!(tracked.phase, BatchPhase::Queued { .. }) {
                        tracked.phase = BatchPhase::Queued {
                            position: *position,
                            estimated_wait: *estimated_wait_time,
                        };
                        return vec![ClientAction::Render];
                    }
                }
                Vec::new()
            }

            // Silent transition: the processing view appears at
            // BATCH_PROCESSING_STARTED, not here.
            QueueEvent::BatchDequeued { .. } => Vec::new(),

            QueueEvent::BatchProcessingStarted {
                batch_id,
                collection_id,
                file_count,
                ..
            } => {
                let entry = self
                    .batches
                    .entry(batch_id.clone())
                    .or_insert(TrackedBatch {
                        collection_id: collection_id.clone(),
                        file_count: *file_count,
                        phase: BatchPhase::Processing {
                            progress: 0,
                            status: "started".to_string(),
                        },
                    });
                entry.phase = BatchPhase::Processing {
                    progress: 0,
                    status: "started".to_string(),
                };
                vec![ClientAction::Render]
            }

            QueueEvent::BatchProcessingProgress {
                batch_id,
                progress,
                status,
                ..
            } => {
                if let Some(tracked) = self.batches.get_mut(batch_id) {
                    let current = match &tracked.phase {
                        BatchPhase::Processing { progress, .. } => *progress,
                        _ => 0,
                    };
                    // Duplicate delivery may reorder; never move backwards.
                    tracked.phase = BatchPhase::Processing {
                        progress: (*progress).max(current),
                        status: status.clone(),
                    };
                    return vec![ClientAction::Render];
                }
                Vec::new()
            }

            QueueEvent::BatchProcessingCompleted { batch_id, .. } => {
                if !self.terminal_seen.insert(batch_id.clone()) {
                    return Vec::new();
                }
                if let Some(tracked) = self.batches.get_mut(batch_id) {
                    tracked.phase = BatchPhase::Completed;
                }
                vec![
                    ClientAction::Render,
                    ClientAction::ScheduleRemoval {
                        batch_id: batch_id.clone(),
                        after: COMPLETED_LINGER,
                    },
                ]
            }

            QueueEvent::BatchProcessingFailed {
                batch_id, error, ..
            } => {
                if !self.terminal_seen.insert(batch_id.clone()) {
                    return Vec::new();
                }
                if let Some(tracked) = self.batches.get_mut(batch_id) {
                    tracked.phase = BatchPhase::Failed {
                        error: error.clone(),
                    };
                }
                vec![
                    ClientAction::Render,
                    ClientAction::ScheduleRemoval {
                        batch_id: batch_id.clone(),
                        after: FAILED_LINGER,
                    },
                ]
            }

            QueueEvent::BatchTimeout { batch_id, .. } => {
                if !self.terminal_seen.insert(batch_id.clone()) {
                    return Vec::new();
                }
                if let Some(tracked) = self.batches.get_mut(batch_id) {
                    tracked.phase = BatchPhase::Failed {
                        error: "batch timed out".to_string(),
                    };
                }
                vec![
                    ClientAction::Render,
                    ClientAction::ScheduleRemoval {
                        batch_id: batch_id.clone(),
                        after: FAILED_LINGER,
                    },
                ]
            }

            QueueEvent::FilesProcessed { .. } => vec![ClientAction::Render],

            QueueEvent::QueueFull { .. } => unreachable!("handled above"),
        }
    }

    /// Selection filter: a matching collection id is relevant; a missing
    /// collection id is accepted only when the batch is already tracked.
    fn is_relevant(&self, event: &QueueEvent) -> bool {
        match event.collection_id() {
            Some(collection_id) => {
                self.selected_collection.as_deref() == Some(collection_id)
            }
            None => event
                .batch_id()
                .map(|batch_id| self.batches.contains_key(batch_id))
                .unwrap_or(false),
        }
    }

    /// An untagged STARTED/PROGRESS for an unknown batch may still belong to
    /// the selected collection; the authoritative answer comes from the
    /// hydration endpoint.
    fn hydration_needed(&self, event: &QueueEvent) -> Option<String> {
        if event.collection_id().is_some() {
            return None;
        }
        match event {
            QueueEvent::BatchProcessingStarted { batch_id, .. }
            | QueueEvent::BatchProcessingProgress { batch_id, .. }
                if !self.batches.contains_key(batch_id) =>
            {
                Some(batch_id.clone())
            }
            _ => None,
        }
    }
}
