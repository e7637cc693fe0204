// Internal queue state
//
// Everything behind the manager's mutex: the FIFO, the active set, and the
// metric counters. The mutex is never held across an await point; dispatch
// collects what it needs, drops the lock, then emits and spawns.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Duration, Instant};

use crate::job::BatchJob;

/// Completion samples retained for the rolling average.
pub(crate) const RECENT_DURATIONS: usize = 100;

pub(crate) struct QueuedJob {
    pub job: BatchJob,
    pub enqueued_at: DateTime<Utc>,
}

pub(crate) struct ActiveBatch {
    pub collection_id: String,
    pub file_count: usize,
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
    pub deadline: Instant,
    pub timeout: Duration,
    /// Timeout timer; aborted on release.
    pub timer: JoinHandle<()>,
    /// Set once the processor task is spawned; aborted on timeout.
    pub processor_abort: Option<AbortHandle>,
}

#[derive(Default)]
pub(crate) struct MetricsState {
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    /// Guards against counting one batch's failure twice (timeout + release).
    pub counted_failed: HashSet<String>,
    pub durations: VecDeque<Duration>,
}

impl MetricsState {
    pub fn record_duration(&mut self, duration: Duration) {
        if self.durations.len() == RECENT_DURATIONS {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }

    /// Mean of the retained samples, if any exist yet.
    pub fn average_completion_secs(&self) -> Option<f64> {
        if self.durations.is_empty() {
            return None;
        }
        let total: Duration = self.durations.iter().sum();
        Some(total.as_secs_f64() / self.durations.len() as f64)
    }

    pub fn reset(&mut self) {
        self.total_enqueued = 0;
        self.total_processed = 0;
        self.total_failed = 0;
        self.total_rejected = 0;
        self.counted_failed.clear();
        self.durations.clear();
    }
}

#[derive(Default)]
pub(crate) struct QueueState {
    pub queue: VecDeque<QueuedJob>,
    pub active: HashMap<String, ActiveBatch>,
    pub shutting_down: bool,
    pub metrics: MetricsState,
}

impl QueueState {
    pub fn queued_position(&self, batch_id: &str) -> Option<usize> {
        self.queue
            .iter()
            .position(|queued| queued.job.batch_id == batch_id)
            .map(|index| index + 1)
    }

    pub fn available_slots(&self, max_concurrent: usize) -> usize {
        max_concurrent.saturating_sub(self.active.len())
    }
}

/// Expected seconds until a queued batch starts.
///
/// Jobs within the free-slot horizon start immediately; everything deeper
/// waits for `ceil((position - available) * avg / slots)` completions.
pub(crate) fn estimate_wait_seconds(
    position: usize,
    available_slots: usize,
    average_secs: u64,
    max_concurrent: usize,
) -> u64 {
    if position <= available_slots {
        return 0;
    }
    let ahead = (position - available_slots) as u64;
    (ahead * average_secs).div_ceil(max_concurrent.max(1) as u64)
}
