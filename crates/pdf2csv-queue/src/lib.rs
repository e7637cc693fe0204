// pdf2csv-queue - Batch queue manager
//
// Bounded in-memory FIFO with a fixed number of execution slots, per-batch
// timeout timers, lifecycle event emission, and metric counters. This is the
// only writer of its own state; callers receive sentinel results, never
// errors. Queued-but-not-started work does not survive a restart.

use std::sync::{Arc, Weak};

use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use pdf2csv_config::QueueConfig;
use pdf2csv_core::QueueEvent;
use pdf2csv_events::EventBus;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

mod debounce;
mod job;
mod state;
mod status;

pub use job::{BatchJob, BatchOutcome, ProcessorFn, ProcessorFuture};
pub use status::{ActiveSnapshot, BatchInfo, QueueCounters, QueueStatus, QueuedSnapshot};

use debounce::Debouncer;
use state::{ActiveBatch, QueueState, QueuedJob};

/// Result of an enqueue attempt. The manager never errors at this boundary;
/// every rejection is a sentinel the caller maps to its own surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Appended at the tail; 1-based position.
    Accepted { position: usize },
    /// Already active (position 0) or already queued (1-based position).
    Duplicate { position: usize },
    RejectedFull,
    RejectedShutdown,
    RejectedInvalid,
}

enum ReleaseCause {
    Completed,
    Failed,
    TimedOut,
}

/// The batch queue manager. Shared as `Arc` so timers and processor watchers
/// can reach back in when they fire; the weak self-handle is what those
/// spawned tasks hold.
pub struct BatchQueue {
    config: QueueConfig,
    bus: EventBus,
    state: Mutex<QueueState>,
    debounce: Debouncer,
    started_at: Instant,
    self_ref: Weak<BatchQueue>,
}

impl BatchQueue {
    pub fn new(config: QueueConfig, bus: EventBus) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            bus,
            state: Mutex::new(QueueState::default()),
            debounce: Debouncer::default(),
            started_at: Instant::now(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn shared(&self) -> Arc<Self> {
        self.self_ref
            .upgrade()
            .expect("queue outlives its own method calls")
    }

    /// Append a job to the FIFO and kick the dispatcher.
    ///
    /// Capacity is judged on queue length alone; a free execution slot does
    /// not override a full queue. Duplicates are a logged no-op returning the
    /// existing position.
    pub fn enqueue(&self, job: BatchJob) -> EnqueueResult {
        if !job.is_valid() {
            warn!(batch_id = %job.batch_id, "rejecting structurally invalid batch job");
            self.state.lock().metrics.total_rejected += 1;
            return EnqueueResult::RejectedInvalid;
        }

        let (event, position, batch_id) = {
            let mut state = self.state.lock();

            if state.shutting_down {
                state.metrics.total_rejected += 1;
                return EnqueueResult::RejectedShutdown;
            }

            if state.active.contains_key(&job.batch_id) {
                warn!(batch_id = %job.batch_id, "duplicate enqueue for active batch; ignoring");
                return EnqueueResult::Duplicate { position: 0 };
            }
            if let Some(position) = state.queued_position(&job.batch_id) {
                warn!(
                    batch_id = %job.batch_id,
                    position, "duplicate enqueue for queued batch; ignoring"
                );
                return EnqueueResult::Duplicate { position };
            }

            if state.queue.len() >= self.config.max_queue_length {
                state.metrics.total_rejected += 1;
                counter!("queue.batches.rejected", 1);
                let event = QueueEvent::QueueFull {
                    message: "batch queue is full; retry later".to_string(),
                    queue_length: state.queue.len(),
                    max_length: self.config.max_queue_length,
                };
                drop(state);
                self.bus.publish(event);
                return EnqueueResult::RejectedFull;
            }

            let batch_id = job.batch_id.clone();
            let collection_id = job.collection_id.clone();
            let file_count = job.file_count;

            state.queue.push_back(QueuedJob {
                job,
                enqueued_at: Utc::now(),
            });
            state.metrics.total_enqueued += 1;
            counter!("queue.batches.enqueued", 1);

            let position = state.queue.len();
            let available = state.available_slots(self.config.max_concurrent_batches);
            let estimated_wait_time = state::estimate_wait_seconds(
                position,
                available,
                self.average_batch_secs(&state),
                self.config.max_concurrent_batches,
            );

            let event = QueueEvent::BatchQueued {
                batch_id: batch_id.clone(),
                collection_id,
                position,
                file_count,
                estimated_wait_time,
                total_queued: state.queue.len(),
                timestamp: Utc::now(),
            };

            if self.config.enable_queue_logging {
                info!(
                    batch_id = %batch_id,
                    position,
                    queued = state.queue.len(),
                    active = state.active.len(),
                    "batch queued"
                );
            }

            (event, position, batch_id)
        };

        self.bus.publish(event);

        // Other queued jobs keep their positions on enqueue; refresh their
        // wait estimates on the debounce cadence, skipping the newcomer.
        self.debounce.schedule(self.shared(), Some(batch_id));

        self.process_next();
        EnqueueResult::Accepted { position }
    }

    /// 0 if active, 1-based index if queued, `None` if unknown (callers that
    /// speak the wire contract render `None` as -1).
    pub fn queue_position(&self, batch_id: &str) -> Option<usize> {
        let state = self.state.lock();
        if state.active.contains_key(batch_id) {
            return Some(0);
        }
        state.queued_position(batch_id)
    }

    /// Point-in-time view of one batch, or `None` once it reaches a terminal
    /// state (terminal batches live only in metrics and file rows).
    pub fn batch_info(&self, batch_id: &str) -> Option<BatchInfo> {
        let state = self.state.lock();

        if let Some(active) = state.active.get(batch_id) {
            let now = Instant::now();
            return Some(BatchInfo::Active {
                collection_id: active.collection_id.clone(),
                file_count: active.file_count,
                started_at: active.started_wall,
                elapsed_seconds: now.duration_since(active.started_at).as_secs(),
                remaining_timeout_ms: active
                    .deadline
                    .saturating_duration_since(now)
                    .as_millis() as u64,
            });
        }

        let position = state.queued_position(batch_id)?;
        let queued = &state.queue[position - 1];
        let available = state.available_slots(self.config.max_concurrent_batches);
        Some(BatchInfo::Queued {
            collection_id: queued.job.collection_id.clone(),
            file_count: queued.job.file_count,
            position,
            estimated_wait_seconds: state::estimate_wait_seconds(
                position,
                available,
                self.average_batch_secs(&state),
                self.config.max_concurrent_batches,
            ),
        })
    }

    /// True iff a free slot exists or the queue has room.
    pub fn can_accept_new_batch(&self) -> bool {
        let state = self.state.lock();
        if state.shutting_down {
            return false;
        }
        state.active.len() < self.config.max_concurrent_batches
            || state.queue.len() < self.config.max_queue_length
    }

    pub fn queue_status(&self) -> QueueStatus {
        let state = self.state.lock();
        let now = Instant::now();
        let available = state.available_slots(self.config.max_concurrent_batches);
        let average_secs = self.average_batch_secs(&state);

        let queued: Vec<QueuedSnapshot> = state
            .queue
            .iter()
            .enumerate()
            .map(|(index, queued)| QueuedSnapshot {
                batch_id: queued.job.batch_id.clone(),
                collection_id: queued.job.collection_id.clone(),
                file_count: queued.job.file_count,
                position: index + 1,
                estimated_wait_seconds: state::estimate_wait_seconds(
                    index + 1,
                    available,
                    average_secs,
                    self.config.max_concurrent_batches,
                ),
                enqueued_at: queued.enqueued_at,
            })
            .collect();

        let active: Vec<ActiveSnapshot> = state
            .active
            .iter()
            .map(|(batch_id, entry)| ActiveSnapshot {
                batch_id: batch_id.clone(),
                collection_id: entry.collection_id.clone(),
                file_count: entry.file_count,
                started_at: entry.started_wall,
                elapsed_seconds: now.duration_since(entry.started_at).as_secs(),
                remaining_timeout_ms: entry
                    .deadline
                    .saturating_duration_since(now)
                    .as_millis() as u64,
            })
            .collect();

        let average_wait_time_seconds = if queued.is_empty() {
            0.0
        } else {
            queued
                .iter()
                .map(|snapshot| snapshot.estimated_wait_seconds as f64)
                .sum::<f64>()
                / queued.len() as f64
        };

        let uptime = self.started_at.elapsed();
        let throughput_batches_per_hour = if uptime.as_secs_f64() > 0.0 {
            state.metrics.total_processed as f64 / (uptime.as_secs_f64() / 3600.0)
        } else {
            0.0
        };

        QueueStatus {
            queued_count: state.queue.len(),
            active_count: state.active.len(),
            max_concurrent_batches: self.config.max_concurrent_batches,
            max_queue_length: self.config.max_queue_length,
            utilization_percent: state.active.len() as f64
                / self.config.max_concurrent_batches as f64
                * 100.0,
            total_enqueued: state.metrics.total_enqueued,
            total_processed: state.metrics.total_processed,
            total_failed: state.metrics.total_failed,
            total_rejected: state.metrics.total_rejected,
            average_completion_time_seconds: state
                .metrics
                .average_completion_secs()
                .unwrap_or(0.0),
            throughput_batches_per_hour,
            average_wait_time_seconds,
            uptime_seconds: uptime.as_secs(),
            queued,
            active,
        }
    }

    pub fn counters(&self) -> QueueCounters {
        let state = self.state.lock();
        QueueCounters {
            total_enqueued: state.metrics.total_enqueued,
            total_processed: state.metrics.total_processed,
            total_failed: state.metrics.total_failed,
            total_rejected: state.metrics.total_rejected,
            queued_count: state.queue.len(),
            active_count: state.active.len(),
        }
    }

    /// Zero the counters and completion samples (admin surface).
    pub fn reset_metrics(&self) {
        self.state.lock().metrics.reset();
        info!("queue metrics reset");
    }

    /// Stop accepting work and discard queued-but-not-started jobs. Active
    /// batches keep running; pair with `wait_for_active_batches`.
    pub fn prepare_shutdown(&self) {
        let discarded = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state
                .queue
                .drain(..)
                .map(|queued| (queued.job.batch_id, queued.job.collection_id))
                .collect::<Vec<_>>()
        };

        self.debounce.cancel();

        if !discarded.is_empty() {
            let ids: Vec<&str> = discarded.iter().map(|(id, _)| id.as_str()).collect();
            warn!(
                count = discarded.len(),
                ids = ?ids,
                "discarding queued batches on shutdown"
            );
            for (batch_id, collection_id) in &discarded {
                self.bus.publish(QueueEvent::BatchProcessingFailed {
                    batch_id: batch_id.clone(),
                    collection_id: Some(collection_id.clone()),
                    error: "shutdown".to_string(),
                });
            }
        }
    }

    /// Wait up to `timeout` for the active set to drain, logging the
    /// remaining count every 10 seconds. Returns true once drained.
    pub async fn wait_for_active_batches(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ticks: u64 = 0;

        loop {
            let remaining = self.state.lock().active.len();
            if remaining == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(remaining, "shutdown drain window expired with active batches");
                return false;
            }
            if ticks % 10 == 0 {
                info!(remaining, "waiting for active batches to drain");
            }
            ticks += 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    // --- internals -------------------------------------------------------

    /// Dispatch loop: promote queued jobs into free slots until one side
    /// runs dry. Emission and task spawning happen outside the lock.
    fn process_next(&self) {
        loop {
            let dispatched = {
                let mut state = self.state.lock();
                if state.shutting_down
                    || state.active.len() >= self.config.max_concurrent_batches
                    || state.queue.is_empty()
                {
                    None
                } else {
                    let queued = state.queue.pop_front().expect("queue checked non-empty");
                    let job = queued.job;
                    let batch_id = job.batch_id.clone();
                    let collection_id = job.collection_id.clone();
                    let file_count = job.file_count;

                    let started_at = Instant::now();
                    let started_wall = Utc::now();
                    let timeout = self.config.effective_timeout();
                    let deadline = started_at + timeout;

                    let timer_queue = self.shared();
                    let timer_id = batch_id.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep_until(deadline).await;
                        timer_queue.handle_timeout(&timer_id);
                    });

                    state.active.insert(
                        batch_id.clone(),
                        ActiveBatch {
                            collection_id: collection_id.clone(),
                            file_count,
                            started_at,
                            started_wall,
                            deadline,
                            timeout,
                            timer,
                            processor_abort: None,
                        },
                    );

                    let event = QueueEvent::BatchDequeued {
                        batch_id: batch_id.clone(),
                        collection_id,
                        file_count,
                        started_at: started_wall,
                        total_queued: state.queue.len(),
                        active_count: state.active.len(),
                        available_slots: state
                            .available_slots(self.config.max_concurrent_batches),
                    };

                    Some((job, event))
                }
            };

            let Some((job, event)) = dispatched else {
                break;
            };

            let batch_id = job.batch_id.clone();
            let collection_id = job.collection_id.clone();

            if self.config.enable_queue_logging {
                info!(batch_id = %batch_id, "batch dequeued into execution slot");
            }
            counter!("queue.batches.dequeued", 1);

            self.bus.publish(event);
            // Position drops are meaningful transitions; bypass the debounce.
            self.emit_position_updates_now();

            let processor_handle = tokio::spawn((job.processor)());

            {
                let mut state = self.state.lock();
                if let Some(active) = state.active.get_mut(&batch_id) {
                    active.processor_abort = Some(processor_handle.abort_handle());
                }
            }

            let watcher_queue = self.shared();
            tokio::spawn(async move {
                match processor_handle.await {
                    Ok(BatchOutcome::Completed { .. }) => {
                        watcher_queue.release(&batch_id, ReleaseCause::Completed);
                    }
                    Ok(BatchOutcome::Failed { error }) => {
                        debug!(batch_id = %batch_id, %error, "batch processor reported failure");
                        watcher_queue.release(&batch_id, ReleaseCause::Failed);
                    }
                    Err(join_error) if join_error.is_cancelled() => {
                        // Timeout aborted the processor; release already ran.
                    }
                    Err(join_error) => {
                        warn!(batch_id = %batch_id, %join_error, "batch processor panicked");
                        watcher_queue.bus.publish(QueueEvent::BatchProcessingFailed {
                            batch_id: batch_id.clone(),
                            collection_id: Some(collection_id.clone()),
                            error: "batch processor panicked".to_string(),
                        });
                        watcher_queue.release(&batch_id, ReleaseCause::Failed);
                    }
                }
            });
        }
    }

    /// Remove a batch from the active set, settle its accounting, and pull
    /// the next job in. Idempotent: the slower of (timeout, completion)
    /// finds the slot already released and returns.
    fn release(&self, batch_id: &str, cause: ReleaseCause) {
        let duration = {
            let mut state = self.state.lock();
            let Some(active) = state.active.remove(batch_id) else {
                return;
            };
            active.timer.abort();

            let duration = active.started_at.elapsed();
            state.metrics.record_duration(duration);

            match cause {
                ReleaseCause::Completed => {
                    state.metrics.total_processed += 1;
                    counter!("queue.batches.processed", 1);
                }
                ReleaseCause::Failed | ReleaseCause::TimedOut => {
                    if state.metrics.counted_failed.insert(batch_id.to_string()) {
                        state.metrics.total_failed += 1;
                        counter!("queue.batches.failed", 1);
                    }
                }
            }

            duration
        };

        if self.config.enable_queue_logging {
            info!(
                batch_id,
                duration_ms = duration.as_millis() as u64,
                "batch released from execution slot"
            );
        }

        self.process_next();

        let has_queued = !self.state.lock().queue.is_empty();
        if has_queued {
            self.debounce.schedule(self.shared(), None);
        }
    }

    /// Timer body: if the batch is still active when the deadline passes,
    /// count the failure, emit the timeout pair, cancel the processor, and
    /// free the slot.
    fn handle_timeout(&self, batch_id: &str) {
        let (abort, timeout_ms, collection_id) = {
            let mut state = self.state.lock();
            let Some(active) = state.active.get_mut(batch_id) else {
                return;
            };
            let abort = active.processor_abort.take();
            let timeout_ms = active.timeout.as_millis() as u64;
            let collection_id = active.collection_id.clone();

            if state.metrics.counted_failed.insert(batch_id.to_string()) {
                state.metrics.total_failed += 1;
                counter!("queue.batches.timed_out", 1);
            }

            (abort, timeout_ms, collection_id)
        };

        warn!(batch_id, timeout_ms, "batch exceeded its processing timeout");

        self.bus.publish(QueueEvent::BatchTimeout {
            batch_id: batch_id.to_string(),
            collection_id: Some(collection_id.clone()),
            timeout_ms,
        });
        self.bus.publish(QueueEvent::BatchProcessingFailed {
            batch_id: batch_id.to_string(),
            collection_id: Some(collection_id),
            error: "batch timed out".to_string(),
        });

        if let Some(abort) = abort {
            abort.abort();
        }

        self.release(batch_id, ReleaseCause::TimedOut);
    }

    /// Debounce fire path: recompute and emit positions for everything still
    /// queued, minus the batch that just received BATCH_QUEUED.
    pub(crate) fn flush_position_updates(&self) {
        let skip = self.debounce.consume();
        self.emit_position_updates(skip.as_deref());
    }

    fn emit_position_updates_now(&self) {
        self.debounce.cancel();
        self.emit_position_updates(None);
    }

    fn emit_position_updates(&self, skip: Option<&str>) {
        let updates = {
            let state = self.state.lock();
            let available = state.available_slots(self.config.max_concurrent_batches);
            let average_secs = self.average_batch_secs(&state);
            let total_queued = state.queue.len();

            state
                .queue
                .iter()
                .enumerate()
                .filter(|(_, queued)| Some(queued.job.batch_id.as_str()) != skip)
                .map(|(index, queued)| QueueEvent::BatchQueuePositionUpdated {
                    batch_id: queued.job.batch_id.clone(),
                    collection_id: queued.job.collection_id.clone(),
                    position: index + 1,
                    estimated_wait_time: state::estimate_wait_seconds(
                        index + 1,
                        available,
                        average_secs,
                        self.config.max_concurrent_batches,
                    ),
                    total_queued,
                })
                .collect::<Vec<_>>()
        };

        for event in updates {
            self.bus.publish(event);
        }
    }

    fn average_batch_secs(&self, state: &QueueState) -> u64 {
        state
            .metrics
            .average_completion_secs()
            .map(|secs| secs.round() as u64)
            .unwrap_or(self.config.average_batch_seconds)
    }
}

impl std::fmt::Debug for BatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BatchQueue")
            .field("queued", &state.queue.len())
            .field("active", &state.active.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf2csv_core::BatchCounts;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn config(max_concurrent: usize, max_queue: usize) -> QueueConfig {
        QueueConfig {
            max_concurrent_batches: max_concurrent,
            max_queue_length: max_queue,
            ..QueueConfig::default()
        }
    }

    /// A job parked until its gate drops; completion is never sent here.
    fn gated(batch_id: &str) -> (BatchJob, oneshot::Sender<BatchOutcome>) {
        let (tx, rx) = oneshot::channel();
        let job = BatchJob::new(batch_id, "c1", vec![Uuid::new_v4()], move || async move {
            rx.await.unwrap_or(BatchOutcome::Failed {
                error: "gate dropped".to_string(),
            })
        });
        (job, tx)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn can_accept_judges_slot_or_queue_room() {
        let queue = BatchQueue::new(config(1, 10), EventBus::new());
        assert!(queue.can_accept_new_batch());

        let (job, _gate) = gated("b1");
        queue.enqueue(job);
        settle().await;

        // Slot taken, queue empty: still acceptable.
        assert!(queue.can_accept_new_batch());
    }

    #[tokio::test(start_paused = true)]
    async fn free_slot_does_not_override_full_queue_in_accept_check() {
        // Two slots, but a minimal queue cap. With both slots free and the
        // queue full, the check still reports room via the free slots even
        // though enqueue itself judges the queue bound alone.
        let queue = BatchQueue::new(config(2, 10), EventBus::new());
        let mut gates = Vec::new();
        for n in 0..12 {
            let (job, gate) = gated(&format!("b{}", n));
            queue.enqueue(job);
            gates.push(gate);
        }
        settle().await;

        // 2 active, 10 queued: no slot, no queue room.
        assert_eq!(queue.counters().active_count, 2);
        assert_eq!(queue.counters().queued_count, 10);
        assert!(!queue.can_accept_new_batch());

        let (overflow, _overflow_gate) = gated("b-overflow");
        assert_eq!(queue.enqueue(overflow), EnqueueResult::RejectedFull);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_info_reflects_phase() {
        let queue = BatchQueue::new(config(1, 10), EventBus::new());

        let (active, _active_gate) = gated("b1");
        let (parked, _parked_gate) = gated("b2");
        queue.enqueue(active);
        settle().await;
        queue.enqueue(parked);
        settle().await;

        match queue.batch_info("b1") {
            Some(BatchInfo::Active {
                remaining_timeout_ms,
                ..
            }) => {
                assert!(remaining_timeout_ms > 0);
                assert!(remaining_timeout_ms <= queue.config().effective_timeout().as_millis() as u64);
            }
            other => panic!("expected active info, got {:?}", other),
        }

        match queue.batch_info("b2") {
            Some(BatchInfo::Queued {
                position,
                estimated_wait_seconds,
                ..
            }) => {
                assert_eq!(position, 1);
                // Single slot occupied: the seed average applies in full.
                assert_eq!(
                    estimated_wait_seconds,
                    queue.config().average_batch_seconds
                );
            }
            other => panic!("expected queued info, got {:?}", other),
        }

        assert!(queue.batch_info("b3").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn status_serializes_camel_case() {
        let queue = BatchQueue::new(config(2, 10), EventBus::new());
        let (job, _gate) = gated("b1");
        queue.enqueue(job);
        settle().await;

        let status = queue.queue_status();
        assert_eq!(status.active_count, 1);
        assert_eq!(status.utilization_percent, 50.0);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["maxConcurrentBatches"], 2);
        assert_eq!(json["totalEnqueued"], 1);
        assert!(json["averageWaitTimeSeconds"].is_number());
        assert_eq!(json["active"][0]["batchId"], "b1");
    }

    #[tokio::test(start_paused = true)]
    async fn average_wait_uses_samples_once_available() {
        let queue = BatchQueue::new(config(1, 10), EventBus::new());

        let (first, gate) = gated("b1");
        queue.enqueue(first);
        settle().await;

        // Complete after 40s of (paused) wall time to seed the ring.
        tokio::time::sleep(Duration::from_secs(40)).await;
        gate.send(BatchOutcome::Completed {
            counts: BatchCounts {
                total: 1,
                completed: 1,
                failed: 0,
            },
        })
        .unwrap();
        settle().await;

        let status = queue.queue_status();
        assert_eq!(status.total_processed, 1);
        assert!(status.average_completion_time_seconds >= 40.0);

        // The next queued batch's estimate now uses the measured sample, not
        // the configured seed.
        let (active, _active_gate) = gated("b2");
        let (parked, _parked_gate) = gated("b3");
        queue.enqueue(active);
        settle().await;
        queue.enqueue(parked);
        settle().await;

        match queue.batch_info("b3") {
            Some(BatchInfo::Queued {
                estimated_wait_seconds,
                ..
            }) => assert_eq!(estimated_wait_seconds, 40),
            other => panic!("expected queued info, got {:?}", other),
        }
    }
}
