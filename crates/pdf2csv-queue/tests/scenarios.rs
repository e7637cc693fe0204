// End-to-end queue manager scenarios
//
// Drives the manager with controllable processors: instant successes, gated
// jobs completed on demand through a oneshot, and stuck jobs that never
// resolve. Time is paused, so timeout tests advance the clock instead of
// waiting.

use chrono::Utc;
use pdf2csv_config::QueueConfig;
use pdf2csv_core::{BatchCounts, QueueEvent};
use pdf2csv_events::EventBus;
use pdf2csv_queue::{BatchJob, BatchOutcome, BatchQueue, EnqueueResult};
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tokio::time::Duration;
use uuid::Uuid;

fn test_config(max_concurrent: usize, max_queue: usize, timeout_ms: u64) -> QueueConfig {
    QueueConfig {
        max_concurrent_batches: max_concurrent,
        max_queue_length: max_queue,
        batch_queue_timeout_ms: timeout_ms,
        batch_queue_timeout_multiplier: 1.0,
        average_batch_seconds: 150,
        enable_queue_logging: false,
        enable_graceful_shutdown: true,
        graceful_shutdown_timeout_ms: 60_000,
    }
}

fn file_ids(count: usize) -> Vec<Uuid> {
    (0..count).map(|_| Uuid::new_v4()).collect()
}

/// A processor that emits the runner's event sequence and completes.
fn successful_job(bus: EventBus, batch_id: &str, collection_id: &str, files: usize) -> BatchJob {
    let id = batch_id.to_string();
    let collection = collection_id.to_string();
    BatchJob::new(batch_id, collection_id, file_ids(files), move || async move {
        let counts = BatchCounts {
            total: files,
            completed: files,
            failed: 0,
        };
        bus.publish(QueueEvent::BatchProcessingStarted {
            batch_id: id.clone(),
            collection_id: Some(collection.clone()),
            file_count: files,
            started_at: Utc::now(),
            message: None,
        });
        bus.publish(QueueEvent::BatchProcessingProgress {
            batch_id: id.clone(),
            collection_id: Some(collection.clone()),
            progress: 50,
            status: "ocr_complete".to_string(),
            message: None,
        });
        bus.publish(QueueEvent::BatchProcessingProgress {
            batch_id: id.clone(),
            collection_id: Some(collection.clone()),
            progress: 100,
            status: "database_insert_complete".to_string(),
            message: None,
        });
        bus.publish(QueueEvent::BatchProcessingCompleted {
            batch_id: id,
            collection_id: Some(collection),
            file_count: files,
            counts,
        });
        BatchOutcome::Completed { counts }
    })
}

/// A processor that parks until the test sends its outcome.
fn gated_job(
    batch_id: &str,
    collection_id: &str,
    files: usize,
) -> (BatchJob, oneshot::Sender<BatchOutcome>) {
    let (tx, rx) = oneshot::channel();
    let job = BatchJob::new(batch_id, collection_id, file_ids(files), move || async move {
        rx.await.unwrap_or(BatchOutcome::Failed {
            error: "gate dropped".to_string(),
        })
    });
    (job, tx)
}

/// A processor that never resolves; only the timeout can reclaim its slot.
fn stuck_job(batch_id: &str, collection_id: &str, files: usize) -> BatchJob {
    BatchJob::new(batch_id, collection_id, file_ids(files), || async {
        std::future::pending::<()>().await;
        unreachable!()
    })
}

/// Let spawned dispatch/watcher tasks run to quiescence.
async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn events_for<'a>(events: &'a [QueueEvent], batch_id: &str) -> Vec<&'a QueueEvent> {
    events
        .iter()
        .filter(|event| event.batch_id() == Some(batch_id))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn accept_and_run_single_batch() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = BatchQueue::new(test_config(2, 10, 1_800_000), bus.clone());

    let result = queue.enqueue(successful_job(bus.clone(), "b1", "c1", 3));
    assert_eq!(result, EnqueueResult::Accepted { position: 1 });

    settle().await;

    let events = drain(&mut rx);
    let kinds: Vec<&str> = events_for(&events, "b1")
        .iter()
        .map(|event| event.event_type())
        .collect();

    assert_eq!(kinds[0], "BATCH_QUEUED");
    assert_eq!(kinds[1], "BATCH_DEQUEUED");
    assert_eq!(kinds[2], "BATCH_PROCESSING_STARTED");
    assert!(kinds.contains(&"BATCH_PROCESSING_PROGRESS"));
    assert_eq!(*kinds.last().unwrap(), "BATCH_PROCESSING_COMPLETED");

    match &events[0] {
        QueueEvent::BatchQueued {
            position,
            file_count,
            ..
        } => {
            assert_eq!(*position, 1);
            assert_eq!(*file_count, 3);
        }
        other => panic!("expected BATCH_QUEUED first, got {:?}", other),
    }

    let completed = events
        .iter()
        .find_map(|event| match event {
            QueueEvent::BatchProcessingCompleted { counts, .. } => Some(*counts),
            _ => None,
        })
        .expect("completion event");
    assert_eq!(
        completed,
        BatchCounts {
            total: 3,
            completed: 3,
            failed: 0
        }
    );

    let counters = queue.counters();
    assert_eq!(counters.total_processed, 1);
    assert_eq!(counters.total_failed, 0);
    assert_eq!(counters.active_count, 0);
    assert_eq!(counters.queued_count, 0);
}

#[tokio::test(start_paused = true)]
async fn park_then_promote_fifo() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = BatchQueue::new(test_config(1, 10, 1_800_000), bus.clone());

    let (job1, gate1) = gated_job("b1", "c1", 1);
    let (job2, _gate2) = gated_job("b2", "c1", 1);
    let (job3, _gate3) = gated_job("b3", "c1", 1);

    queue.enqueue(job1);
    settle().await;
    queue.enqueue(job2);
    queue.enqueue(job3);
    settle().await;

    let events = drain(&mut rx);

    // B1 went straight through the queue into the slot.
    assert!(events_for(&events, "b1")
        .iter()
        .any(|event| event.event_type() == "BATCH_DEQUEUED"));

    // B2 and B3 parked at positions 1 and 2.
    let queued_positions: Vec<(String, usize)> = events
        .iter()
        .filter_map(|event| match event {
            QueueEvent::BatchQueued {
                batch_id, position, ..
            } if batch_id != "b1" => Some((batch_id.clone(), *position)),
            _ => None,
        })
        .collect();
    assert_eq!(
        queued_positions,
        vec![("b2".to_string(), 1), ("b3".to_string(), 2)]
    );

    assert_eq!(queue.queue_position("b1"), Some(0));
    assert_eq!(queue.queue_position("b2"), Some(1));
    assert_eq!(queue.queue_position("b3"), Some(2));
    assert_eq!(queue.queue_position("b9"), None);

    // Completing B1 promotes B2 and shifts B3 to position 1.
    gate1
        .send(BatchOutcome::Completed {
            counts: BatchCounts {
                total: 1,
                completed: 1,
                failed: 0,
            },
        })
        .unwrap();
    settle().await;

    let events = drain(&mut rx);
    assert!(events_for(&events, "b2")
        .iter()
        .any(|event| event.event_type() == "BATCH_DEQUEUED"));
    assert!(events.iter().any(|event| matches!(
        event,
        QueueEvent::BatchQueuePositionUpdated {
            batch_id,
            position: 1,
            ..
        } if batch_id == "b3"
    )));

    assert_eq!(queue.queue_position("b2"), Some(0));
    assert_eq!(queue.queue_position("b3"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn full_queue_rejects_with_broadcast() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = BatchQueue::new(test_config(1, 2, 1_800_000), bus.clone());

    let (active, _gate) = gated_job("b0", "c1", 1);
    queue.enqueue(active);
    settle().await;

    let (job1, _g1) = gated_job("b1", "c1", 1);
    let (job2, _g2) = gated_job("b2", "c1", 1);
    assert_eq!(queue.enqueue(job1), EnqueueResult::Accepted { position: 1 });
    assert_eq!(queue.enqueue(job2), EnqueueResult::Accepted { position: 2 });

    let (job3, _g3) = gated_job("b3", "c1", 1);
    assert_eq!(queue.enqueue(job3), EnqueueResult::RejectedFull);
    settle().await;

    let events = drain(&mut rx);
    let full = events
        .iter()
        .find(|event| event.event_type() == "QUEUE_FULL")
        .expect("QUEUE_FULL broadcast");
    match full {
        QueueEvent::QueueFull {
            queue_length,
            max_length,
            ..
        } => {
            assert_eq!(*queue_length, 2);
            assert_eq!(*max_length, 2);
        }
        _ => unreachable!(),
    }

    let status = queue.queue_status();
    assert_eq!(status.queued_count, 2);
    assert_eq!(status.total_rejected, 1);
    assert!(queue.queue_position("b3").is_none());
}

#[tokio::test(start_paused = true)]
async fn timeout_frees_slot_and_counts_once() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = BatchQueue::new(test_config(1, 10, 2_000), bus.clone());

    queue.enqueue(stuck_job("b1", "c1", 2));
    settle().await;
    drain(&mut rx);

    // Cross the deadline.
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    settle().await;

    let events = drain(&mut rx);
    let b1_kinds: Vec<&str> = events_for(&events, "b1")
        .iter()
        .map(|event| event.event_type())
        .collect();
    assert_eq!(b1_kinds, vec!["BATCH_TIMEOUT", "BATCH_PROCESSING_FAILED"]);

    let timeout_ms = events
        .iter()
        .find_map(|event| match event {
            QueueEvent::BatchTimeout { timeout_ms, .. } => Some(*timeout_ms),
            _ => None,
        })
        .unwrap();
    assert_eq!(timeout_ms, 2_000);

    let counters = queue.counters();
    assert_eq!(counters.total_failed, 1);
    assert_eq!(counters.total_processed, 0);
    assert_eq!(counters.active_count, 0);

    // The freed slot dispatches the next enqueue immediately.
    queue.enqueue(successful_job(bus.clone(), "b2", "c1", 1));
    settle().await;

    let events = drain(&mut rx);
    let b2_kinds: Vec<&str> = events_for(&events, "b2")
        .iter()
        .map(|event| event.event_type())
        .collect();
    assert!(b2_kinds.contains(&"BATCH_DEQUEUED"));
    assert!(b2_kinds.contains(&"BATCH_PROCESSING_COMPLETED"));

    let counters = queue.counters();
    assert_eq!(counters.total_failed, 1);
    assert_eq!(counters.total_processed, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_enqueue_is_a_noop() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = BatchQueue::new(test_config(1, 10, 1_800_000), bus.clone());

    let (job, _gate) = gated_job("b1", "c1", 1);
    queue.enqueue(job);
    settle().await;

    // Duplicate of an active batch reports position 0.
    let (dup, _dup_gate) = gated_job("b1", "c1", 1);
    assert_eq!(queue.enqueue(dup), EnqueueResult::Duplicate { position: 0 });

    // Duplicate of a queued batch reports its current position.
    let (queued, _queued_gate) = gated_job("b2", "c1", 1);
    queue.enqueue(queued);
    let (dup2, _dup2_gate) = gated_job("b2", "c1", 1);
    assert_eq!(queue.enqueue(dup2), EnqueueResult::Duplicate { position: 1 });

    settle().await;
    let events = drain(&mut rx);
    let b1_queued = events
        .iter()
        .filter(|event| {
            event.event_type() == "BATCH_QUEUED" && event.batch_id() == Some("b1")
        })
        .count();
    assert_eq!(b1_queued, 1, "duplicate must not re-emit BATCH_QUEUED");

    let counters = queue.counters();
    assert_eq!(counters.total_enqueued, 2);
}

#[tokio::test(start_paused = true)]
async fn invalid_job_rejected() {
    let bus = EventBus::new();
    let queue = BatchQueue::new(test_config(1, 10, 1_800_000), bus);

    let no_files = BatchJob::new("b1", "c1", Vec::new(), || async {
        BatchOutcome::Failed {
            error: "unused".to_string(),
        }
    });
    assert_eq!(queue.enqueue(no_files), EnqueueResult::RejectedInvalid);
    assert_eq!(queue.counters().total_rejected, 1);
    assert_eq!(queue.counters().total_enqueued, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_queued_and_drains_active() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = BatchQueue::new(test_config(1, 10, 1_800_000), bus.clone());

    let (active, gate) = gated_job("b1", "c1", 1);
    queue.enqueue(active);
    settle().await;
    let (parked, _parked_gate) = gated_job("b2", "c1", 1);
    queue.enqueue(parked);
    settle().await;
    drain(&mut rx);

    queue.prepare_shutdown();

    // Parked work is discarded with a shutdown failure frame.
    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        QueueEvent::BatchProcessingFailed { batch_id, error, .. }
            if batch_id == "b2" && error == "shutdown"
    )));
    assert_eq!(queue.queue_position("b2"), None);

    // New work is refused outright.
    let (late, _late_gate) = gated_job("b3", "c1", 1);
    assert_eq!(queue.enqueue(late), EnqueueResult::RejectedShutdown);

    // The active batch drains within the window.
    gate.send(BatchOutcome::Completed {
        counts: BatchCounts {
            total: 1,
            completed: 1,
            failed: 0,
        },
    })
    .unwrap();

    assert!(
        queue
            .wait_for_active_batches(Duration::from_secs(30))
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn slot_bound_holds_under_load() {
    let bus = EventBus::new();
    let queue = BatchQueue::new(test_config(2, 10, 1_800_000), bus.clone());

    let mut gates = Vec::new();
    for n in 0..5 {
        let (job, gate) = gated_job(&format!("b{}", n), "c1", 1);
        queue.enqueue(job);
        gates.push(gate);
    }
    settle().await;

    let status = queue.queue_status();
    assert_eq!(status.active_count, 2);
    assert_eq!(status.queued_count, 3);
    assert_eq!(status.utilization_percent, 100.0);

    // Each release pulls exactly one job forward; the bound never breaks.
    for gate in gates.drain(..2) {
        let _ = gate.send(BatchOutcome::Completed {
            counts: BatchCounts {
                total: 1,
                completed: 1,
                failed: 0,
            },
        });
        settle().await;
        assert!(queue.queue_status().active_count <= 2);
    }

    let status = queue.queue_status();
    assert_eq!(status.active_count, 2);
    assert_eq!(status.queued_count, 1);
}

#[tokio::test(start_paused = true)]
async fn position_updates_debounce_and_skip_newcomer() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = BatchQueue::new(test_config(1, 10, 1_800_000), bus.clone());

    let (active, _gate) = gated_job("b1", "c1", 1);
    queue.enqueue(active);
    settle().await;
    let (parked, _parked_gate) = gated_job("b2", "c1", 1);
    queue.enqueue(parked);
    settle().await;
    drain(&mut rx);

    // A fresh enqueue schedules a debounced sweep that skips the newcomer.
    let (newcomer, _newcomer_gate) = gated_job("b3", "c1", 1);
    queue.enqueue(newcomer);
    settle().await;

    let immediate = drain(&mut rx);
    assert!(
        !immediate
            .iter()
            .any(|event| event.event_type() == "BATCH_QUEUE_POSITION_UPDATED"),
        "position sweep must wait for the debounce window"
    );

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    settle().await;

    let swept = drain(&mut rx);
    let updated: Vec<&str> = swept
        .iter()
        .filter(|event| event.event_type() == "BATCH_QUEUE_POSITION_UPDATED")
        .filter_map(|event| event.batch_id())
        .collect();
    assert!(updated.contains(&"b2"));
    assert!(!updated.contains(&"b3"), "newcomer already got BATCH_QUEUED");
}

#[tokio::test(start_paused = true)]
async fn metrics_conservation_across_mixed_outcomes() {
    let bus = EventBus::new();
    let queue = BatchQueue::new(test_config(2, 3, 2_000), bus.clone());

    queue.enqueue(successful_job(bus.clone(), "ok1", "c1", 1));
    queue.enqueue(successful_job(bus.clone(), "ok2", "c1", 1));
    settle().await;

    queue.enqueue(stuck_job("stuck", "c1", 1));
    settle().await;
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    settle().await;

    let (parked, _gate) = gated_job("parked", "c1", 1);
    queue.enqueue(parked);
    settle().await;

    let counters = queue.counters();
    assert_eq!(counters.total_enqueued, 4);
    assert_eq!(
        counters.total_processed
            + counters.total_failed
            + counters.active_count as u64
            + counters.queued_count as u64,
        counters.total_enqueued
    );
}

#[tokio::test(start_paused = true)]
async fn reset_metrics_clears_counters() {
    let bus = EventBus::new();
    let queue = BatchQueue::new(test_config(1, 10, 1_800_000), bus.clone());

    queue.enqueue(successful_job(bus.clone(), "b1", "c1", 1));
    settle().await;
    assert_eq!(queue.counters().total_processed, 1);

    queue.reset_metrics();
    let counters = queue.counters();
    assert_eq!(counters.total_enqueued, 0);
    assert_eq!(counters.total_processed, 0);
    assert_eq!(queue.queue_status().average_completion_time_seconds, 0.0);
}
