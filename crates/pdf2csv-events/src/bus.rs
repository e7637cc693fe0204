// In-process publish/subscribe for lifecycle events
//
// Thin wrapper over a tokio broadcast channel. Delivery is best-effort
// ordered per publisher; a receiver that falls behind observes a lag error
// and continues from the oldest retained event.

use metrics::counter;
use pdf2csv_core::QueueEvent;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to the process-wide event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Never blocks and never fails: with no subscribers the event is
    /// dropped, which is fine for a fire-and-forget lifecycle stream.
    pub fn publish(&self, event: QueueEvent) {
        counter!("queue.events.published", 1, "type" => event.event_type());
        trace!(event_type = event.event_type(), batch_id = ?event.batch_id(), "bus publish");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
