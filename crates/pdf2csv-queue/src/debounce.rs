// Position-update debouncer
//
// Bursts of queue churn coalesce into one BATCH_QUEUE_POSITION_UPDATED sweep
// per window; positions are recomputed at fire time so the emitted values are
// current. Dequeue bypasses this entirely (the caller cancels and emits
// immediately).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::BatchQueue;

pub(crate) const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1_000);

#[derive(Default)]
struct DebounceInner {
    pending: Option<JoinHandle<()>>,
    /// Batch that just received BATCH_QUEUED and is skipped at the next fire.
    skip: Option<String>,
}

#[derive(Default)]
pub(crate) struct Debouncer {
    inner: Mutex<DebounceInner>,
}

impl Debouncer {
    /// Arrange a coalesced sweep; an already-pending sweep absorbs the call.
    pub fn schedule(&self, queue: Arc<BatchQueue>, skip: Option<String>) {
        let mut inner = self.inner.lock();
        if let Some(skip) = skip {
            inner.skip = Some(skip);
        }

        if let Some(pending) = &inner.pending {
            if !pending.is_finished() {
                return;
            }
        }

        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            queue.flush_position_updates();
        }));
    }

    /// Mark the pending sweep consumed and hand back the skip id.
    pub fn consume(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.pending = None;
        inner.skip.take()
    }

    /// Drop any pending sweep without emitting.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }
        inner.skip = None;
    }
}
