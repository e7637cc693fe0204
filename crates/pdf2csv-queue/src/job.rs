// Batch job types
//
// A job owns the processor closure the manager invokes when a slot opens.
// The processor reports its result as a value, never an error: the runner
// catches everything and maps failures into the outcome, so the manager's
// failure accounting stays in one place.

use std::future::Future;
use std::pin::Pin;

use pdf2csv_core::BatchCounts;
use uuid::Uuid;

pub type ProcessorFuture = Pin<Box<dyn Future<Output = BatchOutcome> + Send>>;
pub type ProcessorFn = Box<dyn FnOnce() -> ProcessorFuture + Send>;

/// Terminal result reported by a batch processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed { counts: BatchCounts },
    Failed { error: String },
}

/// One unit of work handed to the queue manager.
pub struct BatchJob {
    pub batch_id: String,
    pub collection_id: String,
    pub file_count: usize,
    pub file_meta_ids: Vec<Uuid>,
    pub processor: ProcessorFn,
}

impl BatchJob {
    pub fn new<F, Fut>(
        batch_id: impl Into<String>,
        collection_id: impl Into<String>,
        file_meta_ids: Vec<Uuid>,
        processor: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = BatchOutcome> + Send + 'static,
    {
        Self {
            batch_id: batch_id.into(),
            collection_id: collection_id.into(),
            file_count: file_meta_ids.len(),
            file_meta_ids,
            processor: Box::new(move || Box::pin(processor())),
        }
    }

    /// Structural validity; an invalid job is rejected at enqueue.
    pub fn is_valid(&self) -> bool {
        !self.batch_id.is_empty() && !self.collection_id.is_empty() && self.file_count > 0
    }
}

impl std::fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob")
            .field("batch_id", &self.batch_id)
            .field("collection_id", &self.collection_id)
            .field("file_count", &self.file_count)
            .finish()
    }
}
