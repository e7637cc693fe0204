// pdf2csv-runner - Batch execution
//
// Consumes one batch: per file, read the raw payload, call the OCR
// collaborator (with a retry budget), validate the extracted entities, and
// persist records + terminal row status atomically. Files run with bounded
// concurrency; progress percentages are serialized through one lock so the
// emitted sequence never decreases. The runner catches every failure and
// reports it as an outcome value, so the queue manager sees a normal return
// on all paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use metrics::counter;
use parking_lot::Mutex;
use pdf2csv_config::OcrConfig;
use pdf2csv_core::{BatchCounts, FileMetaSummary, ProcessingStatus, QueueEvent};
use pdf2csv_events::EventBus;
use pdf2csv_queue::BatchOutcome;
use pdf2csv_store::{BlobStore, MetadataStore};
use rand::Rng;
use tokio::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

mod error;
mod ocr;
pub mod validate;

pub use error::OcrError;
pub use ocr::{HttpOcrClient, OcrClient};

const STAGES_PER_FILE: usize = 2;

/// One file inside a batch; the payload lives in blob storage.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub meta_id: Uuid,
    pub filename: String,
    pub raw_path: String,
}

/// Everything the runner needs to execute one batch.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub batch_id: String,
    pub collection_id: String,
    pub files: Vec<FileTask>,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub max_file_concurrency: usize,
}

impl RunnerSettings {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_file_concurrency: config.max_file_concurrency,
        }
    }
}

struct ProgressState {
    stages_done: usize,
    last_pct: u8,
}

/// Per-batch shared context for the concurrent file tasks.
struct BatchCtx {
    batch_id: String,
    collection_id: String,
    total_stages: usize,
    progress: Mutex<ProgressState>,
    completed: AtomicUsize,
    failed: AtomicUsize,
    /// Set when the collaborator looks dead and nothing has succeeded yet;
    /// remaining files fail fast instead of burning their retry budgets.
    unrecoverable: AtomicBool,
}

struct FileFailure {
    message: String,
    /// Transport-level collaborator failure after the retry budget.
    transport: bool,
    stages_consumed: usize,
}

pub struct BatchRunner {
    ocr: Arc<dyn OcrClient>,
    store: Arc<dyn MetadataStore>,
    blobs: Arc<BlobStore>,
    bus: EventBus,
    settings: RunnerSettings,
}

impl BatchRunner {
    pub fn new(
        ocr: Arc<dyn OcrClient>,
        store: Arc<dyn MetadataStore>,
        blobs: Arc<BlobStore>,
        bus: EventBus,
        settings: RunnerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            ocr,
            store,
            blobs,
            bus,
            settings,
        })
    }

    /// Execute one batch to its terminal event. The batch completes if at
    /// least one file succeeded; it fails only when every file failed or the
    /// collaborator proved unreachable.
    pub async fn process_batch(&self, spec: BatchSpec) -> BatchOutcome {
        let total = spec.files.len();
        let ctx = BatchCtx {
            batch_id: spec.batch_id.clone(),
            collection_id: spec.collection_id.clone(),
            total_stages: total * STAGES_PER_FILE,
            progress: Mutex::new(ProgressState {
                stages_done: 0,
                last_pct: 0,
            }),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            unrecoverable: AtomicBool::new(false),
        };

        self.bus.publish(QueueEvent::BatchProcessingStarted {
            batch_id: spec.batch_id.clone(),
            collection_id: Some(spec.collection_id.clone()),
            file_count: total,
            started_at: Utc::now(),
            message: None,
        });
        counter!("runner.batches.started", 1);

        let ctx_ref = &ctx;
        futures::stream::iter(spec.files)
            .for_each_concurrent(self.settings.max_file_concurrency, |file| async move {
                self.run_file(ctx_ref, &file).await;
            })
            .await;

        let completed = ctx.completed.load(Ordering::SeqCst);
        let failed = ctx.failed.load(Ordering::SeqCst);
        let counts = BatchCounts {
            total,
            completed,
            failed,
        };

        if completed > 0 || total == 0 {
            self.bus.publish(QueueEvent::BatchProcessingCompleted {
                batch_id: spec.batch_id,
                collection_id: Some(spec.collection_id),
                file_count: total,
                counts,
            });
            counter!("runner.batches.completed", 1);
            BatchOutcome::Completed { counts }
        } else {
            let error = if ctx.unrecoverable.load(Ordering::SeqCst) {
                "ocr collaborator unreachable".to_string()
            } else {
                "all files failed".to_string()
            };
            self.bus.publish(QueueEvent::BatchProcessingFailed {
                batch_id: spec.batch_id,
                collection_id: Some(spec.collection_id),
                error: error.clone(),
            });
            counter!("runner.batches.failed", 1);
            BatchOutcome::Failed { error }
        }
    }

    async fn run_file(&self, ctx: &BatchCtx, file: &FileTask) {
        if ctx.unrecoverable.load(Ordering::SeqCst) {
            self.fail_file(
                ctx,
                file,
                FileFailure {
                    message: "ocr collaborator unreachable".to_string(),
                    transport: true,
                    stages_consumed: 0,
                },
            )
            .await;
            return;
        }

        if let Err(err) = self
            .store
            .update_status(file.meta_id, ProcessingStatus::Processing)
            .await
        {
            warn!(file_id = %file.meta_id, %err, "failed to mark row processing");
        }

        match self.process_file(ctx, file).await {
            Ok(()) => {
                ctx.completed.fetch_add(1, Ordering::SeqCst);
                counter!("runner.files.completed", 1);
            }
            Err(failure) => {
                if failure.transport && ctx.completed.load(Ordering::SeqCst) == 0 {
                    ctx.unrecoverable.store(true, Ordering::SeqCst);
                }
                self.fail_file(ctx, file, failure).await;
            }
        }
    }

    /// The per-file pipeline: read payload, OCR, validate, persist.
    async fn process_file(&self, ctx: &BatchCtx, file: &FileTask) -> Result<(), FileFailure> {
        let mut stages_consumed = 0;

        let payload = self.blobs.read(&file.raw_path).await.map_err(|err| FileFailure {
            message: format!("failed to read stored payload: {}", err),
            transport: false,
            stages_consumed,
        })?;

        let doc = self
            .extract_with_retry(&file.filename, &payload)
            .await
            .map_err(|err| FileFailure {
                message: err.to_string(),
                transport: err.is_retryable(),
                stages_consumed,
            })?;

        stages_consumed += 1;
        self.bump_stage(ctx, "ocr_complete", Some(&file.filename));

        let report = validate::validate(file.meta_id, &doc);
        debug!(
            file_id = %file.meta_id,
            accepted = report.accepted.len(),
            rejected = report.rejected,
            "entities validated"
        );

        let artifact = serde_json::to_vec(&report.accepted).map_err(|err| FileFailure {
            message: format!("failed to encode extracted records: {}", err),
            transport: false,
            stages_consumed,
        })?;

        let processed_path = self
            .blobs
            .write_processed(&ctx.collection_id, file.meta_id, "entities.json", artifact)
            .await
            .map_err(|err| FileFailure {
                message: format!("failed to store processed artifact: {}", err),
                transport: false,
                stages_consumed,
            })?;

        self.store
            .set_storage_paths(file.meta_id, None, Some(&processed_path))
            .await
            .map_err(|err| FileFailure {
                message: format!("failed to record storage path: {}", err),
                transport: false,
                stages_consumed,
            })?;

        self.store
            .insert_records(file.meta_id, &report.accepted, ProcessingStatus::Completed)
            .await
            .map_err(|err| FileFailure {
                message: format!("failed to persist records: {}", err),
                transport: false,
                stages_consumed,
            })?;

        self.bump_stage(ctx, "database_insert_complete", Some(&file.filename));

        self.bus.publish(QueueEvent::FilesProcessed {
            file_metadata: FileMetaSummary {
                id: file.meta_id,
                processing_status: ProcessingStatus::Completed,
                collection_id: ctx.collection_id.clone(),
            },
        });

        Ok(())
    }

    async fn fail_file(&self, ctx: &BatchCtx, file: &FileTask, failure: FileFailure) {
        warn!(
            file_id = %file.meta_id,
            filename = %file.filename,
            error = %failure.message,
            "file failed"
        );
        counter!("runner.files.failed", 1);

        if let Err(err) = self
            .store
            .update_status(file.meta_id, ProcessingStatus::Failed)
            .await
        {
            warn!(file_id = %file.meta_id, %err, "failed to mark row failed");
        }

        // Consume the file's remaining stages so overall progress still
        // reaches 100 on terminal.
        let remaining = STAGES_PER_FILE - failure.stages_consumed;
        for _ in 0..remaining {
            self.bump_stage(ctx, "file_failed", Some(&file.filename));
        }

        ctx.failed.fetch_add(1, Ordering::SeqCst);

        self.bus.publish(QueueEvent::FilesProcessed {
            file_metadata: FileMetaSummary {
                id: file.meta_id,
                processing_status: ProcessingStatus::Failed,
                collection_id: ctx.collection_id.clone(),
            },
        });
    }

    /// Retry budget: `max_attempts` tries, exponential backoff from the base
    /// delay with full jitter. Non-retryable errors short-circuit.
    async fn extract_with_retry(
        &self,
        filename: &str,
        payload: &[u8],
    ) -> Result<pdf2csv_core::ExtractedDocument, OcrError> {
        let mut attempt: u32 = 1;
        loop {
            match self.ocr.extract(filename, payload).await {
                Ok(doc) => return Ok(doc),
                Err(err) if err.is_retryable() && attempt < self.settings.max_attempts => {
                    let backoff = self.settings.retry_base_delay * 2u32.pow(attempt - 1);
                    let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64);
                    warn!(
                        filename,
                        attempt,
                        backoff_ms = jitter_ms,
                        %err,
                        "extraction attempt failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Advance the shared stage counter and emit a progress frame. The lock
    /// spans the publish so percentages hit the bus in order.
    fn bump_stage(&self, ctx: &BatchCtx, status: &str, message: Option<&str>) {
        let mut progress = ctx.progress.lock();
        progress.stages_done += 1;
        let pct = if ctx.total_stages == 0 {
            100
        } else {
            (progress.stages_done * 100 / ctx.total_stages) as u8
        };
        if pct < progress.last_pct {
            return;
        }
        progress.last_pct = pct;

        self.bus.publish(QueueEvent::BatchProcessingProgress {
            batch_id: ctx.batch_id.clone(),
            collection_id: Some(ctx.collection_id.clone()),
            progress: pct,
            status: status.to_string(),
            message: message.map(|m| m.to_string()),
        });
    }
}
