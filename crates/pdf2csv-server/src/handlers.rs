// HTTP request handlers
//
// Multipart intake, hydration snapshots, single-file reprocess, collection
// removal, and health checks.

use anyhow::anyhow;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::{counter, histogram};
use pdf2csv_core::{BatchSnapshot, NewFile, ProcessingStatus};
use pdf2csv_queue::{BatchInfo, BatchJob, EnqueueResult};
use pdf2csv_runner::{BatchSpec, FileTask};
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{AppError, AppState};

fn new_batch_id() -> String {
    format!("batch-{}", Uuid::new_v4().simple())
}

/// POST /api/documents/process - multipart batch intake
pub(crate) async fn process_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let start = Instant::now();
    counter!("ingest.requests", 1);

    let mut collection_id: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(anyhow!("malformed multipart body: {}", err)))?
    {
        let name = field.name().map(|name| name.to_string());
        match name.as_deref() {
            Some("collectionId") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(anyhow!("invalid collectionId: {}", err)))?;
                collection_id = Some(value);
            }
            Some("files") | Some("files[]") => {
                let filename = field
                    .file_name()
                    .unwrap_or("document.pdf")
                    .to_string();
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::bad_request(anyhow!("failed to read upload {}: {}", filename, err))
                })?;
                files.push((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let collection_id = collection_id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request(anyhow!("collectionId is required")))?;

    if files.is_empty() {
        return Err(AppError::bad_request(anyhow!("no files in upload")));
    }
    let max_files = state.config.request.max_files_per_batch;
    if files.len() > max_files {
        return Err(AppError::bad_request(anyhow!(
            "upload of {} files exceeds the {} file limit",
            files.len(),
            max_files
        )));
    }

    debug!(
        collection_id = %collection_id,
        files = files.len(),
        "received document batch"
    );
    histogram!(
        "ingest.bytes",
        files.iter().map(|(_, payload)| payload.len()).sum::<usize>() as f64
    );

    // Fast-path rejection before any rows are created.
    if !state.queue.can_accept_new_batch() {
        counter!("ingest.rejected", 1);
        return Ok(queue_full_response());
    }

    let batch_id = new_batch_id();
    let new_files: Vec<NewFile> = files
        .iter()
        .map(|(filename, payload)| NewFile {
            original_filename: filename.clone(),
            file_size: payload.len() as i64,
        })
        .collect();

    let ids = state
        .store
        .create_for_batch(&collection_id, &batch_id, &new_files)
        .await
        .map_err(|err| AppError::internal(anyhow!("failed to create file rows: {}", err)))?;

    let mut tasks = Vec::with_capacity(files.len());
    for ((filename, payload), id) in files.into_iter().zip(&ids) {
        let path = state
            .blobs
            .write_raw(&collection_id, *id, &filename, payload)
            .await
            .map_err(|err| AppError::internal(anyhow!("failed to store upload: {}", err)))?;
        state
            .store
            .set_storage_paths(*id, Some(&path), None)
            .await
            .map_err(|err| AppError::internal(anyhow!("failed to record storage path: {}", err)))?;
        state
            .store
            .set_upload_progress(*id, 100)
            .await
            .map_err(|err| AppError::internal(anyhow!("failed to record upload progress: {}", err)))?;

        tasks.push(FileTask {
            meta_id: *id,
            filename,
            raw_path: path,
        });
    }

    let spec = BatchSpec {
        batch_id: batch_id.clone(),
        collection_id: collection_id.clone(),
        files: tasks,
    };
    let runner = state.runner.clone();
    let job = BatchJob::new(&batch_id, &collection_id, ids.clone(), move || async move {
        runner.process_batch(spec).await
    });

    let response = match state.queue.enqueue(job) {
        EnqueueResult::Accepted { position } => {
            info!(batch_id = %batch_id, position, files = ids.len(), "batch accepted");
            (
                StatusCode::OK,
                Json(json!({
                    "batchId": batch_id,
                    "position": position,
                    "accepted": true,
                })),
            )
                .into_response()
        }
        EnqueueResult::RejectedFull => {
            counter!("ingest.rejected", 1);
            fail_rows(&state, &ids).await;
            queue_full_response()
        }
        EnqueueResult::RejectedShutdown => {
            fail_rows(&state, &ids).await;
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "SHUTTING_DOWN"})),
            )
                .into_response()
        }
        EnqueueResult::RejectedInvalid | EnqueueResult::Duplicate { .. } => {
            // Fresh uuids make both unreachable in practice; fail closed.
            fail_rows(&state, &ids).await;
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid batch"})),
            )
                .into_response()
        }
    };

    histogram!(
        "ingest.latency_ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(response)
}

fn queue_full_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "QUEUE_FULL"})),
    )
        .into_response()
}

async fn fail_rows(state: &AppState, ids: &[Uuid]) {
    for id in ids {
        if let Err(err) = state
            .store
            .update_status(*id, ProcessingStatus::Failed)
            .await
        {
            warn!(file_id = %id, %err, "failed to mark rejected row failed");
        }
    }
}

/// GET /api/documents/batches/:batch_id - hydration snapshot
///
/// Pure read over queue state and file rows; two calls with no intervening
/// events return identical snapshots.
pub(crate) async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Response, AppError> {
    let info = state.queue.batch_info(&batch_id);
    let counts = state
        .store
        .aggregate_by_batch(&batch_id)
        .await
        .map_err(|err| AppError::internal(anyhow!("aggregate query failed: {}", err)))?;
    let files = state
        .store
        .find_by_batch(&batch_id)
        .await
        .map_err(|err| AppError::internal(anyhow!("file query failed: {}", err)))?;

    if info.is_none() && files.is_empty() {
        return Err(AppError::not_found(anyhow!("unknown batch: {}", batch_id)));
    }

    let (collection_id, status, started_at) = match &info {
        Some(BatchInfo::Active {
            collection_id,
            started_at,
            ..
        }) => (collection_id.clone(), "processing", Some(*started_at)),
        Some(BatchInfo::Queued { collection_id, .. }) => (collection_id.clone(), "queued", None),
        None => {
            let collection_id = files[0].collection_id.clone();
            let status = if counts.completed + counts.failed == counts.total {
                if counts.completed > 0 {
                    "completed"
                } else {
                    "failed"
                }
            } else {
                // The manager no longer knows the batch but rows are not all
                // terminal; report it as still processing.
                "processing"
            };
            (collection_id, status, None)
        }
    };

    let snapshot = BatchSnapshot {
        batch_id,
        collection_id,
        counts,
        files,
        started_at,
        status: status.to_string(),
    };

    Ok(Json(snapshot).into_response())
}

/// POST /api/documents/:file_id/reprocess - single-file mini-batch
pub(crate) async fn reprocess_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let row = state
        .store
        .find_by_id(file_id)
        .await
        .map_err(|err| AppError::internal(anyhow!("file query failed: {}", err)))?
        .ok_or_else(|| AppError::not_found(anyhow!("unknown file: {}", file_id)))?;

    let raw_path = row.raw_storage_path.clone().ok_or_else(|| {
        AppError::bad_request(anyhow!("file {} has no stored payload to reprocess", file_id))
    })?;

    let batch_id = new_batch_id();
    state
        .store
        .assign_batch(file_id, &batch_id)
        .await
        .map_err(|err| AppError::internal(anyhow!("failed to rebind file: {}", err)))?;
    state
        .store
        .update_status(file_id, ProcessingStatus::Reprocessing)
        .await
        .map_err(|err| AppError::internal(anyhow!("failed to mark reprocessing: {}", err)))?;

    let spec = BatchSpec {
        batch_id: batch_id.clone(),
        collection_id: row.collection_id.clone(),
        files: vec![FileTask {
            meta_id: file_id,
            filename: row.original_filename.clone(),
            raw_path,
        }],
    };
    let runner = state.runner.clone();
    let job = BatchJob::new(
        &batch_id,
        &row.collection_id,
        vec![file_id],
        move || async move { runner.process_batch(spec).await },
    );

    match state.queue.enqueue(job) {
        EnqueueResult::Accepted { position } => {
            info!(batch_id = %batch_id, file_id = %file_id, "file queued for reprocess");
            Ok((
                StatusCode::OK,
                Json(json!({
                    "batchId": batch_id,
                    "position": position,
                    "accepted": true,
                })),
            )
                .into_response())
        }
        EnqueueResult::RejectedFull => Ok(queue_full_response()),
        EnqueueResult::RejectedShutdown => Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "SHUTTING_DOWN"})),
        )
            .into_response()),
        other => Err(AppError::internal(anyhow!(
            "unexpected enqueue result for reprocess: {:?}",
            other
        ))),
    }
}

/// DELETE /api/collections/:collection_id - remove rows and raw blobs
pub(crate) async fn delete_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> Result<Response, AppError> {
    let removed = state
        .store
        .delete_by_collection(&collection_id)
        .await
        .map_err(|err| AppError::internal(anyhow!("failed to delete rows: {}", err)))?;

    // Side-effect hook: raw payloads go with the rows.
    if let Err(err) = state.blobs.delete_collection_raw(&collection_id).await {
        warn!(collection_id = %collection_id, %err, "failed to remove raw blobs");
    }
    state.hub.drop_replay_for(&collection_id);

    info!(
        collection_id = %collection_id,
        rows = removed.len(),
        "collection deleted"
    );

    Ok(Json(json!({"deleted": removed.len()})).into_response())
}

/// GET /health - Basic health check
pub(crate) async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// GET /ready - Readiness check (store reachable)
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "error": err.to_string()})),
        ),
    }
}
