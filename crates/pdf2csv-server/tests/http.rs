// HTTP surface tests
//
// Exercises the router with tower's oneshot against the in-memory store and
// a tempdir blob store. The OCR endpoint stays unconfigured, so accepted
// batches fail asynchronously; these tests assert the synchronous contract.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pdf2csv_config::{FsConfig, RuntimeConfig};
use pdf2csv_core::{NewFile, ProcessingStatus};
use pdf2csv_server::{build_router, build_state, AppState};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "pdf2csv-test-boundary";

fn test_config(dir: &std::path::Path, admin_secret: Option<&str>) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.storage.fs = Some(FsConfig {
        path: dir.to_string_lossy().to_string(),
    });
    config.server.admin_secret = admin_secret.map(String::from);
    config
}

async fn test_app(admin_secret: Option<&str>) -> (Router, AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path(), admin_secret))
        .await
        .unwrap();
    (build_router(state.clone()), state, dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_upload(collection_id: &str, filenames: &[&str]) -> Request<Body> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"collectionId\"\r\n\r\n{c}\r\n",
        b = BOUNDARY,
        c = collection_id
    );
    for name in filenames {
        body.push_str(&format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{n}\"\r\n\
             Content-Type: application/pdf\r\n\r\n%PDF-1.7 payload\r\n",
            b = BOUNDARY,
            n = name
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));

    Request::builder()
        .method("POST")
        .uri("/api/documents/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_and_ready() {
    let (app, _state, _dir) = test_app(None).await;

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ready");
}

#[tokio::test]
async fn upload_accepts_batch() {
    let (app, state, _dir) = test_app(None).await;

    let response = app
        .oneshot(multipart_upload("c1", &["a.pdf", "b.pdf"]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["accepted"], true);
    assert_eq!(json["position"], 1);
    let batch_id = json["batchId"].as_str().unwrap().to_string();
    assert!(batch_id.starts_with("batch-"));

    // Rows were created and bound to the batch.
    let rows = state.store.find_by_batch(&batch_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.raw_storage_path.is_some()));
    assert!(rows.iter().all(|row| row.upload_progress == 100));
}

#[tokio::test]
async fn upload_requires_collection_and_files() {
    let (app, _state, _dir) = test_app(None).await;

    // Missing files.
    let response = app
        .clone()
        .oneshot(multipart_upload("c1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing collection id entirely.
    let body = format!("--{}--\r\n", BOUNDARY);
    let request = Request::builder()
        .method("POST")
        .uri("/api/documents/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hydration_snapshot_is_idempotent() {
    let (app, state, _dir) = test_app(None).await;

    // Seed rows for a batch the queue no longer tracks.
    let ids = state
        .store
        .create_for_batch(
            "c1",
            "batch-done",
            &[
                NewFile {
                    original_filename: "a.pdf".to_string(),
                    file_size: 100,
                },
                NewFile {
                    original_filename: "b.pdf".to_string(),
                    file_size: 200,
                },
            ],
        )
        .await
        .unwrap();
    state
        .store
        .update_status(ids[0], ProcessingStatus::Completed)
        .await
        .unwrap();
    state
        .store
        .update_status(ids[1], ProcessingStatus::Failed)
        .await
        .unwrap();

    let request = || {
        Request::get("/api/documents/batches/batch-done")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_json = body_json(first).await;

    assert_eq!(first_json["collectionId"], "c1");
    assert_eq!(first_json["status"], "completed");
    assert_eq!(first_json["counts"]["total"], 2);
    assert_eq!(first_json["counts"]["completed"], 1);
    assert_eq!(first_json["counts"]["failed"], 1);
    assert_eq!(first_json["files"].as_array().unwrap().len(), 2);

    // No intervening events: byte-for-byte identical snapshot.
    let second = app.oneshot(request()).await.unwrap();
    let second_json = body_json(second).await;
    assert_eq!(first_json, second_json);
}

#[tokio::test]
async fn hydration_unknown_batch_404s() {
    let (app, _state, _dir) = test_app(None).await;

    let response = app
        .oneshot(
            Request::get("/api/documents/batches/batch-nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_requires_secret() {
    // Disabled entirely without a configured secret.
    let (app, _state, _dir) = test_app(None).await;
    let response = app
        .oneshot(
            Request::get("/api/admin/queue-status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Wrong header is unauthorized; right header passes.
    let (app, _state, _dir) = test_app(Some("sesame")).await;
    let response = app
        .clone()
        .oneshot(
            Request::get("/api/admin/queue-status")
                .header("x-admin-secret", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::get("/api/admin/queue-status")
                .header("x-admin-secret", "sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"]["queuedCount"], 0);
    assert_eq!(json["configuration"]["max_concurrent_batches"], 1);
}

#[tokio::test]
async fn admin_metrics_and_reset() {
    let (app, _state, _dir) = test_app(Some("sesame")).await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/admin/queue-metrics")
                .header("x-admin-secret", "sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["counters"]["totalEnqueued"], 0);

    let response = app
        .oneshot(
            Request::post("/api/admin/clear-completed-metrics")
                .header("x-admin-secret", "sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn reprocess_runs_as_mini_batch() {
    let (app, state, _dir) = test_app(None).await;

    let ids = state
        .store
        .create_for_batch(
            "c1",
            "batch-orig",
            &[NewFile {
                original_filename: "a.pdf".to_string(),
                file_size: 100,
            }],
        )
        .await
        .unwrap();
    state
        .store
        .set_storage_paths(ids[0], Some("raw/c1/a.pdf"), None)
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/api/documents/{}/reprocess", ids[0]))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["accepted"], true);
    let mini_batch = json["batchId"].as_str().unwrap();
    assert_ne!(mini_batch, "batch-orig");

    // The row now belongs to the mini-batch.
    let row = state.store.find_by_id(ids[0]).await.unwrap().unwrap();
    assert_eq!(row.batch_id.as_deref(), Some(mini_batch));

    // A row without a stored payload can't be reprocessed.
    let orphan = state
        .store
        .create_for_batch(
            "c1",
            "batch-orphan",
            &[NewFile {
                original_filename: "b.pdf".to_string(),
                file_size: 50,
            }],
        )
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/api/documents/{}/reprocess", orphan[0]))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown files 404.
    let response = app
        .oneshot(
            Request::post(format!("/api/documents/{}/reprocess", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_collection_removes_rows() {
    let (app, state, _dir) = test_app(None).await;

    state
        .store
        .create_for_batch(
            "c-doomed",
            "batch-x",
            &[NewFile {
                original_filename: "a.pdf".to_string(),
                file_size: 100,
            }],
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::delete("/api/collections/c-doomed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["deleted"], 1);

    let rows = state.store.find_by_collection("c-doomed").await.unwrap();
    assert!(rows.is_empty());
}
