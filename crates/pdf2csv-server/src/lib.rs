// pdf2csv-server - HTTP/WebSocket surface
//
// Full-featured server mode:
// - Axum HTTP server (HTTP/1.1, HTTP/2)
// - Multipart document intake feeding the batch queue
// - WebSocket fan-out of lifecycle events with per-collection replay
// - Hydration and admin endpoints
// - Structured logging with tracing
// - Graceful shutdown draining active batches

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use pdf2csv_config::RuntimeConfig;
use pdf2csv_events::{EventBus, WebSocketHub};
use pdf2csv_queue::BatchQueue;
use pdf2csv_runner::{BatchRunner, RunnerSettings};
use pdf2csv_store::{BlobStore, MetadataStore};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod admin;
mod handlers;
mod init;
mod ws;

use init::{init_ocr, init_store, init_tracing};

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub bus: EventBus,
    pub hub: Arc<WebSocketHub>,
    pub queue: Arc<BatchQueue>,
    pub store: Arc<dyn MetadataStore>,
    pub blobs: Arc<BlobStore>,
    pub runner: Arc<BatchRunner>,
}

/// Error type that implements IntoResponse
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Request error: {:?}", self.error);
        (
            self.status,
            Json(json!({
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn bad_request(error: anyhow::Error) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: anyhow::Error) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, error)
    }

    pub fn internal(error: anyhow::Error) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

/// Assemble the shared state from a resolved configuration.
pub async fn build_state(config: RuntimeConfig) -> Result<AppState> {
    let config = Arc::new(config);

    let bus = EventBus::new();
    let hub = WebSocketHub::new(config.server.ws_backlog_threshold);
    let _fanout = hub.clone().spawn_fanout(&bus);

    let store = init_store(&config).await?;
    let blobs = Arc::new(BlobStore::from_config(&config.storage)?);
    let ocr = init_ocr(&config);
    let runner = BatchRunner::new(
        ocr,
        store.clone(),
        blobs.clone(),
        bus.clone(),
        RunnerSettings::from_config(&config.ocr),
    );
    let queue = BatchQueue::new(config.queue.clone(), bus.clone());

    Ok(AppState {
        config,
        bus,
        hub,
        queue,
        store,
        blobs,
        runner,
    })
}

/// Build the router for the given state.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let ws_path = state.config.server.ws_path.clone();
    let max_payload = state.config.server.max_payload_bytes;

    Router::new()
        .route("/api/documents/process", post(handlers::process_documents))
        .route("/api/documents/batches/:batch_id", get(handlers::get_batch))
        .route(
            "/api/documents/:file_id/reprocess",
            post(handlers::reprocess_file),
        )
        .route(
            "/api/collections/:collection_id",
            delete(handlers::delete_collection),
        )
        .route("/api/admin/queue-status", get(admin::queue_status))
        .route("/api/admin/queue-metrics", get(admin::queue_metrics))
        .route(
            "/api/admin/clear-completed-metrics",
            post(admin::clear_completed_metrics),
        )
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::ready_check))
        .route(&ws_path, get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(max_payload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &RuntimeConfig) -> CorsLayer {
    if config
        .server
        .allowed_origins
        .iter()
        .any(|origin| origin == "*")
    {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .server
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new().allow_origin(origins)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point for server mode
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config);

    let addr = config.server.listen_addr.clone();
    let queue_config = config.queue.clone();
    let state = build_state(config).await?;
    let queue = state.queue.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("pdf2csv HTTP endpoint listening on http://{}", addr);
    info!("Routes:");
    info!("  POST   /api/documents/process          - multipart batch intake");
    info!("  GET    /api/documents/batches/:id      - batch hydration snapshot");
    info!("  POST   /api/documents/:id/reprocess    - single-file reprocess");
    info!("  DELETE /api/collections/:id            - remove a collection");
    info!("  GET    /api/admin/queue-status         - queue status + config echo");
    info!("  GET    /api/admin/queue-metrics        - queue counters");
    info!("  GET    /health, /ready                 - health checks");
    info!("Press Ctrl+C or send SIGTERM to stop");

    let shutdown_queue = queue.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Refuse new work immediately; queued jobs are discarded.
            shutdown_queue.prepare_shutdown();
        })
        .await
        .context("Server error")?;

    if queue_config.enable_graceful_shutdown {
        let drained = queue
            .wait_for_active_batches(queue_config.graceful_shutdown_timeout())
            .await;
        if drained {
            info!("All active batches drained");
        } else {
            error!("Shutdown drain window expired with batches still active");
        }
    }

    info!("Server shutdown complete");

    Ok(())
}
