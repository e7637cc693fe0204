// Admin endpoints
//
// Queue status/metrics and the counter reset, all behind a shared-secret
// header. With no secret configured the whole surface is disabled.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::info;

use crate::{AppError, AppState};

const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

fn check_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(secret) = &state.config.server.admin_secret else {
        return Err(AppError::with_status(
            StatusCode::FORBIDDEN,
            anyhow::anyhow!("admin endpoints disabled; set server.admin_secret"),
        ));
    };

    match headers.get(ADMIN_SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        Some(provided) if provided == secret => Ok(()),
        _ => Err(AppError::with_status(
            StatusCode::UNAUTHORIZED,
            anyhow::anyhow!("invalid admin secret"),
        )),
    }
}

/// GET /api/admin/queue-status - full aggregate plus the effective config
pub(crate) async fn queue_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_secret(&state, &headers)?;

    let status = state.queue.queue_status();
    Ok(Json(json!({
        "status": status,
        "configuration": state.config.queue,
    }))
    .into_response())
}

/// GET /api/admin/queue-metrics - lightweight counters
pub(crate) async fn queue_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_secret(&state, &headers)?;

    Ok(Json(json!({
        "counters": state.queue.counters(),
        "wsClients": state.hub.client_count(),
        "busSubscribers": state.bus.subscriber_count(),
    }))
    .into_response())
}

/// POST /api/admin/clear-completed-metrics - reset the counters
pub(crate) async fn clear_completed_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    check_secret(&state, &headers)?;

    state.queue.reset_metrics();
    info!("queue metrics cleared by admin request");
    Ok(Json(json!({"status": "ok"})).into_response())
}
