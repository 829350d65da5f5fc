//! Health handler.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use tracing::trace;
use ts_rs::TS;

use crate::state::AppState;

#[derive(Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct HealthResponse {
    status: String,
    version: String,
    commit: String,
    timestamp: String,
    /// Upstream calls waiting for or holding the serial queue.
    queued_requests: usize,
}

/// Health check endpoint
pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    trace!("health check requested");
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        queued_requests: state.queue.pending(),
    })
}
