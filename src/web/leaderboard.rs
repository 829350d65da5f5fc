//! Leaderboard handler.

use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::state::AppState;
use crate::upstream::models::{MetricType, TimeWindow};
use crate::web::error::ApiError;
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardParams {
    pub metric: Option<String>,
    pub window: Option<String>,
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct LeaderboardResponse {
    pub metric: String,
    pub window: String,
    #[ts(type = "Array<Record<string, unknown>>")]
    pub rows: Vec<Value>,
}

/// `GET /api/leaderboard`
pub(super) async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Response, ApiError> {
    let metric = match params.metric.as_deref() {
        Some(raw) => raw.parse::<MetricType>()?,
        None => MetricType::Volume,
    };
    let window = match params.window.as_deref() {
        Some(raw) => raw.parse::<TimeWindow>()?,
        None => TimeWindow::Day,
    };

    let rows = state.markets.leaderboard(metric, window).await?;
    Ok(with_cache_control(
        LeaderboardResponse {
            metric: metric.as_str().to_string(),
            window: window.as_str().to_string(),
            rows,
        },
        cache::MARKETS,
    ))
}
