//! Web API router construction and shared response utilities.

use axum::{
    Router,
    http::HeaderValue,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::web::{leaderboard, markets, status};

/// Cache-Control presets for public endpoints.
pub mod cache {
    /// Listing pages and leaderboard rows. Matches the default upstream cache TTL.
    pub const MARKETS: &str = "public, max-age=60, stale-while-revalidate=30";
    /// Responses to explicit refreshes.
    pub const NO_STORE: &str = "private, no-store, must-revalidate";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(header),
    );
    response
}

/// Creates the web server router.
///
/// `request_timeout` must exceed the worst-case upstream path: queue wait,
/// every retry attempt, and the backoff between them.
pub fn create_router(app_state: AppState, request_timeout: Duration) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/markets", get(markets::list_markets))
        .route("/markets/refresh", post(markets::refresh_markets))
        .route("/leaderboard", get(leaderboard::leaderboard))
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        TraceLayer::new_for_http(),
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        TimeoutLayer::new(request_timeout),
    ))
}
