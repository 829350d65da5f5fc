//! Typed JSON errors for the HTTP surface.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{error, warn};
use ts_rs::TS;

use crate::upstream::errors::{ErrorKind, UpstreamError};

/// Seconds a client should wait after the retry budget ran out.
const RATE_LIMIT_RETRY_AFTER_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ApiErrorCode {
    ValidationError,
    RateLimitExhausted,
    UpstreamFormatDrift,
    UpstreamUnavailable,
}

impl ApiErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ApiErrorCode::RateLimitExhausted => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::UpstreamFormatDrift => StatusCode::BAD_GATEWAY,
            ApiErrorCode::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether retrying the same request later could succeed.
    fn retryable(self) -> bool {
        matches!(
            self,
            ApiErrorCode::RateLimitExhausted | ApiErrorCode::UpstreamUnavailable
        )
    }
}

impl From<ErrorKind> for ApiErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ValidationError => ApiErrorCode::ValidationError,
            ErrorKind::RateLimitExhausted => ApiErrorCode::RateLimitExhausted,
            ErrorKind::UpstreamFormatDrift => ApiErrorCode::UpstreamFormatDrift,
            ErrorKind::UpstreamUnavailable => ApiErrorCode::UpstreamUnavailable,
        }
    }
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::ValidationError, message)
    }
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        let code = ApiErrorCode::from(e.kind());
        match code {
            ApiErrorCode::UpstreamFormatDrift => {
                error!(error = ?e, "upstream format drift surfaced to client");
            }
            ApiErrorCode::ValidationError => {}
            _ => warn!(error = %e, "upstream failure surfaced to client"),
        }
        Self::new(code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let rate_limited = self.code == ApiErrorCode::RateLimitExhausted;
        let mut response = (status, Json(self)).into_response();
        if rate_limited {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(RATE_LIMIT_RETRY_AFTER_SECS),
            );
        }
        response
    }
}
