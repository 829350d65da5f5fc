//! Error types for the upstream market-data client.

use crate::utils::fmt_duration;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Message fragments upstream uses when it throttles without a 429.
static THROTTLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate[\s_-]?limit|too many requests|throttl").expect("valid throttle regex")
});

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// One rate-limit signal from a single attempt. Retried by the fetcher.
    #[error("upstream rate limited the request to {url}: {message}")]
    RateLimited { url: String, message: String },
    #[error("upstream rate limit persisted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    #[error("build identifier pattern not found in {url}")]
    BuildIdNotFound { url: String },
    #[error("upstream response from {url} did not match the expected shape")]
    FormatDrift {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("upstream returned 404 for {url}")]
    NotFound { url: String },
    #[error("upstream unavailable ({url})")]
    Unavailable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("upstream call to {url} timed out after {}", fmt_duration(*after))]
    Timeout { url: String, after: Duration },
    #[error("upstream returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("invalid request: {0}")]
    Validation(String),
}

/// Caller-facing classification of [`UpstreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimitExhausted,
    UpstreamFormatDrift,
    UpstreamUnavailable,
    ValidationError,
}

impl UpstreamError {
    /// Whether this error is a throttling signal, by status or by message.
    ///
    /// Upstream sometimes answers with a non-429 status whose body says it is
    /// throttling, so both are checked.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            UpstreamError::RateLimited { .. } => true,
            UpstreamError::Status { status: 429, .. } => true,
            UpstreamError::Status { body, .. } => THROTTLE_RE.is_match(body),
            UpstreamError::Unavailable { source, .. } => {
                source.status().is_some_and(|s| s.as_u16() == 429)
                    || THROTTLE_RE.is_match(&source.to_string())
            }
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UpstreamError::RateLimited { .. } | UpstreamError::RateLimitExhausted { .. } => {
                ErrorKind::RateLimitExhausted
            }
            UpstreamError::BuildIdNotFound { .. } | UpstreamError::FormatDrift { .. } => {
                ErrorKind::UpstreamFormatDrift
            }
            UpstreamError::NotFound { .. }
            | UpstreamError::Unavailable { .. }
            | UpstreamError::Timeout { .. }
            | UpstreamError::Status { .. } => ErrorKind::UpstreamUnavailable,
            UpstreamError::Validation(_) => ErrorKind::ValidationError,
        }
    }

    /// Whether a user-initiated retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimitExhausted | ErrorKind::UpstreamUnavailable
        )
    }
}
