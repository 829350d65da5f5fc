//! Raw upstream GETs, and the paced/retried path every caller goes through.

use crate::upstream::errors::UpstreamError;
use crate::upstream::queue::SerialQueue;
use crate::upstream::retry::{RetryPolicy, fetch_with_retry};
use crate::utils::{fmt_duration, log_if_slow};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

const SLOW_THRESHOLD: Duration = Duration::from_secs(2);

/// Longest error body kept for diagnostics.
const MAX_ERROR_BODY: usize = 512;

/// A single upstream GET returning the response body. No retry, no pacing.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, UpstreamError>;
}

/// [`Fetch`] over a shared `reqwest` client.
pub struct HttpFetch {
    http: reqwest::Client,
}

impl HttpFetch {
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("polydash/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build reqwest client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn get_text(&self, url: &str) -> Result<String, UpstreamError> {
        let unavailable = |source| UpstreamError::Unavailable {
            url: url.to_string(),
            source,
        };

        let resp = self.http.get(url).send().await.map_err(unavailable)?;
        let status = resp.status();

        if status.is_success() {
            return resp.text().await.map_err(unavailable);
        }

        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited {
                url: url.to_string(),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            },
            StatusCode::NOT_FOUND => UpstreamError::NotFound {
                url: url.to_string(),
            },
            _ => UpstreamError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            },
        })
    }
}

/// Shared path to upstream: serial queue outside, rate-limit retry inside,
/// per-attempt timeout around the raw call.
pub struct Transport {
    fetch: Arc<dyn Fetch>,
    queue: SerialQueue,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Transport {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        queue: SerialQueue,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            fetch,
            queue,
            retry,
            timeout,
        }
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.queue
    }

    /// Queue a GET and run it with retries once admitted.
    pub async fn get(&self, url: &str) -> Result<String, UpstreamError> {
        self.queue.enqueue(self.get_with_retry(url)).await
    }

    /// Retried GET without queueing. Only call this from inside a task
    /// already admitted by [`Transport::queue`], so retries keep the slot.
    pub async fn get_with_retry(&self, url: &str) -> Result<String, UpstreamError> {
        fetch_with_retry(self.retry, || self.get_once(url)).await
    }

    async fn get_once(&self, url: &str) -> Result<String, UpstreamError> {
        let start = Instant::now();
        trace!(url, "upstream GET");

        let result = match tokio::time::timeout(self.timeout, self.fetch.get_text(url)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(UpstreamError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }),
        };

        log_if_slow(start, SLOW_THRESHOLD, "upstream GET");
        match &result {
            Ok(body) => debug!(
                url,
                bytes = body.len(),
                duration = fmt_duration(start.elapsed()),
                "upstream GET complete"
            ),
            Err(e) => debug!(url, error = %e, "upstream GET failed"),
        }
        result
    }
}
