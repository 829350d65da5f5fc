//! Bounded exponential backoff around a single upstream operation.
//!
//! Only rate-limit signals are retried. Every other failure is returned from
//! the attempt that produced it. This module neither caches nor queues; the
//! transport calls it from inside an already-granted queue slot, so the whole
//! fetch-plus-retries sequence counts as one queued task.

use crate::upstream::errors::UpstreamError;
use crate::utils::fmt_duration;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff unit: the pause after failed attempt `n` is `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Pause after the 0-indexed `attempt` failed with a rate-limit signal.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(31))
    }
}

/// Run `operation` until it succeeds, fails with a non-rate-limit error, or
/// `policy.max_attempts` rate-limited attempts have been made.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "upstream call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_rate_limited() => return Err(err),
            Err(err) => {
                if attempt + 1 >= max_attempts {
                    warn!(attempts = max_attempts, error = %err, "rate limit retries exhausted");
                    return Err(UpstreamError::RateLimitExhausted {
                        attempts: max_attempts,
                    });
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay = fmt_duration(delay),
                    error = %err,
                    "upstream rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
