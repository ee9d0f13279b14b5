//! Retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Decides whether and when a failed attempt is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the next attempt, or `None` when the error must surface
    ///
    /// `attempt` is zero-based: the first failed call is attempt 0.
    pub fn next_delay(&self, attempt: u32, error: &Error) -> Option<Duration> {
        if attempt >= self.config.max_retries || !error.is_retryable() {
            return None;
        }

        let suggested = match error {
            Error::RateLimited(secs) => Duration::from_secs(*secs),
            _ => Duration::ZERO,
        };

        Some(calculate_backoff(
            attempt,
            self.config.base_delay(),
            self.config.max_delay(),
            suggested,
        ))
    }
}

/// Run `op` until it succeeds, fails terminally, or retries are exhausted
///
/// Only errors classified retryable by [`Error::is_retryable`] are retried.
/// The last error is surfaced unchanged.
pub async fn retry<T, F, Fut>(key: &str, config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = RetryPolicy::new(config.clone());
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(key = %key, attempts = attempt + 1, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => match policy.next_delay(attempt, &e) {
                Some(delay) => {
                    warn!(
                        key = %key,
                        attempt = attempt + 1,
                        wait_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}

/// Exponential backoff with 10% jitter, capped at `max`
pub(crate) fn calculate_backoff(
    attempt: u32,
    base: Duration,
    max: Duration,
    suggested: Duration,
) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let delay = exp.max(suggested.as_millis() as u64);

    let jitter_span = delay / 10;
    let jitter = if jitter_span > 0 {
        rand::thread_rng().gen_range(0..=jitter_span)
    } else {
        0
    };

    Duration::from_millis(delay.saturating_add(jitter)).min(max)
}
