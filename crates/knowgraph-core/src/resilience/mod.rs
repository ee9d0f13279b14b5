//! Resilience layer guarding every unreliable external call
//!
//! Retry wraps the circuit breaker: each attempt passes through the breaker
//! for its key, and an open-circuit rejection ends the retry loop at once.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use retry::{RetryPolicy, retry};

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::config::ResilienceConfig;
use crate::error::Result;

/// Retry policy plus a shared breaker registry
#[derive(Debug, Clone)]
pub struct Resilience {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl Resilience {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config.retry),
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker)),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute `op` under retry and the breaker for `key`
    pub async fn execute<T, F, Fut>(&self, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.breaker.call(key, &mut op).await {
                Ok(value) => return Ok(value),
                Err(e) => match self.policy.next_delay(attempt, &e) {
                    Some(delay) => {
                        warn!(
                            key = %key,
                            attempt = attempt + 1,
                            wait_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying guarded call"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}
