//! Per-key circuit breaker
//!
//! Each key (usually `source:stage`) owns an independent breaker. State
//! changes happen under a single mutex that is never held across an await.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Start of the in-flight HALF_OPEN trial, if any
    trial_started: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Counters across every key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub times_opened: u64,
    pub open_circuits: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total_calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    times_opened: AtomicU64,
}

/// Registry of breakers keyed by caller-chosen strings
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, BreakerEntry>>,
    counters: Counters,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker for `key`
    ///
    /// When the circuit is open the call is rejected with
    /// [`Error::CircuitOpen`] and `op` is never invoked. Every admitted call
    /// is bounded by the configured timeout.
    pub async fn call<T, F, Fut>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);

        let admission = match self.admit(key) {
            Some(admission) => admission,
            None => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Circuit open, rejecting call");
                return Err(Error::CircuitOpen(key.to_string()));
            }
        };

        let timeout = self.config.timeout();
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: key.to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        };

        match &outcome {
            Ok(_) => self.on_success(key, admission),
            Err(e) => self.on_failure(key, admission, e),
        }

        outcome
    }

    /// Current state of `key`; unknown keys are CLOSED
    ///
    /// An OPEN circuit whose reset timeout has elapsed reports HALF_OPEN.
    pub fn state(&self, key: &str) -> CircuitState {
        let entries = self.lock();
        match entries.get(key) {
            None => CircuitState::Closed,
            Some(entry) => match (entry.state, entry.opened_at) {
                (CircuitState::Open, Some(opened_at))
                    if opened_at.elapsed() >= self.config.reset_timeout() =>
                {
                    CircuitState::HalfOpen
                }
                (state, _) => state,
            },
        }
    }

    /// Force `key` back to CLOSED
    pub fn reset(&self, key: &str) {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            info!(key = %key, "Circuit manually reset");
        }
    }

    pub fn stats(&self) -> BreakerStats {
        let open_circuits = self
            .lock()
            .values()
            .filter(|e| e.state != CircuitState::Closed)
            .count();

        BreakerStats {
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            times_opened: self.counters.times_opened.load(Ordering::Relaxed),
            open_circuits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BreakerEntry>> {
        // Entries stay consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self, key: &str) -> Option<Admission> {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);
        let now = Instant::now();

        match entry.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let ready = entry
                    .opened_at
                    .is_none_or(|at| now.duration_since(at) >= self.config.reset_timeout());
                if ready {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_started = Some(now);
                    info!(key = %key, "Circuit half-open, admitting trial call");
                    Some(Admission::Trial)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // A trial abandoned past the call timeout no longer blocks the key
                let stale = entry
                    .trial_started
                    .is_none_or(|at| now.duration_since(at) >= self.config.timeout());
                if stale {
                    entry.trial_started = Some(now);
                    Some(Admission::Trial)
                } else {
                    None
                }
            }
        }
    }

    fn on_success(&self, key: &str, admission: Admission) {
        self.counters.successes.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);

        if admission == Admission::Trial || entry.state != CircuitState::Closed {
            info!(key = %key, "Trial call succeeded, circuit closed");
        }
        entry.state = CircuitState::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
        entry.trial_started = None;
    }

    fn on_failure(&self, key: &str, admission: Admission, error: &Error) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(BreakerEntry::new);
        let now = Instant::now();

        if admission == Admission::Trial {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(now);
            entry.trial_started = None;
            self.counters.times_opened.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %error, "Trial call failed, circuit re-opened");
            return;
        }

        entry.consecutive_failures += 1;

        // Late failures of calls admitted before the circuit opened only count
        if entry.state == CircuitState::Closed
            && entry.consecutive_failures >= self.config.failure_threshold
        {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(now);
            self.counters.times_opened.fetch_add(1, Ordering::Relaxed);
            warn!(
                key = %key,
                failures = entry.consecutive_failures,
                error = %error,
                "Failure threshold reached, circuit opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            timeout_ms: 1_000,
            reset_timeout_ms: 5_000,
        }
    }

    async fn fail(breaker: &CircuitBreaker, key: &str, calls: &Arc<AtomicU32>) -> Result<()> {
        let calls = calls.clone();
        breaker
            .call(key, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderUnavailable("down".into()))
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, key: &str, calls: &Arc<AtomicU32>) -> Result<()> {
        let calls = calls.clone();
        breaker
            .call(key, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let breaker = CircuitBreaker::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            assert!(fail(&breaker, "doc:extract", &calls).await.is_err());
        }
        assert_eq!(breaker.state("doc:extract"), CircuitState::Open);

        let rejected = succeed(&breaker, "doc:extract", &calls).await;
        assert!(matches!(rejected, Err(Error::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let breaker = CircuitBreaker::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let _ = fail(&breaker, "a", &calls).await;
        }
        assert_eq!(breaker.state("a"), CircuitState::Open);
        assert_eq!(breaker.state("b"), CircuitState::Closed);
        assert!(succeed(&breaker, "b", &calls).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_reset_timeout() {
        let breaker = Arc::new(CircuitBreaker::new(config()));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let _ = fail(&breaker, "k", &calls).await;
        }
        tokio::time::advance(Duration::from_millis(5_001)).await;
        assert_eq!(breaker.state("k"), CircuitState::HalfOpen);

        // Hold the trial open while a second caller arrives
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial_calls = calls.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call("k", || async move {
                    trial_calls.fetch_add(1, Ordering::SeqCst);
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let second = succeed(&breaker, "k", &calls).await;
        assert!(matches!(second, Err(Error::CircuitOpen(_))));

        let _ = release_tx.send(());
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(breaker.state("k"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_timer() {
        let breaker = CircuitBreaker::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let _ = fail(&breaker, "k", &calls).await;
        }
        tokio::time::advance(Duration::from_millis(5_000)).await;
        assert!(fail(&breaker, "k", &calls).await.is_err());
        assert_eq!(breaker.state("k"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(4_000)).await;
        assert!(matches!(
            succeed(&breaker, "k", &calls).await,
            Err(Error::CircuitOpen(_))
        ));

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(succeed(&breaker, "k", &calls).await.is_ok());
        assert_eq!(breaker.stats().times_opened, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout_ms: 100,
            reset_timeout_ms: 1_000,
        });

        let result: Result<()> = breaker
            .call("slow", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout { after_ms: 100, .. })));
        assert_eq!(breaker.state("slow"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count_and_reset_closes() {
        let breaker = CircuitBreaker::new(config());
        let calls = Arc::new(AtomicU32::new(0));

        let _ = fail(&breaker, "k", &calls).await;
        let _ = fail(&breaker, "k", &calls).await;
        let _ = succeed(&breaker, "k", &calls).await;
        let _ = fail(&breaker, "k", &calls).await;
        assert_eq!(breaker.state("k"), CircuitState::Closed);

        let _ = fail(&breaker, "k", &calls).await;
        let _ = fail(&breaker, "k", &calls).await;
        assert_eq!(breaker.state("k"), CircuitState::Open);

        breaker.reset("k");
        assert_eq!(breaker.state("k"), CircuitState::Closed);
        assert!(succeed(&breaker, "k", &calls).await.is_ok());
    }
}
