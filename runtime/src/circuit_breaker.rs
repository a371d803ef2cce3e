//! Circuit breaker in front of the queue-backed admission path.
//!
//! While the queue store keeps failing, every buyer would otherwise pay a
//! network timeout before being routed to the transactional fallback. The
//! breaker remembers recent failures and sends buyers straight to the
//! fallback until the queue store has had time to recover.
//!
//! # States
//!
//! - **Closed**: requests use the queue path; consecutive failures are counted.
//! - **Open**: requests skip the queue path until `timeout` has elapsed.
//! - **HalfOpen**: requests probe the queue path; `success_threshold`
//!   successes close the circuit, one failure reopens it.
//!
//! Only failures selected by the caller's classifier count. A missing item or
//! a database error says nothing about the queue store and leaves the breaker
//! untouched.
//!
//! # Example
//!
//! ```rust
//! use flashsale_runtime::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     "queue",
//!     CircuitBreakerConfig::builder()
//!         .failure_threshold(3)
//!         .timeout(Duration::from_secs(5))
//!         .build(),
//! );
//!
//! let result = breaker
//!     .call(|| async { Err::<u32, _>("connection refused") }, |_err| true)
//!     .await;
//! assert!(matches!(result, Err(BreakerError::Inner("connection refused"))));
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent Open before probing again
    pub timeout: Duration,
    /// Successful probes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: None,
            timeout: None,
            success_threshold: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    timeout: Option<Duration>,
    success_threshold: Option<u32>,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive counted failures that open the circuit (default 5).
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Time spent Open before probing again (default 10 seconds).
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Successful probes needed to close the circuit (default 2).
    #[must_use]
    pub const fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(5).max(1),
            timeout: self.timeout.unwrap_or(Duration::from_secs(10)),
            success_threshold: self.success_threshold.unwrap_or(2).max(1),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Requests use the guarded path
    Closed,
    /// Requests bypass the guarded path
    Open,
    /// Requests probe the guarded path
    HalfOpen,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not run.
    #[error("Circuit breaker is open")]
    Open,
    /// The operation ran and failed.
    #[error("Guarded operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

/// Shared, cloneable circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<Inner>>,
    rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a closed breaker. `name` labels its log events and metrics.
    #[must_use]
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
            rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current state, without moving Open to `HalfOpen`.
    #[must_use]
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Number of calls turned away while Open.
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Run `operation` through the breaker.
    ///
    /// `is_failure` decides whether an error counts against the guarded
    /// dependency. Uncounted errors are returned as-is and do not change the
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without running `operation` when the
    /// circuit is open, and [`BreakerError::Inner`] when `operation` fails.
    pub async fn call<F, Fut, T, E>(
        &self,
        operation: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("flashsale.breaker.rejected", "breaker" => self.name).increment(1);
            tracing::debug!(breaker = self.name, "Circuit breaker is OPEN, bypassing");
            return Err(BreakerError::Open);
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.on_failure();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        tracing::info!(breaker = self.name, "Circuit breaker manually reset to CLOSED");
        *inner = Inner {
            state: State::Closed,
            failures: 0,
            successes: 0,
            opened_at: None,
        };
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let expired = inner
                    .opened_at
                    .is_none_or(|opened_at| opened_at.elapsed() >= self.config.timeout);
                if expired {
                    tracing::info!(
                        breaker = self.name,
                        "Circuit breaker transitioning OPEN -> HALF_OPEN"
                    );
                    inner.state = State::HalfOpen;
                    inner.successes = 0;
                }
                expired
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            State::Closed | State::Open => inner.failures = 0,
            State::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    tracing::info!(
                        breaker = self.name,
                        successes = inner.successes,
                        "Circuit breaker transitioning HALF_OPEN -> CLOSED"
                    );
                    inner.state = State::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failures += 1;
        let reopen = match inner.state {
            State::Closed => inner.failures >= self.config.failure_threshold,
            State::HalfOpen => true,
            State::Open => false,
        };
        if reopen {
            tracing::warn!(
                breaker = self.name,
                failures = inner.failures,
                threshold = self.config.failure_threshold,
                "Circuit breaker transitioning to OPEN"
            );
            metrics::counter!("flashsale.breaker.opened", "breaker" => self.name).increment(1);
            inner.state = State::Open;
            inner.successes = 0;
            inner.opened_at = Some(Instant::now());
        }
    }
}
