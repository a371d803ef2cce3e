//! Runtime knobs for the admission pipeline.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Tuning for workers, the item cache and the queue-path breaker.
///
/// # Default Values
///
/// - `poll_interval`: 50ms
/// - `drain_grace`: same as `poll_interval`
/// - `item_cache_ttl`: 1 hour
/// - `shutdown_timeout`: 10 seconds
/// - `outcome_retry`: [`RetryPolicy::default`]
/// - `breaker`: [`CircuitBreakerConfig::default`]
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Sleep between wait-queue polls when the queue is empty
    pub poll_interval: Duration,
    /// Time a stopping worker waits for admissions still in flight
    pub drain_grace: Duration,
    /// Lifetime of cached item snapshots
    pub item_cache_ttl: Duration,
    /// How long [`crate::WorkerRegistry::shutdown`] waits per worker
    pub shutdown_timeout: Duration,
    /// Backoff for recording worker outcomes
    pub outcome_retry: RetryPolicy,
    /// Breaker guarding the queue path
    pub breaker: CircuitBreakerConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineSettings {
    /// Create a new settings builder.
    #[must_use]
    pub const fn builder() -> PipelineSettingsBuilder {
        PipelineSettingsBuilder {
            poll_interval: None,
            drain_grace: None,
            item_cache_ttl: None,
            shutdown_timeout: None,
            outcome_retry: None,
            breaker: None,
        }
    }
}

/// Builder for [`PipelineSettings`].
#[derive(Debug, Clone)]
pub struct PipelineSettingsBuilder {
    poll_interval: Option<Duration>,
    drain_grace: Option<Duration>,
    item_cache_ttl: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    outcome_retry: Option<RetryPolicy>,
    breaker: Option<CircuitBreakerConfig>,
}

impl PipelineSettingsBuilder {
    /// Set the empty-queue poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the drain grace period.
    #[must_use]
    pub const fn drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = Some(grace);
        self
    }

    /// Set the item cache TTL.
    #[must_use]
    pub const fn item_cache_ttl(mut self, ttl: Duration) -> Self {
        self.item_cache_ttl = Some(ttl);
        self
    }

    /// Set the per-worker shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Set the outcome retry policy.
    #[must_use]
    pub fn outcome_retry(mut self, policy: RetryPolicy) -> Self {
        self.outcome_retry = Some(policy);
        self
    }

    /// Set the queue-path breaker configuration.
    #[must_use]
    pub fn breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    /// Build the settings.
    #[must_use]
    pub fn build(self) -> PipelineSettings {
        let poll_interval = self.poll_interval.unwrap_or(Duration::from_millis(50));
        PipelineSettings {
            poll_interval,
            drain_grace: self.drain_grace.unwrap_or(poll_interval),
            item_cache_ttl: self.item_cache_ttl.unwrap_or(Duration::from_secs(3600)),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(Duration::from_secs(10)),
            outcome_retry: self.outcome_retry.unwrap_or_default(),
            breaker: self.breaker.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_grace_follows_poll_interval() {
        let settings = PipelineSettings::builder()
            .poll_interval(Duration::from_millis(5))
            .build();
        assert_eq!(settings.drain_grace, Duration::from_millis(5));
        assert_eq!(settings.item_cache_ttl, Duration::from_secs(3600));
    }
}
