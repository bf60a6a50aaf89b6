//! Configuration for the RRL dispatcher (spec.md §6.3).

use std::sync::Arc;
use std::time::Duration;

use resilience_core::EventListeners;

use crate::backoff::IntervalFunction;
use crate::budget::RetryBudget;
use crate::events::DispatchEvent;

/// Worker pool sizing, `[min, max]` as named in spec.md §6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    /// Minimum number of live workers.
    pub min: usize,
    /// Maximum number of live workers.
    pub max: usize,
}

/// Immutable configuration for an [`crate::RrlService`] instance.
pub struct RrlConfig {
    pub(crate) service_name: String,
    pub(crate) max_attempts: u32,
    pub(crate) delays_after_failure: Arc<dyn IntervalFunction>,
    pub(crate) max_pending_requests: usize,
    pub(crate) request_early_processing_grace_period: Duration,
    pub(crate) delay_queues: Vec<Duration>,
    pub(crate) delay_queue_too_long_grace_period: Duration,
    pub(crate) rate_limiter_bucket_size: u64,
    pub(crate) rate_limiter_refill_rate: u64,
    pub(crate) rate_limiter_refill_interval: Duration,
    pub(crate) request_processing_thread_pool_config: PoolSize,
    pub(crate) retry_budget: Option<Arc<dyn RetryBudget>>,
    pub(crate) event_listeners: EventListeners<DispatchEvent>,
}

/// Builder for [`RrlConfig`].
pub struct RrlConfigBuilder {
    service_name: String,
    max_attempts: u32,
    delays_after_failure: Option<Arc<dyn IntervalFunction>>,
    max_pending_requests: usize,
    request_early_processing_grace_period: Duration,
    delay_queues: Vec<Duration>,
    delay_queue_too_long_grace_period: Duration,
    rate_limiter_bucket_size: u64,
    rate_limiter_refill_rate: u64,
    rate_limiter_refill_interval: Duration,
    request_processing_thread_pool_config: PoolSize,
    retry_budget: Option<Arc<dyn RetryBudget>>,
    event_listeners: EventListeners<DispatchEvent>,
}

impl Default for RrlConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RrlConfigBuilder {
    /// Creates a new builder with the defaults named in spec.md §6.3.
    pub fn new() -> Self {
        Self {
            service_name: String::from("<unnamed>"),
            max_attempts: 3,
            delays_after_failure: None,
            max_pending_requests: 10_000,
            request_early_processing_grace_period: Duration::from_millis(5),
            delay_queues: vec![Duration::from_millis(100), Duration::from_millis(300), Duration::from_secs(1)],
            delay_queue_too_long_grace_period: Duration::from_millis(20),
            rate_limiter_bucket_size: 0,
            rate_limiter_refill_rate: 0,
            rate_limiter_refill_interval: Duration::from_secs(1),
            request_processing_thread_pool_config: PoolSize { min: 1, max: 8 },
            retry_budget: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the service's name, used in events, logs and metrics labels.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Maximum attempts per request, including the first. Once reached,
    /// the next failure becomes `AttemptsExhausted`.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// The retry delay strategy, e.g. [`crate::backoff::TableInterval`] for
    /// the spec's `delaysAfterFailure` table.
    pub fn delays_after_failure(mut self, strategy: impl IntervalFunction) -> Self {
        self.delays_after_failure = Some(Arc::new(strategy));
        self
    }

    /// Hard cap on requests waiting in the Main Queue; beyond this,
    /// submissions fail with `QueueFull`.
    pub fn max_pending_requests(mut self, n: usize) -> Self {
        self.max_pending_requests = n;
        self
    }

    /// Grace period allowing a request slightly ahead of its scheduled
    /// release to be dispatched early rather than re-queued.
    pub fn request_early_processing_grace_period(mut self, d: Duration) -> Self {
        self.request_early_processing_grace_period = d;
        self
    }

    /// Ascending dwell times for the delay-queue chain.
    pub fn delay_queues(mut self, dwells: Vec<Duration>) -> Self {
        self.delay_queues = dwells;
        self
    }

    /// Tolerance within which a delay slightly exceeding a lane's dwell
    /// still lands in that lane rather than escalating.
    pub fn delay_queue_too_long_grace_period(mut self, d: Duration) -> Self {
        self.delay_queue_too_long_grace_period = d;
        self
    }

    /// Token bucket capacity; `0` disables rate limiting entirely.
    pub fn rate_limiter_bucket_size(mut self, n: u64) -> Self {
        self.rate_limiter_bucket_size = n;
        self
    }

    /// Tokens added per `rate_limiter_refill_interval`.
    pub fn rate_limiter_refill_rate(mut self, n: u64) -> Self {
        self.rate_limiter_refill_rate = n;
        self
    }

    /// The refill period paired with `rate_limiter_refill_rate`.
    pub fn rate_limiter_refill_interval(mut self, d: Duration) -> Self {
        self.rate_limiter_refill_interval = d;
        self
    }

    /// Worker pool sizing for request processing.
    pub fn request_processing_thread_pool_config(mut self, size: PoolSize) -> Self {
        self.request_processing_thread_pool_config = size;
        self
    }

    /// An optional secondary retry gate independent of the rate limiter.
    pub fn retry_budget(mut self, budget: Arc<dyn RetryBudget>) -> Self {
        self.retry_budget = Some(budget);
        self
    }

    /// Registers a listener invoked for every [`DispatchEvent`].
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(resilience_core::FnListener::new(move |event: &DispatchEvent| f(event)));
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1".to_string());
        }
        if self.delay_queues.is_empty() {
            return Err("delay_queues must have at least one entry".to_string());
        }
        if !self.delay_queues.windows(2).all(|w| w[0] <= w[1]) {
            return Err("delay_queues must be ascending".to_string());
        }
        if self.request_processing_thread_pool_config.min > self.request_processing_thread_pool_config.max {
            return Err("request_processing_thread_pool_config: min > max".to_string());
        }
        if self.request_processing_thread_pool_config.max == 0 {
            return Err("request_processing_thread_pool_config: max must be > 0".to_string());
        }
        if self.max_pending_requests == 0 {
            return Err("max_pending_requests must be > 0".to_string());
        }
        Ok(())
    }

    /// Builds the configuration.
    ///
    /// # Errors
    /// Returns `Err` if any field combination violates the invariants
    /// documented on the relevant setter.
    ///
    /// # Panics
    /// Panics if no retry-delay strategy was set: there is no sensible
    /// default for `delaysAfterFailure` (spec.md requires at least one
    /// explicit value).
    pub fn build(self) -> Result<RrlConfig, String> {
        self.validate()?;
        let delays_after_failure = self
            .delays_after_failure
            .expect("delays_after_failure must be set before building");

        Ok(RrlConfig {
            service_name: self.service_name,
            max_attempts: self.max_attempts,
            delays_after_failure,
            max_pending_requests: self.max_pending_requests,
            request_early_processing_grace_period: self.request_early_processing_grace_period,
            delay_queues: self.delay_queues,
            delay_queue_too_long_grace_period: self.delay_queue_too_long_grace_period,
            rate_limiter_bucket_size: self.rate_limiter_bucket_size,
            rate_limiter_refill_rate: self.rate_limiter_refill_rate,
            rate_limiter_refill_interval: self.rate_limiter_refill_interval,
            request_processing_thread_pool_config: self.request_processing_thread_pool_config,
            retry_budget: self.retry_budget,
            event_listeners: self.event_listeners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::TableInterval;

    #[test]
    fn default_builder_builds_with_delays() {
        let config = RrlConfigBuilder::new()
            .delays_after_failure(TableInterval::new(vec![Duration::from_millis(100)]))
            .build()
            .unwrap();
        assert_eq!(config.service_name, "<unnamed>");
    }

    #[test]
    #[should_panic(expected = "delays_after_failure must be set")]
    fn build_panics_without_delays() {
        let _ = RrlConfigBuilder::new().build();
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let err = RrlConfigBuilder::new()
            .delays_after_failure(TableInterval::new(vec![Duration::from_millis(100)]))
            .max_attempts(0)
            .build()
            .unwrap_err();
        assert!(err.contains("max_attempts"));
    }

    #[test]
    fn rejects_non_ascending_delay_queues() {
        let err = RrlConfigBuilder::new()
            .delays_after_failure(TableInterval::new(vec![Duration::from_millis(100)]))
            .delay_queues(vec![Duration::from_millis(300), Duration::from_millis(100)])
            .build()
            .unwrap_err();
        assert!(err.contains("ascending"));
    }

    #[test]
    fn rejects_inverted_pool_size() {
        let err = RrlConfigBuilder::new()
            .delays_after_failure(TableInterval::new(vec![Duration::from_millis(100)]))
            .request_processing_thread_pool_config(PoolSize { min: 5, max: 1 })
            .build()
            .unwrap_err();
        assert!(err.contains("min > max"));
    }
}
