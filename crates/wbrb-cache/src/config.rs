//! Configuration for the WBRB cache (spec.md §6.3).

use std::sync::Arc;
use std::time::Duration;

use resilience_core::EventListeners;

use crate::error::CacheError;
use crate::events::CacheEvent;

/// What to do when the initial read for a key fails permanently
/// (`readFailureMaxRetryCount` exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialReadFailedFinalAction {
    /// Drop the entry; a later `read`/`preload` starts over from scratch.
    RemoveFromCache,
    /// Keep the entry in `ReadFailedFinal`; every `read` throws until a new
    /// `preload` is issued.
    KeepAndThrowCacheReadExceptions,
}

/// What to do when a resync returns after `maxUpdatesToCollect` was already
/// exceeded, i.e. update collection was truncated (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncTooLateAction {
    /// Apply the storage snapshot directly, discarding in-memory updates
    /// collected since truncation.
    SetDirectly,
    /// Best-effort merge: apply as many collected updates as possible on
    /// top of the storage snapshot.
    MergeData,
    /// Drop back to `Ready` without touching the stored value at all.
    ClearReadPendingStatus,
    /// Evict the entry entirely.
    RemoveFromCache,
    /// Leave the entry exactly as it was; the resync result is discarded.
    DoNothing,
}

impl ResyncTooLateAction {
    /// Stable lowercase name, used in `CacheEvent::ResyncTooLate`.
    pub fn name(self) -> &'static str {
        match self {
            ResyncTooLateAction::SetDirectly => "set_directly",
            ResyncTooLateAction::MergeData => "merge_data",
            ResyncTooLateAction::ClearReadPendingStatus => "clear_read_pending_status",
            ResyncTooLateAction::RemoveFromCache => "remove_from_cache",
            ResyncTooLateAction::DoNothing => "do_nothing",
        }
    }
}

/// What to do when resync fails permanently
/// (`fullCacheCycleFailureMaxRetryCount` exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncFailedFinalAction {
    /// Evict the entry.
    RemoveFromCache,
    /// Stop appending to `pendingUpdates`; existing value is kept as-is.
    StopCollectingUpdates,
    /// Keep collecting updates even though they can no longer be reconciled
    /// against storage.
    KeepCollectingUpdates,
}

/// Sizing for a worker pool, or the "no pool" sentinel described in
/// spec.md §4.2 (`-1,-1` ⇒ dispatch happens inline on the queue-processor
/// task and the caller must batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSize {
    /// No dedicated worker pool; the queue processor itself executes
    /// adapter calls. Corresponds to the `-1,-1` sentinel in spec.md.
    Inline,
    /// A bounded pool sized `[min, max]` workers.
    Bounded {
        /// Minimum number of live workers.
        min: usize,
        /// Maximum number of live workers.
        max: usize,
    },
}

impl PoolSize {
    fn validate(self, field: &str) -> Result<(), String> {
        if let PoolSize::Bounded { min, max } = self {
            if min > max {
                return Err(format!("{field}: min ({min}) > max ({max})"));
            }
            if max == 0 {
                return Err(format!("{field}: max must be > 0 for a bounded pool"));
            }
        }
        Ok(())
    }
}

/// Immutable configuration for a [`crate::Cache`] instance.
///
/// Built via [`CacheConfigBuilder`]; all fields match spec.md §6.3 unless
/// noted.
pub struct CacheConfig<K, V, U, R, W, A> {
    pub(crate) cache_name: String,
    pub(crate) main_queue_cache_time: Duration,
    pub(crate) main_queue_cache_time_min: Duration,
    pub(crate) main_queue_max_target_size: usize,
    pub(crate) return_queue_cache_time_min: Duration,
    pub(crate) untouched_item_cache_expiration_delay: Duration,
    pub(crate) max_updates_to_collect: usize,
    pub(crate) can_merge_writes: bool,
    pub(crate) initial_read_failed_final_action: InitialReadFailedFinalAction,
    pub(crate) resync_too_late_action: ResyncTooLateAction,
    pub(crate) resync_failed_final_action: ResyncFailedFinalAction,
    pub(crate) allow_data_writing_after_resync_failed_final: bool,
    pub(crate) allow_data_reading_after_resync_failed_final: bool,
    pub(crate) read_thread_pool_size: PoolSize,
    pub(crate) write_thread_pool_size: PoolSize,
    pub(crate) read_failure_max_retry_count: u32,
    pub(crate) write_failure_max_retry_count: u32,
    pub(crate) full_cache_cycle_failure_max_retry_count: u32,
    pub(crate) return_queue_max_requeue_count: u32,
    pub(crate) max_cache_elements_hard_limit: usize,
    pub(crate) max_sleep_time: Duration,
    pub(crate) read_queue_batching_delay: Duration,
    pub(crate) write_queue_batching_delay: Duration,
    pub(crate) main_queue_max_request_handover_wait_time: Duration,
    pub(crate) monitoring_full_cache_cycles_thresholds: [u32; 5],
    pub(crate) monitoring_time_since_access_thresholds: [Duration; 5],
    pub(crate) read_before_ready_allowed: bool,
    pub(crate) event_listeners: EventListeners<CacheEvent>,
    pub(crate) adapter: Arc<dyn crate::adapter::StorageAdapter<K, V, U, R, W, Error = A>>,
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder<K, V, U, R, W, A> {
    cache_name: String,
    main_queue_cache_time: Duration,
    main_queue_cache_time_min: Duration,
    main_queue_max_target_size: usize,
    return_queue_cache_time_min: Duration,
    untouched_item_cache_expiration_delay: Duration,
    max_updates_to_collect: usize,
    can_merge_writes: bool,
    initial_read_failed_final_action: InitialReadFailedFinalAction,
    resync_too_late_action: ResyncTooLateAction,
    resync_failed_final_action: ResyncFailedFinalAction,
    allow_data_writing_after_resync_failed_final: bool,
    allow_data_reading_after_resync_failed_final: bool,
    read_thread_pool_size: PoolSize,
    write_thread_pool_size: PoolSize,
    read_failure_max_retry_count: u32,
    write_failure_max_retry_count: u32,
    full_cache_cycle_failure_max_retry_count: u32,
    return_queue_max_requeue_count: u32,
    max_cache_elements_hard_limit: usize,
    max_sleep_time: Duration,
    read_queue_batching_delay: Duration,
    write_queue_batching_delay: Duration,
    main_queue_max_request_handover_wait_time: Duration,
    monitoring_full_cache_cycles_thresholds: [u32; 5],
    monitoring_time_since_access_thresholds: [Duration; 5],
    read_before_ready_allowed: bool,
    event_listeners: EventListeners<CacheEvent>,
    adapter: Option<Arc<dyn crate::adapter::StorageAdapter<K, V, U, R, W, Error = A>>>,
}

impl<K, V, U, R, W, A> Default for CacheConfigBuilder<K, V, U, R, W, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, U, R, W, A> CacheConfigBuilder<K, V, U, R, W, A> {
    /// Creates a new builder with the defaults named in spec.md §6.3.
    pub fn new() -> Self {
        Self {
            cache_name: String::from("<unnamed>"),
            main_queue_cache_time: Duration::from_secs(60),
            main_queue_cache_time_min: Duration::from_secs(5),
            main_queue_max_target_size: 10_000,
            return_queue_cache_time_min: Duration::from_secs(5),
            untouched_item_cache_expiration_delay: Duration::from_secs(3600),
            max_updates_to_collect: 100,
            can_merge_writes: true,
            initial_read_failed_final_action: InitialReadFailedFinalAction::RemoveFromCache,
            resync_too_late_action: ResyncTooLateAction::ClearReadPendingStatus,
            resync_failed_final_action: ResyncFailedFinalAction::KeepCollectingUpdates,
            allow_data_writing_after_resync_failed_final: true,
            allow_data_reading_after_resync_failed_final: true,
            read_thread_pool_size: PoolSize::Bounded { min: 1, max: 4 },
            write_thread_pool_size: PoolSize::Bounded { min: 1, max: 4 },
            read_failure_max_retry_count: 3,
            write_failure_max_retry_count: 3,
            full_cache_cycle_failure_max_retry_count: 3,
            return_queue_max_requeue_count: 3,
            max_cache_elements_hard_limit: 100_000,
            max_sleep_time: Duration::from_millis(100),
            read_queue_batching_delay: Duration::ZERO,
            write_queue_batching_delay: Duration::ZERO,
            main_queue_max_request_handover_wait_time: Duration::from_secs(1),
            monitoring_full_cache_cycles_thresholds: [1, 2, 3, 5, 10],
            monitoring_time_since_access_thresholds: [
                Duration::from_secs(1),
                Duration::from_secs(10),
                Duration::from_secs(60),
                Duration::from_secs(600),
                Duration::from_secs(3600),
            ],
            read_before_ready_allowed: false,
            event_listeners: EventListeners::new(),
            adapter: None,
        }
    }

    /// Sets the cache's name, used in events, logs and metrics labels.
    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Target Main Queue residency before an entry's next lifecycle action
    /// (write-out or resync) is attempted.
    pub fn main_queue_cache_time(mut self, d: Duration) -> Self {
        self.main_queue_cache_time = d;
        self
    }

    /// Hard minimum Main Queue residency, to avoid busy-looping entries.
    pub fn main_queue_cache_time_min(mut self, d: Duration) -> Self {
        self.main_queue_cache_time_min = d;
        self
    }

    /// Soft target size for the Main Queue (used for monitoring only; the
    /// hard cap is [`CacheConfigBuilder::max_cache_elements_hard_limit`]).
    pub fn main_queue_max_target_size(mut self, n: usize) -> Self {
        self.main_queue_max_target_size = n;
        self
    }

    /// Minimum dwell time in the Return Queue before an entry becomes
    /// eviction-eligible.
    pub fn return_queue_cache_time_min(mut self, d: Duration) -> Self {
        self.return_queue_cache_time_min = d;
        self
    }

    /// How long an entry may go untouched before it's eligible for
    /// eviction regardless of Return Queue dwell.
    pub fn untouched_item_cache_expiration_delay(mut self, d: Duration) -> Self {
        self.untouched_item_cache_expiration_delay = d;
        self
    }

    /// Maximum number of pending updates collected per entry before the
    /// configured "too late" policy applies.
    pub fn max_updates_to_collect(mut self, n: usize) -> Self {
        self.max_updates_to_collect = n;
        self
    }

    /// Whether multiple pending updates may be merged into a single write.
    pub fn can_merge_writes(mut self, allowed: bool) -> Self {
        self.can_merge_writes = allowed;
        self
    }

    /// Action taken when the initial read fails permanently.
    pub fn initial_read_failed_final_action(mut self, action: InitialReadFailedFinalAction) -> Self {
        self.initial_read_failed_final_action = action;
        self
    }

    /// Action taken when a resync returns after update collection was
    /// truncated.
    pub fn resync_too_late_action(mut self, action: ResyncTooLateAction) -> Self {
        self.resync_too_late_action = action;
        self
    }

    /// Action taken when resync fails permanently.
    pub fn resync_failed_final_action(mut self, action: ResyncFailedFinalAction) -> Self {
        self.resync_failed_final_action = action;
        self
    }

    /// Whether writes are still accepted after a permanent resync failure.
    pub fn allow_data_writing_after_resync_failed_final(mut self, allowed: bool) -> Self {
        self.allow_data_writing_after_resync_failed_final = allowed;
        self
    }

    /// Whether reads are still served after a permanent resync failure.
    pub fn allow_data_reading_after_resync_failed_final(mut self, allowed: bool) -> Self {
        self.allow_data_reading_after_resync_failed_final = allowed;
        self
    }

    /// Read worker pool sizing, or [`PoolSize::Inline`] to dispatch reads on
    /// the queue-processor task.
    pub fn read_thread_pool_size(mut self, size: PoolSize) -> Self {
        self.read_thread_pool_size = size;
        self
    }

    /// Write/resync worker pool sizing, or [`PoolSize::Inline`].
    pub fn write_thread_pool_size(mut self, size: PoolSize) -> Self {
        self.write_thread_pool_size = size;
        self
    }

    /// Retries allowed for a single read before `ReadFailedFinal`.
    pub fn read_failure_max_retry_count(mut self, n: u32) -> Self {
        self.read_failure_max_retry_count = n;
        self
    }

    /// Retries allowed for a single write before giving up on that cycle.
    pub fn write_failure_max_retry_count(mut self, n: u32) -> Self {
        self.write_failure_max_retry_count = n;
        self
    }

    /// Retries allowed for a full write/resync cycle before
    /// `ResyncFailedFinal`.
    pub fn full_cache_cycle_failure_max_retry_count(mut self, n: u32) -> Self {
        self.full_cache_cycle_failure_max_retry_count = n;
        self
    }

    /// Maximum number of times an entry may be re-queued onto the Return
    /// Queue before it is forcibly evicted.
    pub fn return_queue_max_requeue_count(mut self, n: u32) -> Self {
        self.return_queue_max_requeue_count = n;
        self
    }

    /// Hard cap on total cached entries; inserts beyond this fail with
    /// `CacheFull`.
    pub fn max_cache_elements_hard_limit(mut self, n: usize) -> Self {
        self.max_cache_elements_hard_limit = n;
        self
    }

    /// Upper bound on any single blocking wait segment, so shutdown and
    /// config changes are observed promptly (spec.md §5).
    pub fn max_sleep_time(mut self, d: Duration) -> Self {
        self.max_sleep_time = d;
        self
    }

    /// How long the read queue processor accumulates work before handing a
    /// batch to the read pool.
    pub fn read_queue_batching_delay(mut self, d: Duration) -> Self {
        self.read_queue_batching_delay = d;
        self
    }

    /// How long the write queue processor accumulates work before handing a
    /// batch to the write pool.
    pub fn write_queue_batching_delay(mut self, d: Duration) -> Self {
        self.write_queue_batching_delay = d;
        self
    }

    /// How long the Main Queue processor will block handing work to a
    /// saturated worker pool before logging and re-queueing.
    pub fn main_queue_max_request_handover_wait_time(mut self, d: Duration) -> Self {
        self.main_queue_max_request_handover_wait_time = d;
        self
    }

    /// Five ascending thresholds (in completed cycles) used to bucket
    /// monitoring counters by how many full cache cycles an entry has seen.
    pub fn monitoring_full_cache_cycles_thresholds(mut self, thresholds: [u32; 5]) -> Self {
        self.monitoring_full_cache_cycles_thresholds = thresholds;
        self
    }

    /// Five ascending duration thresholds used to bucket monitoring
    /// counters by time-since-last-access.
    pub fn monitoring_time_since_access_thresholds(mut self, thresholds: [Duration; 5]) -> Self {
        self.monitoring_time_since_access_thresholds = thresholds;
        self
    }

    /// Whether `read` may return a value while the entry is still
    /// `ReadPending` (spec.md §3.1 invariant, opt-in relaxation).
    pub fn read_before_ready_allowed(mut self, allowed: bool) -> Self {
        self.read_before_ready_allowed = allowed;
        self
    }

    /// Sets the storage adapter. Required before calling `build`.
    pub fn adapter<Ad>(mut self, adapter: Ad) -> Self
    where
        Ad: crate::adapter::StorageAdapter<K, V, U, R, W, Error = A>,
    {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Registers a listener invoked for every [`CacheEvent`].
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(resilience_core::FnListener::new(move |event: &CacheEvent| f(event)));
        self
    }

    /// Registers a callback invoked whenever an entry's lifecycle status
    /// changes.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(resilience_core::FnListener::new(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::StateTransition { .. }) {
                f(event);
            }
        }));
        self
    }

    /// Registers a callback invoked whenever a resync returns after
    /// `maxUpdatesToCollect` was already exceeded.
    pub fn on_resync_too_late<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(resilience_core::FnListener::new(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::ResyncTooLate { .. }) {
                f(event);
            }
        }));
        self
    }

    /// Registers a callback invoked whenever an insert is rejected because
    /// the cache is at `maxCacheElementsHardLimit`.
    pub fn on_cache_full<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(resilience_core::FnListener::new(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::CacheFull { .. }) {
                f(event);
            }
        }));
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.main_queue_cache_time_min > self.main_queue_cache_time {
            return Err(format!(
                "main_queue_cache_time_min ({:?}) must be <= main_queue_cache_time ({:?})",
                self.main_queue_cache_time_min, self.main_queue_cache_time
            ));
        }
        if self.max_updates_to_collect == 0 {
            return Err("max_updates_to_collect must be > 0".to_string());
        }
        if self.max_cache_elements_hard_limit == 0 {
            return Err("max_cache_elements_hard_limit must be > 0".to_string());
        }
        self.read_thread_pool_size.validate("read_thread_pool_size")?;
        self.write_thread_pool_size.validate("write_thread_pool_size")?;
        for pair in self.monitoring_full_cache_cycles_thresholds.windows(2) {
            if pair[0] > pair[1] {
                return Err("monitoring_full_cache_cycles_thresholds must be ascending".to_string());
            }
        }
        for pair in self.monitoring_time_since_access_thresholds.windows(2) {
            if pair[0] > pair[1] {
                return Err("monitoring_time_since_access_thresholds must be ascending".to_string());
            }
        }
        Ok(())
    }

    /// Builds the configuration.
    ///
    /// # Errors
    /// Returns `CacheError::ConfigurationInvalid` if any field combination
    /// violates the invariants documented on the relevant setter.
    ///
    /// # Panics
    /// Panics if no adapter was set: unlike the numeric fields, there is no
    /// sensible default storage collaborator.
    pub fn build(self) -> Result<CacheConfig<K, V, U, R, W, A>, CacheError<A>> {
        self.validate().map_err(CacheError::ConfigurationInvalid)?;
        let adapter = self.adapter.expect("adapter must be set before building");

        Ok(CacheConfig {
            cache_name: self.cache_name,
            main_queue_cache_time: self.main_queue_cache_time,
            main_queue_cache_time_min: self.main_queue_cache_time_min,
            main_queue_max_target_size: self.main_queue_max_target_size,
            return_queue_cache_time_min: self.return_queue_cache_time_min,
            untouched_item_cache_expiration_delay: self.untouched_item_cache_expiration_delay,
            max_updates_to_collect: self.max_updates_to_collect,
            can_merge_writes: self.can_merge_writes,
            initial_read_failed_final_action: self.initial_read_failed_final_action,
            resync_too_late_action: self.resync_too_late_action,
            resync_failed_final_action: self.resync_failed_final_action,
            allow_data_writing_after_resync_failed_final: self.allow_data_writing_after_resync_failed_final,
            allow_data_reading_after_resync_failed_final: self.allow_data_reading_after_resync_failed_final,
            read_thread_pool_size: self.read_thread_pool_size,
            write_thread_pool_size: self.write_thread_pool_size,
            read_failure_max_retry_count: self.read_failure_max_retry_count,
            write_failure_max_retry_count: self.write_failure_max_retry_count,
            full_cache_cycle_failure_max_retry_count: self.full_cache_cycle_failure_max_retry_count,
            return_queue_max_requeue_count: self.return_queue_max_requeue_count,
            max_cache_elements_hard_limit: self.max_cache_elements_hard_limit,
            max_sleep_time: self.max_sleep_time,
            read_queue_batching_delay: self.read_queue_batching_delay,
            write_queue_batching_delay: self.write_queue_batching_delay,
            main_queue_max_request_handover_wait_time: self.main_queue_max_request_handover_wait_time,
            monitoring_full_cache_cycles_thresholds: self.monitoring_full_cache_cycles_thresholds,
            monitoring_time_since_access_thresholds: self.monitoring_time_since_access_thresholds,
            read_before_ready_allowed: self.read_before_ready_allowed,
            event_listeners: self.event_listeners,
            adapter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StorageAdapter;
    use futures::future::BoxFuture;

    struct NoopAdapter;

    impl StorageAdapter<String, String, String, String, String> for NoopAdapter {
        type Error = String;

        fn read(&self, _key: &String) -> BoxFuture<'_, Result<String, String>> {
            Box::pin(async { Ok(String::new()) })
        }
        fn write(&self, _data: String) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async { Ok(()) })
        }
        fn resync(&self, _key: &String) -> BoxFuture<'_, Result<String, String>> {
            Box::pin(async { Ok(String::new()) })
        }
        fn convert_to_cache_value(&self, raw: String) -> String {
            raw
        }
        fn apply_update(&self, value: String, update: &String) -> String {
            value + update
        }
        fn split_for_write(&self, _key: &String, value: &String, _pending: &[String]) -> (String, Vec<String>) {
            (value.clone(), Vec::new())
        }
        fn merge_after_resync(&self, _mem: String, storage: String, _updates: &[String]) -> String {
            storage
        }
    }

    #[test]
    fn default_builder_builds_with_adapter() {
        let config: CacheConfig<String, String, String, String, String, String> =
            CacheConfigBuilder::new().adapter(NoopAdapter).build().unwrap();
        assert_eq!(config.cache_name, "<unnamed>");
    }

    #[test]
    #[should_panic(expected = "adapter must be set")]
    fn build_panics_without_adapter() {
        let _: Result<CacheConfig<String, String, String, String, String, String>, _> =
            CacheConfigBuilder::new().build();
    }

    #[test]
    fn rejects_inverted_main_queue_times() {
        let err = CacheConfigBuilder::<String, String, String, String, String, String>::new()
            .adapter(NoopAdapter)
            .main_queue_cache_time(Duration::from_millis(10))
            .main_queue_cache_time_min(Duration::from_millis(100))
            .build()
            .unwrap_err();
        assert!(matches!(err, CacheError::ConfigurationInvalid(_)));
    }

    #[test]
    fn rejects_zero_max_updates_to_collect() {
        let err = CacheConfigBuilder::<String, String, String, String, String, String>::new()
            .adapter(NoopAdapter)
            .max_updates_to_collect(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, CacheError::ConfigurationInvalid(_)));
    }

    #[test]
    fn rejects_inverted_pool_size() {
        let err = CacheConfigBuilder::<String, String, String, String, String, String>::new()
            .adapter(NoopAdapter)
            .read_thread_pool_size(PoolSize::Bounded { min: 10, max: 2 })
            .build()
            .unwrap_err();
        assert!(matches!(err, CacheError::ConfigurationInvalid(_)));
    }

    #[test]
    fn rejects_non_ascending_monitoring_thresholds() {
        let err = CacheConfigBuilder::<String, String, String, String, String, String>::new()
            .adapter(NoopAdapter)
            .monitoring_full_cache_cycles_thresholds([5, 4, 3, 2, 1])
            .build()
            .unwrap_err();
        assert!(matches!(err, CacheError::ConfigurationInvalid(_)));
    }
}
