//! Write-Behind, Resync-in-Background cache.
//!
//! [`Cache`] keeps an in-memory entry table fronting a caller-supplied
//! [`StorageAdapter`]. Reads are served from memory once an entry reaches
//! `Ready`; writes are applied in memory immediately and flushed to storage
//! asynchronously by a background queue processor, which also periodically
//! resyncs entries against storage to catch writes made by other callers of
//! the same backing store.

pub mod adapter;
pub mod config;
pub mod entry;
pub mod events;
pub mod queues;
pub mod status;

#[cfg(feature = "tower-layer")]
pub mod layer;

mod dispatch;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use resilience_core::{SharedClock, SystemClock, ThrottlingLogger};

pub use adapter::StorageAdapter;
pub use config::{
    CacheConfig, CacheConfigBuilder, InitialReadFailedFinalAction, PoolSize, ResyncFailedFinalAction,
    ResyncTooLateAction,
};
pub use entry::{CacheEntry, LifecycleStatus};
pub use events::CacheEvent;
pub use status::CacheStatusSnapshot;

use dispatch::Dispatcher;
use error::CacheError;
use queues::TimeQueue;

pub mod error;

struct Inner<K, V, U, R, W, A> {
    config: CacheConfig<K, V, U, R, W, A>,
    entries: RwLock<HashMap<K, Arc<CacheEntry<V, U, A>>>>,
    main_queue: Mutex<TimeQueue<K>>,
    return_queue: Mutex<TimeQueue<K>>,
    read_dispatcher: Dispatcher,
    write_dispatcher: Dispatcher,
    status: status::StatusCounters,
    throttle: ThrottlingLogger,
    clock: SharedClock,
    shutdown_requested: AtomicBool,
    woken: Notify,
}

/// A Write-Behind, Resync-in-Background cache.
///
/// `K` is the key, `V` the in-memory value, `U` an application-defined
/// update/delta applied via [`StorageAdapter::apply_update`], `R`/`W` the
/// storage read/write payload types, and `A` the storage adapter's error
/// type.
pub struct Cache<K, V, U, R, W, A> {
    inner: Arc<Inner<K, V, U, R, W, A>>,
    processor: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V, U, R, W, A> Cache<K, V, U, R, W, A>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    W: Send + Sync + 'static,
    A: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static,
{
    /// Builds a cache from `config`. The background queue processor is not
    /// started until [`Cache::start`] is called.
    pub fn new(config: CacheConfig<K, V, U, R, W, A>) -> Self {
        let read_dispatcher = Dispatcher::new(config.read_thread_pool_size);
        let write_dispatcher = Dispatcher::new(config.write_thread_pool_size);
        let clock: SharedClock = Arc::new(SystemClock);
        let throttle = ThrottlingLogger::with_clock(config.cache_name.clone(), Duration::from_secs(30), clock.clone());

        let inner = Inner {
            config,
            entries: RwLock::new(HashMap::new()),
            main_queue: Mutex::new(TimeQueue::new()),
            return_queue: Mutex::new(TimeQueue::new()),
            read_dispatcher,
            write_dispatcher,
            status: status::StatusCounters::new(),
            throttle,
            clock,
            shutdown_requested: AtomicBool::new(false),
            woken: Notify::new(),
        };

        Self {
            inner: Arc::new(inner),
            processor: Mutex::new(None),
        }
    }

    /// Starts the background queue processor task. Calling this more than
    /// once without an intervening [`Cache::shutdown`] is a no-op.
    pub async fn start(&self) {
        let mut guard = self.processor.lock().await;
        if guard.is_some() {
            return;
        }
        let inner = self.inner.clone();
        *guard = Some(tokio::spawn(async move {
            run_queue_processor(inner).await;
        }));
    }

    /// Requests the processor stop, then waits up to `grace` for it to exit.
    /// Entries that were mid-flight when shutdown was requested are left as
    /// they are; they are not force-flushed (spec.md does not require
    /// drain-on-shutdown for the cache, unlike the RRL service's spooldown).
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown_requested.store(true, Ordering::SeqCst);
        self.inner.woken.notify_waiters();

        let handle = self.processor.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(grace, handle).await;
        }
    }

    /// Reads the value for `key`, triggering an initial load from storage if
    /// the key has no entry, and waiting up to `timeout` for a readable
    /// state to be reached.
    pub async fn read(&self, key: K, timeout: Duration) -> Result<V, CacheError<A>> {
        let entry = self.entry_or_create(&key).await?;
        self.touch(&entry).await;

        if entry.status() != LifecycleStatus::Ready {
            self.inner
                .config
                .event_listeners
                .emit(&CacheEvent::Miss { cache_name: self.inner.config.cache_name.clone(), key: key.to_string() });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = entry.status();

            if status == LifecycleStatus::ReadFailedFinal {
                return Err(self.failed_final_error(&entry, status).await);
            }
            if status == LifecycleStatus::ResyncFailedFinal && !self.inner.config.allow_data_reading_after_resync_failed_final {
                return Err(self.failed_final_error(&entry, status).await);
            }
            if status == LifecycleStatus::Removed {
                return Err(CacheError::RemovedFromCache);
            }

            if status.is_readable()
                || status == LifecycleStatus::ResyncFailedFinal
                || (self.inner.config.read_before_ready_allowed && status == LifecycleStatus::ReadPending)
            {
                let payload = entry.payload.read().await;
                if let Some(value) = payload.value.clone() {
                    self.inner.status.record_read_completed();
                    self.inner
                        .config
                        .event_listeners
                        .emit(&CacheEvent::Hit { cache_name: self.inner.config.cache_name.clone(), key: key.to_string() });
                    return Ok(value);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(CacheError::Timeout);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let poll = remaining.min(self.inner.config.max_sleep_time);
            tokio::time::sleep(poll).await;
        }
    }

    /// Applies `update` to the entry for `key` if it is already cached and
    /// readable. Does not implicitly load the key from storage; use
    /// [`Cache::preload`] or [`Cache::read`] first if the entry may not
    /// exist yet.
    pub async fn write_if_cached(&self, key: &K, update: U) -> Result<(), CacheError<A>> {
        let entries = self.inner.entries.read().await;
        let entry = entries.get(key).ok_or(CacheError::ItemNotPresent)?.clone();
        drop(entries);

        let status = entry.status();
        if status == LifecycleStatus::Removed {
            return Err(CacheError::RemovedFromCache);
        }
        if status == LifecycleStatus::ResyncFailedFinal {
            if !self.inner.config.allow_data_writing_after_resync_failed_final {
                return Err(CacheError::ControlStateForbids);
            }
        } else if !status.is_readable() {
            return Err(CacheError::ControlStateForbids);
        }

        {
            let mut payload = entry.payload.write().await;
            if let Some(value) = payload.value.take() {
                let applied = self.inner.config.adapter.apply_update(value, &update);
                payload.value = Some(applied);
            }
            payload.pending_updates.push(update);
        }
        self.touch(&entry).await;
        Ok(())
    }

    /// Ensures a key is loaded into the cache without blocking on the read
    /// completing; re-issues the initial read if the entry previously ended
    /// up in `ReadFailedFinal`.
    pub async fn preload(&self, key: K) -> Result<(), CacheError<A>> {
        self.entry_or_create(&key).await?;
        Ok(())
    }

    /// Returns a monitoring snapshot, recomputing it only if the cached
    /// snapshot is older than `max_age`.
    pub async fn get_status(&self, max_age: Duration) -> CacheStatusSnapshot {
        let now = self.inner.clock.now();
        let inner = &self.inner;
        let main_queue_size = inner.main_queue.lock().await.len();
        let return_queue_size = inner.return_queue.lock().await.len();
        inner
            .status
            .get_or_compute(now, max_age, || CacheStatusSnapshot {
                main_queue_size,
                return_queue_size,
                reads_completed: inner.status.reads_completed.load(Ordering::Relaxed),
                read_retries: inner.status.read_retries.load(Ordering::Relaxed),
                write_retries: inner.status.write_retries.load(Ordering::Relaxed),
                resync_retries: inner.status.resync_retries.load(Ordering::Relaxed),
                resync_too_late_count: inner.status.resync_too_late.load(Ordering::Relaxed),
                failed_final_count: 0,
                evictions: inner.status.evictions.load(Ordering::Relaxed),
                cache_full_rejections: inner.status.cache_full_rejections.load(Ordering::Relaxed),
                full_cycle_buckets: [0; 5],
                time_since_access_buckets: [0; 5],
            })
            .await
    }

    async fn entry_or_create(&self, key: &K) -> Result<Arc<CacheEntry<V, U, A>>, CacheError<A>> {
        {
            let entries = self.inner.entries.read().await;
            if let Some(entry) = entries.get(key) {
                return Ok(entry.clone());
            }
        }

        let mut entries = self.inner.entries.write().await;
        if let Some(entry) = entries.get(key) {
            return Ok(entry.clone());
        }
        if entries.len() >= self.inner.config.max_cache_elements_hard_limit {
            self.inner.status.record_cache_full_rejection();
            self.inner.throttle.log("cache_full", "rejected insert: cache at hard limit");
            self.inner
                .config
                .event_listeners
                .emit(&CacheEvent::CacheFull { cache_name: self.inner.config.cache_name.clone(), key: key.to_string() });
            return Err(CacheError::CacheFull);
        }

        let now = tokio::time::Instant::now().into_std();
        let entry = Arc::new(CacheEntry::new(now));
        entries.insert(key.clone(), entry.clone());
        drop(entries);

        self.inner.main_queue.lock().await.push_back(key.clone(), tokio::time::Instant::now().into_std());
        self.inner
            .config
            .event_listeners
            .emit(&CacheEvent::ReadScheduled { cache_name: self.inner.config.cache_name.clone(), key: key.to_string() });
        self.inner.woken.notify_waiters();

        Ok(entry)
    }

    async fn touch(&self, entry: &CacheEntry<V, U, A>) {
        let mut last = entry.last_touched_at.write().await;
        *last = self.inner.clock.now();
    }

    async fn failed_final_error(&self, entry: &CacheEntry<V, U, A>, status: LifecycleStatus) -> CacheError<A> {
        let last_error = entry.last_error.read().await.clone();
        match (status, last_error) {
            (LifecycleStatus::ReadFailedFinal, Some(err)) => CacheError::ReadFailedFinal(err),
            (LifecycleStatus::ResyncFailedFinal, Some(err)) => CacheError::ResyncFailedFinal(err),
            (LifecycleStatus::ReadFailedFinal, None) => CacheError::Internal("read failed permanently; adapter error not retained".into()),
            (LifecycleStatus::ResyncFailedFinal, None) => CacheError::Internal("resync failed permanently; adapter error not retained".into()),
            _ => CacheError::Internal("unexpected terminal status".into()),
        }
    }
}

/// Transitions `entry` to `to` and emits `CacheEvent::StateTransition` if the
/// status actually changed.
fn transition<K, V, U, R, W, A>(inner: &Inner<K, V, U, R, W, A>, key: &K, entry: &CacheEntry<V, U, A>, to: LifecycleStatus)
where
    K: fmt::Display,
{
    let from = entry.transition_to(to);
    if from != to {
        inner.config.event_listeners.emit(&CacheEvent::StateTransition {
            cache_name: inner.config.cache_name.clone(),
            key: key.to_string(),
            from,
            to,
        });
    }
}

/// Drives the Main Queue: pulls due keys, issues the initial read for
/// freshly-created entries, and dispatches write-out/resync cycles for
/// entries that have reached their scheduled action time.
///
/// This loop is the one place storage adapter calls are made; it never
/// holds an entry's payload lock while awaiting the adapter (spec.md §5).
async fn run_queue_processor<K, V, U, R, W, A>(inner: Arc<Inner<K, V, U, R, W, A>>)
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    W: Send + Sync + 'static,
    A: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static,
{
    loop {
        if inner.shutdown_requested.load(Ordering::SeqCst) {
            return;
        }

        let now = tokio::time::Instant::now().into_std();
        drain_return_queue(&inner, now).await;

        let due_key = { inner.main_queue.lock().await.pop_due(now) };

        let Some(key) = due_key else {
            let sleep = inner.config.max_sleep_time;
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = inner.woken.notified() => {}
            }
            continue;
        };

        let entry = {
            let entries = inner.entries.read().await;
            entries.get(&key).cloned()
        };
        let Some(entry) = entry else { continue };

        match entry.status() {
            LifecycleStatus::ReadPending => {
                dispatch_initial_read(&inner, &key, &entry).await;
            }
            LifecycleStatus::Ready => {
                let has_updates = !entry.payload.read().await.pending_updates.is_empty();
                if has_updates {
                    inner
                        .config
                        .event_listeners
                        .emit(&CacheEvent::WriteScheduled { cache_name: inner.config.cache_name.clone(), key: key.to_string() });
                    dispatch_write(&inner, &key, &entry).await;
                } else {
                    inner
                        .config
                        .event_listeners
                        .emit(&CacheEvent::ResyncScheduled { cache_name: inner.config.cache_name.clone(), key: key.to_string() });
                    dispatch_resync(&inner, &key, &entry).await;
                }
            }
            _ => {
                // Mid-flight (WritePending/ResyncPending/...); the worker
                // that owns this cycle will re-queue it on completion.
            }
        }
    }
}

/// Drains entries that have completed their Return Queue dwell
/// (`returnQueueCacheTimeMin`): evicts any that have gone untouched past
/// `untouchedItemCacheExpirationDelay` or exhausted
/// `returnQueueMaxRequeueCount`, and otherwise sends the rest back through
/// the Main Queue for another write/resync cycle (spec.md §4.1).
async fn drain_return_queue<K, V, U, R, W, A>(inner: &Arc<Inner<K, V, U, R, W, A>>, now: std::time::Instant)
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    W: Send + Sync + 'static,
    A: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static,
{
    loop {
        let due_key = { inner.return_queue.lock().await.pop_due(now) };
        let Some(key) = due_key else { break };

        let entry = {
            let entries = inner.entries.read().await;
            entries.get(&key).cloned()
        };
        let Some(entry) = entry else { continue };

        let last_touched = *entry.last_touched_at.read().await;
        let untouched_for = now.saturating_duration_since(last_touched);
        let requeue_count = entry.requeue_count.fetch_add(1, Ordering::SeqCst) + 1;

        let expired = untouched_for >= inner.config.untouched_item_cache_expiration_delay;
        let exhausted = u32::from(requeue_count) >= inner.config.return_queue_max_requeue_count;

        if expired || exhausted {
            inner.entries.write().await.remove(&key);
            transition(inner, &key, &entry, LifecycleStatus::Removed);
            inner.status.record_eviction();
            inner.config.event_listeners.emit(&CacheEvent::Eviction {
                cache_name: inner.config.cache_name.clone(),
                key: key.to_string(),
                requeue_count: u32::from(requeue_count),
            });
        } else {
            inner.main_queue.lock().await.push_back(key, now);
        }
    }
}

async fn dispatch_initial_read<K, V, U, R, W, A>(inner: &Arc<Inner<K, V, U, R, W, A>>, key: &K, entry: &Arc<CacheEntry<V, U, A>>)
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    W: Send + Sync + 'static,
    A: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static,
{
    let permit = match inner
        .read_dispatcher
        .dispatch_with_wait(inner.config.main_queue_max_request_handover_wait_time)
        .await
    {
        Ok((permit, waited)) => {
            if waited > Duration::ZERO {
                inner.config.event_listeners.emit(&CacheEvent::HandoverBackpressure {
                    cache_name: inner.config.cache_name.clone(),
                    key: key.to_string(),
                    waited,
                });
            }
            permit
        }
        Err(_) => {
            inner.main_queue.lock().await.push_back(key.clone(), tokio::time::Instant::now().into_std());
            return;
        }
    };

    let adapter = inner.config.adapter.clone();
    let result = adapter.read(key).await;
    drop(permit);

    match result {
        Ok(raw) => {
            let value = adapter.convert_to_cache_value(raw);
            let mut payload = entry.payload.write().await;
            payload.value = Some(value);
            drop(payload);
            transition(inner, key, entry, LifecycleStatus::Ready);
            inner.main_queue.lock().await.push_back(key.clone(), inner.clock.now() + inner.config.main_queue_cache_time);
        }
        Err(err) => {
            let attempt = entry.read_failure_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            inner.status.record_read_retry();
            let will_retry = u32::from(attempt) < inner.config.read_failure_max_retry_count;
            inner.config.event_listeners.emit(&CacheEvent::ReadFailed {
                cache_name: inner.config.cache_name.clone(),
                key: key.to_string(),
                retry: will_retry,
            });
            if !will_retry {
                match inner.config.initial_read_failed_final_action {
                    InitialReadFailedFinalAction::RemoveFromCache => {
                        inner.entries.write().await.remove(key);
                    }
                    InitialReadFailedFinalAction::KeepAndThrowCacheReadExceptions => {
                        *entry.last_error.write().await = Some(err.clone());
                        transition(inner, key, entry, LifecycleStatus::ReadFailedFinal);
                    }
                }
                inner.throttle.log("read_failed_final", &format!("initial read failed permanently: {err}"));
            } else {
                inner.throttle.log("read_retry", &format!("initial read failed, will retry: {err}"));
                inner.main_queue.lock().await.push_back(key.clone(), tokio::time::Instant::now().into_std());
            }
        }
    }
}

async fn dispatch_write<K, V, U, R, W, A>(inner: &Arc<Inner<K, V, U, R, W, A>>, key: &K, entry: &Arc<CacheEntry<V, U, A>>)
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    W: Send + Sync + 'static,
    A: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static,
{
    transition(inner, key, entry, LifecycleStatus::WritePending);

    let permit = match inner
        .write_dispatcher
        .dispatch_with_wait(inner.config.main_queue_max_request_handover_wait_time)
        .await
    {
        Ok((permit, waited)) => {
            if waited > Duration::ZERO {
                inner.config.event_listeners.emit(&CacheEvent::HandoverBackpressure {
                    cache_name: inner.config.cache_name.clone(),
                    key: key.to_string(),
                    waited,
                });
            }
            permit
        }
        Err(_) => {
            transition(inner, key, entry, LifecycleStatus::Ready);
            inner.main_queue.lock().await.push_back(key.clone(), tokio::time::Instant::now().into_std());
            return;
        }
    };

    let adapter = inner.config.adapter.clone();

    let (write_payload, remaining_updates) = {
        let payload = entry.payload.read().await;
        let value = match payload.value.as_ref() {
            Some(v) => v,
            None => {
                drop(permit);
                transition(inner, key, entry, LifecycleStatus::Ready);
                return;
            }
        };
        adapter.split_for_write(key, value, &payload.pending_updates)
    };

    transition(inner, key, entry, LifecycleStatus::WriteSent);
    let result = adapter.write(write_payload).await;
    drop(permit);

    match result {
        Ok(()) => {
            let mut payload = entry.payload.write().await;
            payload.pending_updates = remaining_updates;
            drop(payload);
            transition(inner, key, entry, LifecycleStatus::Ready);
            let due_at = tokio::time::Instant::now().into_std() + inner.config.return_queue_cache_time_min;
            inner.return_queue.lock().await.push_back(key.clone(), due_at);
        }
        Err(err) => {
            let attempt = entry.write_failure_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            inner.status.record_write_retry();
            transition(inner, key, entry, LifecycleStatus::Ready);
            let will_retry = u32::from(attempt) < inner.config.write_failure_max_retry_count;
            inner.config.event_listeners.emit(&CacheEvent::WriteFailed {
                cache_name: inner.config.cache_name.clone(),
                key: key.to_string(),
                retry: will_retry,
            });
            if !will_retry {
                inner.throttle.log("write_failed_final", &format!("write exhausted retries: {err}"));
            } else {
                inner.throttle.log("write_retry", &format!("write failed, will retry: {err}"));
            }
            inner.main_queue.lock().await.push_back(key.clone(), tokio::time::Instant::now().into_std());
        }
    }
}

async fn dispatch_resync<K, V, U, R, W, A>(inner: &Arc<Inner<K, V, U, R, W, A>>, key: &K, entry: &Arc<CacheEntry<V, U, A>>)
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    W: Send + Sync + 'static,
    A: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static,
{
    transition(inner, key, entry, LifecycleStatus::ResyncPending);

    let permit = match inner
        .read_dispatcher
        .dispatch_with_wait(inner.config.main_queue_max_request_handover_wait_time)
        .await
    {
        Ok((permit, waited)) => {
            if waited > Duration::ZERO {
                inner.config.event_listeners.emit(&CacheEvent::HandoverBackpressure {
                    cache_name: inner.config.cache_name.clone(),
                    key: key.to_string(),
                    waited,
                });
            }
            permit
        }
        Err(_) => {
            transition(inner, key, entry, LifecycleStatus::Ready);
            inner.main_queue.lock().await.push_back(key.clone(), tokio::time::Instant::now().into_std());
            return;
        }
    };

    let adapter = inner.config.adapter.clone();
    transition(inner, key, entry, LifecycleStatus::ResyncSent);
    let result = adapter.resync(key).await;
    drop(permit);

    match result {
        Ok(raw) => {
            let updates_since = {
                let payload = entry.payload.read().await;
                payload.pending_updates.clone()
            };

            if updates_since.len() > inner.config.max_updates_to_collect {
                let action = inner.config.resync_too_late_action;
                inner.status.record_resync_too_late();
                inner.throttle.log(
                    "resync_too_late",
                    &format!("resync returned after update collection was truncated; applying {}", action.name()),
                );
                inner.config.event_listeners.emit(&CacheEvent::ResyncTooLate {
                    cache_name: inner.config.cache_name.clone(),
                    key: key.to_string(),
                    action: action.name(),
                });

                match action {
                    ResyncTooLateAction::SetDirectly => {
                        let mut payload = entry.payload.write().await;
                        payload.value = Some(adapter.convert_to_cache_value(raw));
                        payload.pending_updates.clear();
                    }
                    ResyncTooLateAction::MergeData => {
                        let mut payload = entry.payload.write().await;
                        let merged = match payload.value.take() {
                            Some(current) => adapter.merge_after_resync(current, raw, &updates_since),
                            None => adapter.convert_to_cache_value(raw),
                        };
                        payload.value = Some(merged);
                    }
                    ResyncTooLateAction::ClearReadPendingStatus | ResyncTooLateAction::DoNothing => {
                        // Storage snapshot is discarded; the in-memory value
                        // and pending updates are left exactly as they were.
                    }
                    ResyncTooLateAction::RemoveFromCache => {
                        inner.entries.write().await.remove(key);
                        transition(inner, key, entry, LifecycleStatus::Removed);
                        inner.status.record_eviction();
                        return;
                    }
                }

                transition(inner, key, entry, LifecycleStatus::Ready);
                let due_at = inner.clock.now() + inner.config.return_queue_cache_time_min;
                inner.return_queue.lock().await.push_back(key.clone(), due_at);
                return;
            }

            let mut payload = entry.payload.write().await;
            match payload.value.take() {
                Some(current) => {
                    let merged = adapter.merge_after_resync(current, raw, &updates_since);
                    payload.value = Some(merged);
                }
                None => {
                    inner.throttle.critical("invariant_violation", "resync completed for an entry with no in-memory value");
                    inner.config.event_listeners.emit(&CacheEvent::InvariantViolation {
                        cache_name: inner.config.cache_name.clone(),
                        detail: "resync completed for an entry with no in-memory value".to_string(),
                    });
                }
            }
            drop(payload);
            transition(inner, key, entry, LifecycleStatus::Ready);
            let due_at = inner.clock.now() + inner.config.return_queue_cache_time_min;
            inner.return_queue.lock().await.push_back(key.clone(), due_at);
        }
        Err(err) => {
            let attempt = entry.resync_failure_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            inner.status.record_resync_retry();
            let will_retry = u32::from(attempt) < inner.config.full_cache_cycle_failure_max_retry_count;
            inner.config.event_listeners.emit(&CacheEvent::ResyncFailed {
                cache_name: inner.config.cache_name.clone(),
                key: key.to_string(),
                retry: will_retry,
            });
            if !will_retry {
                match inner.config.resync_failed_final_action {
                    ResyncFailedFinalAction::RemoveFromCache => {
                        inner.entries.write().await.remove(key);
                    }
                    ResyncFailedFinalAction::StopCollectingUpdates | ResyncFailedFinalAction::KeepCollectingUpdates => {
                        *entry.last_error.write().await = Some(err.clone());
                        transition(inner, key, entry, LifecycleStatus::ResyncFailedFinal);
                    }
                }
                inner.throttle.log("resync_failed_final", &format!("resync exhausted retries: {err}"));
            } else {
                transition(inner, key, entry, LifecycleStatus::Ready);
                inner.throttle.log("resync_retry", &format!("resync failed, will retry: {err}"));
                inner.main_queue.lock().await.push_back(key.clone(), tokio::time::Instant::now().into_std());
            }
        }
    }
}
