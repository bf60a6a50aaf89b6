//! End-to-end scenarios exercising the full Main Queue / Return Queue
//! lifecycle against a fake in-memory storage adapter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use wbrb_cache::{Cache, CacheConfigBuilder, CacheEvent, PoolSize, ResyncTooLateAction, StorageAdapter};

/// A fake backing store: an in-memory map of `String -> String`, values
/// built by concatenating applied updates. `resync_delay` lets a test hold
/// a resync in flight long enough to collect updates behind it.
///
/// Cloning shares the underlying state, so a test can hand one clone to the
/// cache (which Arc-wraps it again internally) and keep another to inspect
/// after the fact.
#[derive(Clone)]
struct FakeStore {
    rows: Arc<Mutex<std::collections::HashMap<String, String>>>,
    writes: Arc<AtomicU32>,
    resync_delay: Duration,
}

impl FakeStore {
    fn new() -> Self {
        Self {
            rows: Arc::new(Mutex::new(std::collections::HashMap::new())),
            writes: Arc::new(AtomicU32::new(0)),
            resync_delay: Duration::ZERO,
        }
    }

    fn with_resync_delay(delay: Duration) -> Self {
        Self { resync_delay: delay, ..Self::new() }
    }

    fn seed(&self, key: &str, value: &str) {
        self.rows.lock().unwrap().insert(key.to_string(), value.to_string());
    }
}

impl StorageAdapter<String, String, String, String, (String, String)> for FakeStore {
    type Error = String;

    fn read(&self, key: &String) -> BoxFuture<'_, Result<String, String>> {
        let value = self.rows.lock().unwrap().get(key).cloned().unwrap_or_default();
        Box::pin(async move { Ok(value) })
    }

    fn write(&self, data: (String, String)) -> BoxFuture<'_, Result<(), String>> {
        let (key, value) = data;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(key, value);
        Box::pin(async { Ok(()) })
    }

    fn resync(&self, key: &String) -> BoxFuture<'_, Result<String, String>> {
        let value = self.rows.lock().unwrap().get(key).cloned().unwrap_or_default();
        let delay = self.resync_delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(value)
        })
    }

    fn convert_to_cache_value(&self, raw: String) -> String {
        raw
    }

    fn apply_update(&self, value: String, update: &String) -> String {
        format!("{value}+{update}")
    }

    fn split_for_write(&self, key: &String, value: &String, pending_updates: &[String]) -> ((String, String), Vec<String>) {
        let _ = pending_updates;
        ((key.clone(), value.clone()), Vec::new())
    }

    fn merge_after_resync(&self, _value_memory: String, value_storage: String, updates_since_resync_start: &[String]) -> String {
        updates_since_resync_start.iter().fold(value_storage, |acc, u| format!("{acc}+{u}"))
    }
}

/// Scenario 1: basic cache cycle — preload, read, write, one flush.
#[tokio::test]
async fn basic_cache_cycle() {
    let store = FakeStore::new();
    store.seed("k", "v0");

    let config = CacheConfigBuilder::new()
        .cache_name("basic")
        .main_queue_cache_time(Duration::from_millis(100))
        .main_queue_cache_time_min(Duration::from_millis(10))
        .return_queue_cache_time_min(Duration::from_millis(50))
        .max_updates_to_collect(10)
        .read_thread_pool_size(PoolSize::Bounded { min: 1, max: 2 })
        .write_thread_pool_size(PoolSize::Bounded { min: 1, max: 2 })
        .adapter(store.clone())
        .build()
        .unwrap();

    let cache: Cache<String, String, String, String, (String, String), String> = Cache::new(config);
    cache.start().await;

    cache.preload("k".to_string()).await.unwrap();
    let value = cache.read("k".to_string(), Duration::from_millis(1000)).await.unwrap();
    assert_eq!(value, "v0");

    cache.write_if_cached(&"k".to_string(), "U1".to_string()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(store.writes.load(Ordering::SeqCst), 1, "expected exactly one write");
    assert_eq!(store.rows.lock().unwrap().get("k").unwrap(), "v0+U1");

    let value = cache.read("k".to_string(), Duration::from_millis(1000)).await.unwrap();
    assert!(value.contains("U1"), "expected cached value to still reflect U1, got {value}");

    cache.shutdown(Duration::from_millis(200)).await;
}

/// Scenario 2: resync too late — updates collected during an in-flight
/// resync exceed `maxUpdatesToCollect`; `ClearReadPendingStatus` discards the
/// storage snapshot and leaves the in-memory value untouched.
#[tokio::test]
async fn resync_too_late_clears_without_setting_storage_value() {
    let store = FakeStore::with_resync_delay(Duration::from_millis(150));
    store.seed("k", "v0");

    let too_late_count = Arc::new(AtomicU32::new(0));
    let too_late_count_listener = too_late_count.clone();

    let config = CacheConfigBuilder::new()
        .cache_name("toolate")
        .main_queue_cache_time(Duration::from_millis(20))
        .main_queue_cache_time_min(Duration::from_millis(10))
        .return_queue_cache_time_min(Duration::from_millis(10))
        .max_updates_to_collect(2)
        .resync_too_late_action(ResyncTooLateAction::ClearReadPendingStatus)
        .read_thread_pool_size(PoolSize::Bounded { min: 1, max: 2 })
        .write_thread_pool_size(PoolSize::Bounded { min: 1, max: 2 })
        .on_event(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::ResyncTooLate { .. }) {
                too_late_count_listener.fetch_add(1, Ordering::SeqCst);
            }
        })
        .adapter(store.clone())
        .build()
        .unwrap();

    let cache: Cache<String, String, String, String, (String, String), String> = Cache::new(config);
    cache.start().await;

    cache.preload("k".to_string()).await.unwrap();
    let initial = cache.read("k".to_string(), Duration::from_millis(1000)).await.unwrap();
    assert_eq!(initial, "v0");

    // Wait for the entry to cycle back to Ready with no pending updates, so
    // the processor loop picks the resync branch (not write) on its next
    // pass, then give the resync time to actually start.
    tokio::time::sleep(Duration::from_millis(60)).await;

    cache.write_if_cached(&"k".to_string(), "A".to_string()).await.unwrap();
    cache.write_if_cached(&"k".to_string(), "B".to_string()).await.unwrap();
    cache.write_if_cached(&"k".to_string(), "C".to_string()).await.unwrap();

    // Let the in-flight resync (150ms delay) complete and the too-late
    // policy apply.
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(too_late_count.load(Ordering::SeqCst), 1, "expected resync_too_late to fire exactly once");

    let status = cache.get_status(Duration::ZERO).await;
    assert_eq!(status.resync_too_late_count, 1);

    // ClearReadPendingStatus discards the storage snapshot and leaves the
    // collected updates in place rather than writing them to storage.
    assert_eq!(store.rows.lock().unwrap().get("k").unwrap(), "v0", "storage must be untouched by ClearReadPendingStatus");

    cache.shutdown(Duration::from_millis(200)).await;
}

/// Scenario 6: hard cache cap — a third preload is rejected with
/// `CacheFull` until an existing entry is evicted via the Return Queue.
#[tokio::test]
async fn hard_cache_cap_rejects_until_eviction() {
    let store = FakeStore::new();
    store.seed("k1", "v1");
    store.seed("k2", "v2");
    store.seed("k3", "v3");

    let config = CacheConfigBuilder::new()
        .cache_name("capped")
        .max_cache_elements_hard_limit(2)
        .main_queue_cache_time(Duration::from_millis(20))
        .main_queue_cache_time_min(Duration::from_millis(10))
        .return_queue_cache_time_min(Duration::from_millis(20))
        .untouched_item_cache_expiration_delay(Duration::from_millis(20))
        .return_queue_max_requeue_count(1)
        .read_thread_pool_size(PoolSize::Bounded { min: 1, max: 2 })
        .write_thread_pool_size(PoolSize::Bounded { min: 1, max: 2 })
        .adapter(store.clone())
        .build()
        .unwrap();

    let cache: Cache<String, String, String, String, (String, String), String> = Cache::new(config);
    cache.start().await;

    cache.preload("k1".to_string()).await.unwrap();
    cache.preload("k2".to_string()).await.unwrap();
    cache.read("k1".to_string(), Duration::from_millis(500)).await.unwrap();
    cache.read("k2".to_string(), Duration::from_millis(500)).await.unwrap();

    let err = cache.preload("k3".to_string()).await.unwrap_err();
    assert!(matches!(err, wbrb_cache::error::CacheError::CacheFull));

    // k1 isn't touched again; it cycles Ready -> resync -> Return Queue ->
    // eviction (untouched_item_cache_expiration_delay) while k2 keeps
    // getting read.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    let mut evicted = false;
    while tokio::time::Instant::now() < deadline {
        cache.read("k2".to_string(), Duration::from_millis(50)).await.ok();
        if cache.preload("k3".to_string()).await.is_ok() {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(evicted, "expected k3 to eventually be admitted once k1 was evicted");

    cache.shutdown(Duration::from_millis(200)).await;
}
