use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use wbrb_cache::{Cache, CacheConfigBuilder, CacheEvent, PoolSize, StorageAdapter};

/// A toy backing store for a page-view counter: keys are page names, values
/// are running totals, updates are increments. Writes are deliberately slow
/// to make the write-behind behavior visible.
struct PageViewStore {
    rows: Mutex<HashMap<String, u64>>,
    writes: AtomicU64,
}

impl PageViewStore {
    fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    fn seed(&self, page: &str, views: u64) {
        self.rows.lock().unwrap().insert(page.to_string(), views);
    }
}

impl StorageAdapter<String, u64, u64, u64, (String, u64)> for PageViewStore {
    type Error = String;

    fn read(&self, key: &String) -> BoxFuture<'_, Result<u64, String>> {
        let value = self.rows.lock().unwrap().get(key).copied().unwrap_or(0);
        Box::pin(async move { Ok(value) })
    }

    fn write(&self, data: (String, u64)) -> BoxFuture<'_, Result<(), String>> {
        let (key, value) = data;
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().unwrap().insert(key, value);
            Ok(())
        })
    }

    fn resync(&self, key: &String) -> BoxFuture<'_, Result<u64, String>> {
        let value = self.rows.lock().unwrap().get(key).copied().unwrap_or(0);
        Box::pin(async move { Ok(value) })
    }

    fn convert_to_cache_value(&self, raw: u64) -> u64 {
        raw
    }

    fn apply_update(&self, value: u64, update: &u64) -> u64 {
        value + update
    }

    fn split_for_write(&self, key: &String, value: &u64, _pending_updates: &[u64]) -> ((String, u64), Vec<u64>) {
        ((key.clone(), *value), Vec::new())
    }

    fn merge_after_resync(&self, value_memory: u64, value_storage: u64, updates_since_resync_start: &[u64]) -> u64 {
        let _ = value_memory;
        updates_since_resync_start.iter().sum::<u64>() + value_storage
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("WBRB Cache Example");
    println!("==================\n");

    let store = Arc::new(PageViewStore::new());
    store.seed("/home", 100);
    store.seed("/about", 10);

    let config = CacheConfigBuilder::new()
        .cache_name("pageviews")
        .main_queue_cache_time(Duration::from_millis(200))
        .main_queue_cache_time_min(Duration::from_millis(50))
        .return_queue_cache_time_min(Duration::from_millis(200))
        .read_thread_pool_size(PoolSize::Bounded { min: 1, max: 4 })
        .write_thread_pool_size(PoolSize::Bounded { min: 1, max: 4 })
        .on_event(|event: &CacheEvent| match event {
            CacheEvent::Hit { key, .. } => println!("  [EVENT] hit {key}"),
            CacheEvent::Miss { key, .. } => println!("  [EVENT] miss {key}"),
            CacheEvent::WriteScheduled { key, .. } => println!("  [EVENT] write scheduled for {key}"),
            CacheEvent::ResyncScheduled { key, .. } => println!("  [EVENT] resync scheduled for {key}"),
            CacheEvent::Eviction { key, .. } => println!("  [EVENT] evicted {key}"),
            _ => {}
        })
        .adapter(store.clone())
        .build()
        .map_err(|e| format!("invalid cache configuration: {e}"))?;

    let cache: Cache<String, u64, u64, u64, (String, u64), String> = Cache::new(config);
    cache.start().await;

    println!("Test 1: preload and read /home");
    cache.preload("/home".to_string()).await.map_err(|e| format!("{e}"))?;
    let views = cache.read("/home".to_string(), Duration::from_secs(1)).await.map_err(|e| format!("{e}"))?;
    println!("  /home has {views} views\n");

    println!("Test 2: same read again (served from memory)");
    let views = cache.read("/home".to_string(), Duration::from_secs(1)).await.map_err(|e| format!("{e}"))?;
    println!("  /home has {views} views\n");

    println!("Test 3: record three increments without blocking on storage");
    cache.write_if_cached(&"/home".to_string(), 1).await.map_err(|e| format!("{e}"))?;
    cache.write_if_cached(&"/home".to_string(), 1).await.map_err(|e| format!("{e}"))?;
    cache.write_if_cached(&"/home".to_string(), 1).await.map_err(|e| format!("{e}"))?;
    let views = cache.read("/home".to_string(), Duration::from_secs(1)).await.map_err(|e| format!("{e}"))?;
    println!("  /home reflects the increments immediately: {views} views\n");

    println!("Test 4: wait for the background flush to reach storage");
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("  storage has been written {} time(s) so far\n", store.writes.load(Ordering::SeqCst));

    println!("Test 5: status snapshot");
    let status = cache.get_status(Duration::ZERO).await;
    println!(
        "  main_queue_size={} return_queue_size={} reads_completed={} evictions={}\n",
        status.main_queue_size, status.return_queue_size, status.reads_completed, status.evictions
    );

    cache.shutdown(Duration::from_secs(1)).await;
    println!("Shutdown complete.");

    Ok(())
}
