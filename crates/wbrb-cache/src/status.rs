//! Monitoring snapshot surface (spec.md §4.1 "status/monitoring surface").

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// A point-in-time snapshot of cache health, returned by
/// [`crate::Cache::get_status`].
///
/// Counters are cumulative since the cache was created; per-stage sizes are
/// instantaneous at the time the snapshot was computed.
#[derive(Debug, Clone, Default)]
pub struct CacheStatusSnapshot {
    /// Number of entries currently in the Main Queue.
    pub main_queue_size: usize,
    /// Number of entries currently in the Return Queue.
    pub return_queue_size: usize,
    /// Total successful reads since startup.
    pub reads_completed: u64,
    /// Total read retries since startup.
    pub read_retries: u64,
    /// Total write retries since startup.
    pub write_retries: u64,
    /// Total resync retries since startup.
    pub resync_retries: u64,
    /// Total resyncs that returned after `maxUpdatesToCollect` was already
    /// exceeded and were handled via `resyncTooLateAction` instead of a
    /// normal merge.
    pub resync_too_late_count: u64,
    /// Total entries currently in `ReadFailedFinal` or `ResyncFailedFinal`.
    pub failed_final_count: u64,
    /// Total evictions since startup.
    pub evictions: u64,
    /// Total inserts rejected due to `maxCacheElementsHardLimit`.
    pub cache_full_rejections: u64,
    /// Buckets of entry count by how many full cache cycles each entry has
    /// survived, aligned with `monitoringFullCacheCyclesThresholds`.
    pub full_cycle_buckets: [u64; 5],
    /// Buckets of entry count by time since last access, aligned with
    /// `monitoringTimeSinceAccessThresholds`.
    pub time_since_access_buckets: [u64; 5],
}

/// Atomic counters backing a [`CacheStatusSnapshot`], updated on the hot
/// path, plus a cached last-computed snapshot so repeated `get_status`
/// calls within `max_age` don't recompute anything (spec.md:
/// `getStatus(maxAgeMs)`).
pub(crate) struct StatusCounters {
    pub(crate) reads_completed: AtomicU64,
    pub(crate) read_retries: AtomicU64,
    pub(crate) write_retries: AtomicU64,
    pub(crate) resync_retries: AtomicU64,
    pub(crate) resync_too_late: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) cache_full_rejections: AtomicU64,
    cached: RwLock<Option<(Instant, CacheStatusSnapshot)>>,
}

impl StatusCounters {
    pub(crate) fn new() -> Self {
        Self {
            reads_completed: AtomicU64::new(0),
            read_retries: AtomicU64::new(0),
            write_retries: AtomicU64::new(0),
            resync_retries: AtomicU64::new(0),
            resync_too_late: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            cache_full_rejections: AtomicU64::new(0),
            cached: RwLock::new(None),
        }
    }

    /// Returns the cached snapshot if it is no older than `max_age`,
    /// otherwise computes a fresh one via `compute` and caches it.
    pub(crate) async fn get_or_compute<F>(&self, now: Instant, max_age: Duration, compute: F) -> CacheStatusSnapshot
    where
        F: FnOnce() -> CacheStatusSnapshot,
    {
        {
            let cached = self.cached.read().await;
            if let Some((taken_at, snapshot)) = cached.as_ref() {
                if now.duration_since(*taken_at) <= max_age {
                    return snapshot.clone();
                }
            }
        }

        let snapshot = compute();
        let mut cached = self.cached.write().await;
        *cached = Some((now, snapshot.clone()));
        snapshot
    }

    pub(crate) fn record_read_completed(&self) {
        self.reads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_retry(&self) {
        self.read_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_retry(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resync_retry(&self) {
        self.resync_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resync_too_late(&self) {
        self.resync_too_late.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_full_rejection(&self) {
        self.cache_full_rejections.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caches_snapshot_within_max_age() {
        let counters = StatusCounters::new();
        let now = Instant::now();
        let mut calls = 0;

        let first = counters
            .get_or_compute(now, Duration::from_secs(10), || {
                calls += 1;
                CacheStatusSnapshot {
                    main_queue_size: 1,
                    ..Default::default()
                }
            })
            .await;
        assert_eq!(first.main_queue_size, 1);

        let second = counters
            .get_or_compute(now + Duration::from_millis(1), Duration::from_secs(10), || {
                calls += 1;
                CacheStatusSnapshot {
                    main_queue_size: 2,
                    ..Default::default()
                }
            })
            .await;

        assert_eq!(second.main_queue_size, 1, "cached snapshot should be reused");
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn recomputes_after_max_age_elapses() {
        let counters = StatusCounters::new();
        let now = Instant::now();

        counters
            .get_or_compute(now, Duration::from_millis(10), || CacheStatusSnapshot::default())
            .await;

        let refreshed = counters
            .get_or_compute(now + Duration::from_millis(20), Duration::from_millis(10), || CacheStatusSnapshot {
                main_queue_size: 7,
                ..Default::default()
            })
            .await;

        assert_eq!(refreshed.main_queue_size, 7);
    }
}
