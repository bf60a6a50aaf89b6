//! Per-key cache entry and its lifecycle state machine (spec.md §3.1, §4.1).

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use tokio::sync::RwLock;

/// The lifecycle status of a single cache entry.
///
/// Transitions are driven entirely by the Main Queue processor and the
/// read/write/resync worker pools; spec.md §4.1 enumerates the legal edges.
/// `NotPresent` is a logical state (no entry exists) rather than one ever
/// stored on an entry; it is included here so status snapshots and the
/// `AtomicU8` encoding have a complete, contiguous variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleStatus {
    /// No entry exists for the key.
    NotPresent = 0,
    /// The initial read from storage is in flight.
    ReadPending = 1,
    /// A value is cached and considered current.
    Ready = 2,
    /// A write-out to storage is in flight; no resync is queued behind it.
    WritePending = 3,
    /// A write-out is in flight and a resync has already been scheduled to
    /// follow it.
    WritePendingResyncScheduled = 4,
    /// A resync (storage re-read for reconciliation) is in flight.
    ResyncPending = 5,
    /// The write request has been handed to the storage adapter and a
    /// result is awaited.
    WriteSent = 6,
    /// The resync request has been handed to the storage adapter and a
    /// result is awaited.
    ResyncSent = 7,
    /// The initial read failed permanently
    /// (`readFailureMaxRetryCount` exhausted).
    ReadFailedFinal = 8,
    /// Resync failed permanently
    /// (`fullCacheCycleFailureMaxRetryCount` exhausted).
    ResyncFailedFinal = 9,
    /// The entry has been removed from the cache; any task still holding a
    /// reference must treat it as gone.
    Removed = 10,
}

impl LifecycleStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleStatus::NotPresent,
            1 => LifecycleStatus::ReadPending,
            2 => LifecycleStatus::Ready,
            3 => LifecycleStatus::WritePending,
            4 => LifecycleStatus::WritePendingResyncScheduled,
            5 => LifecycleStatus::ResyncPending,
            6 => LifecycleStatus::WriteSent,
            7 => LifecycleStatus::ResyncSent,
            8 => LifecycleStatus::ReadFailedFinal,
            9 => LifecycleStatus::ResyncFailedFinal,
            10 => LifecycleStatus::Removed,
            other => unreachable!("invalid LifecycleStatus encoding: {other}"),
        }
    }

    /// Returns `true` if a cached value can be served to `read` callers
    /// while the entry is in this state.
    pub fn is_readable(self) -> bool {
        matches!(
            self,
            LifecycleStatus::Ready
                | LifecycleStatus::WritePending
                | LifecycleStatus::WritePendingResyncScheduled
                | LifecycleStatus::ResyncPending
                | LifecycleStatus::WriteSent
                | LifecycleStatus::ResyncSent
        )
    }

    /// Returns `true` if this is one of the two permanent-failure states.
    pub fn is_failed_final(self) -> bool {
        matches!(self, LifecycleStatus::ReadFailedFinal | LifecycleStatus::ResyncFailedFinal)
    }
}

/// Lock-free mirror of an entry's [`LifecycleStatus`], so status snapshots
/// and backpressure checks don't need to take the entry lock.
pub(crate) struct AtomicLifecycleStatus(AtomicU8);

impl AtomicLifecycleStatus {
    pub(crate) fn new(initial: LifecycleStatus) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub(crate) fn load(&self) -> LifecycleStatus {
        LifecycleStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, status: LifecycleStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// The in-memory payload of a cache entry: the current value plus the
/// updates collected since the last write-out or resync began.
pub struct CachePayload<V, U> {
    /// The current in-memory value, absent only before the initial read
    /// completes.
    pub value: Option<V>,
    /// Updates applied via `writeIfCached` since the last flush, in the
    /// order received.
    pub pending_updates: Vec<U>,
}

impl<V, U> CachePayload<V, U> {
    fn empty() -> Self {
        Self {
            value: None,
            pending_updates: Vec::new(),
        }
    }
}

/// A single cache entry: an atomic status mirror plus an `RwLock`-guarded
/// payload.
///
/// spec.md §5 requires that storage adapter calls never be made while
/// holding the entry lock: callers read out what they need (or swap in the
/// result of a completed adapter call) and then release the lock before
/// awaiting the adapter.
pub struct CacheEntry<V, U, A> {
    pub(crate) status: AtomicLifecycleStatus,
    pub(crate) payload: RwLock<CachePayload<V, U>>,
    pub(crate) last_touched_at: RwLock<Instant>,
    pub(crate) creation_cycle_count: AtomicU8,
    pub(crate) read_failure_count: AtomicU8,
    pub(crate) write_failure_count: AtomicU8,
    pub(crate) resync_failure_count: AtomicU8,
    pub(crate) requeue_count: AtomicU8,
    /// The adapter error that most recently drove this entry into
    /// `ReadFailedFinal`/`ResyncFailedFinal`, so the failure can be reported
    /// to callers instead of discarded.
    pub(crate) last_error: RwLock<Option<A>>,
}

impl<V, U, A> CacheEntry<V, U, A> {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            status: AtomicLifecycleStatus::new(LifecycleStatus::ReadPending),
            payload: RwLock::new(CachePayload::empty()),
            last_touched_at: RwLock::new(now),
            creation_cycle_count: AtomicU8::new(0),
            read_failure_count: AtomicU8::new(0),
            write_failure_count: AtomicU8::new(0),
            resync_failure_count: AtomicU8::new(0),
            requeue_count: AtomicU8::new(0),
            last_error: RwLock::new(None),
        }
    }

    /// The entry's current lifecycle status, without taking any lock.
    pub fn status(&self) -> LifecycleStatus {
        self.status.load()
    }

    pub(crate) fn transition_to(&self, to: LifecycleStatus) -> LifecycleStatus {
        let from = self.status.load();
        self.status.store(to);
        from
    }
}
