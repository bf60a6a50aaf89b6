//! Observability events emitted by a [`crate::Cache`] (spec.md §7).

use std::time::Duration;

use resilience_core::ResilienceEvent;

use crate::entry::LifecycleStatus;

/// An event describing cache activity, handed to every registered listener.
///
/// Mirrors the lifecycle transitions and failure/backpressure conditions
/// named throughout spec.md §4 and §7. `key` is formatted via `Display`
/// rather than carried generically, so a single listener can be registered
/// across caches keyed by different types.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// `read` was served from memory without blocking on storage.
    Hit { cache_name: String, key: String },
    /// `read` found no usable in-memory entry and had to wait on storage.
    Miss { cache_name: String, key: String },
    /// An entry moved from one lifecycle state to another.
    StateTransition {
        cache_name: String,
        key: String,
        from: LifecycleStatus,
        to: LifecycleStatus,
    },
    /// A read was scheduled (entry moved into `ReadPending`).
    ReadScheduled { cache_name: String, key: String },
    /// A write-out was scheduled for an entry with pending updates.
    WriteScheduled { cache_name: String, key: String },
    /// A resync was scheduled for an entry due for reconciliation.
    ResyncScheduled { cache_name: String, key: String },
    /// A read attempt failed; `retry` is `true` if another attempt will
    /// follow.
    ReadFailed { cache_name: String, key: String, retry: bool },
    /// A write attempt failed; `retry` is `true` if another attempt will
    /// follow.
    WriteFailed { cache_name: String, key: String, retry: bool },
    /// A resync attempt failed; `retry` is `true` if another attempt will
    /// follow.
    ResyncFailed { cache_name: String, key: String, retry: bool },
    /// A resync completed after update collection had already been
    /// truncated; `action` names the configured policy that was applied.
    ResyncTooLate { cache_name: String, key: String, action: &'static str },
    /// An insert was rejected because `maxCacheElementsHardLimit` was
    /// reached.
    CacheFull { cache_name: String, key: String },
    /// An entry was evicted from the Return Queue.
    Eviction { cache_name: String, key: String, requeue_count: u32 },
    /// The Main Queue processor waited longer than
    /// `mainQueueMaxRequestHandoverWaitTime` to hand work to a worker pool.
    HandoverBackpressure { cache_name: String, key: String, waited: Duration },
    /// An invariant violation was detected; always logged at CRITICAL
    /// regardless of throttling state.
    InvariantViolation { cache_name: String, detail: String },
}

impl ResilienceEvent for CacheEvent {
    fn name(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::StateTransition { .. } => "state_transition",
            CacheEvent::ReadScheduled { .. } => "read_scheduled",
            CacheEvent::WriteScheduled { .. } => "write_scheduled",
            CacheEvent::ResyncScheduled { .. } => "resync_scheduled",
            CacheEvent::ReadFailed { .. } => "read_failed",
            CacheEvent::WriteFailed { .. } => "write_failed",
            CacheEvent::ResyncFailed { .. } => "resync_failed",
            CacheEvent::ResyncTooLate { .. } => "resync_too_late",
            CacheEvent::CacheFull { .. } => "cache_full",
            CacheEvent::Eviction { .. } => "eviction",
            CacheEvent::HandoverBackpressure { .. } => "handover_backpressure",
            CacheEvent::InvariantViolation { .. } => "invariant_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_stable() {
        let event = CacheEvent::Hit {
            cache_name: "c".into(),
            key: "k".into(),
        };
        assert_eq!(event.name(), "hit");
    }
}
