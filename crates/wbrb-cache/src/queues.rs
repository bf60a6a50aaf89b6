//! Main Queue and Return Queue (spec.md §3.1, §4.2).
//!
//! Both queues are time-ordered FIFOs: entries are always appended at the
//! back with a `due_at` no earlier than the current tail, which lets the
//! queue processor just peek the front to find the next actionable key
//! instead of scanning or maintaining a heap.

use std::collections::VecDeque;
use std::time::Instant;

/// One scheduled slot in a queue: a key due for its next lifecycle action
/// no earlier than `due_at`.
pub(crate) struct QueueSlot<K> {
    pub(crate) key: K,
    pub(crate) due_at: Instant,
}

/// A time-ordered FIFO of scheduled keys.
///
/// Used for both the Main Queue (entries due for their next write-out or
/// resync) and the Return Queue (entries sitting out their minimum dwell
/// time before eviction eligibility).
pub(crate) struct TimeQueue<K> {
    slots: VecDeque<QueueSlot<K>>,
}

impl<K> TimeQueue<K> {
    pub(crate) fn new() -> Self {
        Self { slots: VecDeque::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Appends `key` at the back, due at `due_at`.
    ///
    /// Callers are expected to only ever push non-decreasing `due_at`
    /// values (both queues schedule relative to "now + fixed delay"), which
    /// keeps the queue FIFO-ordered by due time without a heap.
    pub(crate) fn push_back(&mut self, key: K, due_at: Instant) {
        self.slots.push_back(QueueSlot { key, due_at });
    }

    /// Removes and returns the front slot if it is due by `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<K> {
        match self.slots.front() {
            Some(slot) if slot.due_at <= now => self.slots.pop_front().map(|s| s.key),
            _ => None,
        }
    }

    /// The `due_at` of the front slot, if any, used by the queue processor
    /// to compute how long it may sleep before the next actionable item.
    pub(crate) fn next_due_at(&self) -> Option<Instant> {
        self.slots.front().map(|s| s.due_at)
    }

    pub(crate) fn iter_keys(&self) -> impl Iterator<Item = &K> {
        self.slots.iter().map(|s| &s.key)
    }
}
