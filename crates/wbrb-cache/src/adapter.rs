//! The storage adapter contract (spec.md §6.1).
//!
//! The cache never talks to the authoritative store directly; all of that
//! goes through a [`StorageAdapter`] the caller provides. Implementations
//! must be thread-safe: the cache invokes adapter methods for distinct keys
//! in parallel, but guarantees it never invokes `read`/`write`/`resync` for
//! the *same* key concurrently (spec.md §3.1, §5).

use futures::future::BoxFuture;

/// External storage collaborator for a [`crate::Cache`].
///
/// `K` is the key type, `V` the in-memory value type, `U` an
/// application-defined update/delta, `R` the raw read payload and `W` the
/// write payload.
pub trait StorageAdapter<K, V, U, R, W>: Send + Sync + 'static {
    /// The error type returned by `read`/`write`/`resync`.
    type Error: std::fmt::Display + std::fmt::Debug + Send + Sync + Clone + 'static;

    /// Reads the authoritative value for `key`, used to populate a cache
    /// entry the first time it's accessed.
    fn read(&self, key: &K) -> BoxFuture<'_, Result<R, Self::Error>>;

    /// Writes `data` to the authoritative store.
    fn write(&self, data: W) -> BoxFuture<'_, Result<(), Self::Error>>;

    /// Re-reads the authoritative value for `key` for background
    /// reconciliation (spec.md's "resync").
    fn resync(&self, key: &K) -> BoxFuture<'_, Result<R, Self::Error>>;

    /// Converts a storage read payload into the in-memory value
    /// representation.
    fn convert_to_cache_value(&self, raw: R) -> V;

    /// Applies update `u` to in-memory value `value`, producing the next
    /// in-memory value (`V' = apply(V,U)`, spec.md §3.1).
    fn apply_update(&self, value: V, update: &U) -> V;

    /// Produces the next write payload for `key` from the current
    /// in-memory `value` and the queue of `pending_updates` collected so
    /// far, along with the updates that should remain pending afterward
    /// (spec.md's `splitForWrite`).
    fn split_for_write(&self, key: &K, value: &V, pending_updates: &[U]) -> (W, Vec<U>);

    /// Merges the in-memory value with a freshly resynced storage snapshot,
    /// reapplying `updates_since_resync_start` that were collected while the
    /// resync was in flight (spec.md's `mergeAfterResync`).
    fn merge_after_resync(&self, value_memory: V, value_storage: R, updates_since_resync_start: &[U]) -> V;
}
