//! The WBRB cache error taxonomy (spec.md §7).

use thiserror::Error;

/// Errors returned by [`crate::Cache`] operations.
///
/// `A` is the storage adapter's own error type, surfaced when a read/write/
/// resync attempt is exhausted and must be reported to the caller rather
/// than retried internally.
#[derive(Debug, Error, Clone)]
pub enum CacheError<A> {
    /// The operation did not complete within its caller-supplied timeout.
    #[error("cache operation timed out")]
    Timeout,

    /// The Main Queue is at `maxCacheElementsHardLimit` and cannot accept
    /// a new key.
    #[error("cache is full")]
    CacheFull,

    /// The key has no entry and the operation does not implicitly create one.
    #[error("item not present in cache")]
    ItemNotPresent,

    /// The initial read failed and exhausted `readFailureMaxRetryCount`,
    /// with `initialReadFailedFinalAction == KeepAndThrow`.
    #[error("read failed permanently: {0}")]
    ReadFailedFinal(A),

    /// Resync failed and exhausted `fullCacheCycleFailureMaxRetryCount`,
    /// with `resyncFailedFinalAction` forbidding further reads.
    #[error("resync failed permanently: {0}")]
    ResyncFailedFinal(A),

    /// The entry was evicted from the cache while the caller was waiting
    /// on it (or had already been evicted when the call started).
    #[error("item was removed from the cache")]
    RemovedFromCache,

    /// The current control/lifecycle status forbids the requested
    /// operation (e.g. a write against an entry in `ReadFailedFinal`).
    #[error("cache control state forbids this operation")]
    ControlStateForbids,

    /// A [`crate::config::CacheConfig`] was built with contradictory or
    /// out-of-range values.
    #[error("invalid cache configuration: {0}")]
    ConfigurationInvalid(String),

    /// An invariant the cache relies on was violated; this always
    /// indicates a bug rather than a transient condition.
    #[error("internal cache invariant violated: {0}")]
    Internal(String),

    /// A storage-adapter call failed and retries were not applicable
    /// (e.g. `writeIfCached` against a storage error that doesn't go
    /// through the retrying write pipeline).
    #[error("storage adapter error: {0}")]
    Adapter(A),
}

impl<A> CacheError<A> {
    /// Returns `true` if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::Timeout)
    }

    /// Returns `true` if this indicates the cache rejected an insert due to
    /// its hard size limit.
    pub fn is_cache_full(&self) -> bool {
        matches!(self, CacheError::CacheFull)
    }

    /// Returns `true` if this is any of the three permanent-failure/removal
    /// variants that mean the entry will never become readable again
    /// without a fresh `preload`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CacheError::ReadFailedFinal(_)
                | CacheError::ResyncFailedFinal(_)
                | CacheError::RemovedFromCache
        )
    }
}
