//! The RRL dispatch error taxonomy (spec.md §7).

use thiserror::Error;

/// Errors returned by [`crate::RrlService`] operations.
///
/// `E` is the processor's own failure type, surfaced once retries are
/// exhausted or the processor reports a non-retriable failure.
#[derive(Debug, Error, Clone)]
pub enum DispatchError<E> {
    /// The control state currently in effect rejects new submissions.
    #[error("request rejected by control state: {0}")]
    Rejected(String),

    /// The Main Queue is at `maxPendingRequests`.
    #[error("dispatch queue is full")]
    QueueFull,

    /// The request's deadline passed before it could be dispatched
    /// successfully.
    #[error("request timed out")]
    Timeout,

    /// `maxAttempts` was reached without a successful dispatch, and the
    /// last failure was classified as retriable (not fatal).
    #[error("attempts exhausted after {attempts} tries: {last}")]
    AttemptsExhausted { attempts: u32, last: E },

    /// The caller cancelled the request's handle.
    #[error("request cancelled")]
    Cancelled,

    /// The service is in spooldown or has already shut down.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// The processor reported a fatal (non-retriable) failure.
    #[error("processor reported a fatal failure: {0}")]
    ProcessorFatal(E),

    /// An invariant the dispatcher relies on was violated.
    #[error("internal dispatcher invariant violated: {0}")]
    Internal(String),
}

impl<E> DispatchError<E> {
    /// Returns `true` if this is a deadline-related failure (either
    /// `Timeout` or `AttemptsExhausted` with the deadline already passed is
    /// reported as `Timeout` by the dispatcher, so this only matches the
    /// `Timeout` variant itself).
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout)
    }

    /// Returns `true` if the request will never be retried internally.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout
                | DispatchError::AttemptsExhausted { .. }
                | DispatchError::Cancelled
                | DispatchError::ProcessorFatal(_)
        )
    }
}
