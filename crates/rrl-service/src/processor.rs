//! The request-processing contract (spec.md §6.2).

use futures::future::BoxFuture;

/// Outcome of [`Processor::classify_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureClass {
    /// Whether another attempt should be scheduled (subject to `maxAttempts`).
    pub retriable: bool,
    /// Whether this failure should bypass retry entirely and surface as
    /// `ProcessorFatal` immediately, regardless of remaining attempts.
    pub fatal: bool,
    /// Whether this failure should be reported as a deadline timeout rather
    /// than a processor failure (e.g. the processor itself detected it ran
    /// past the caller's deadline).
    pub timeout: bool,
}

impl FailureClass {
    /// A transient failure: retry if attempts remain.
    pub fn retriable() -> Self {
        Self { retriable: true, fatal: false, timeout: false }
    }

    /// A failure that should never be retried.
    pub fn fatal() -> Self {
        Self { retriable: false, fatal: true, timeout: false }
    }

    /// A failure that should be reported as a timeout.
    pub fn timeout() -> Self {
        Self { retriable: false, fatal: false, timeout: true }
    }
}

/// User-supplied request processing, consumed by [`crate::RrlService`].
///
/// `P` is the request payload type and `E` the processor's failure type.
pub trait Processor<P, E>: Send + Sync + 'static {
    /// Processes one request attempt.
    fn process(&self, payload: &P) -> BoxFuture<'_, Result<(), E>>;

    /// Classifies a failure from `process`, given the attempt number (1-based)
    /// and elapsed time since the request was first submitted.
    fn classify_failure(&self, failure: &E, attempt: u32, elapsed: std::time::Duration) -> FailureClass;
}
