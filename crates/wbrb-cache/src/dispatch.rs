//! Bounded worker pools for read/write/resync dispatch (spec.md §4.2).
//!
//! A pool is a concurrency limiter, not a fixed set of long-lived threads:
//! `max` permits are issued via a semaphore and the queue processor spawns
//! one task per dispatched item, matching how async Rust actually gets
//! concurrency (a pool of pre-spawned worker *tasks* buys nothing over the
//! runtime's own scheduler). `min` is retained for status reporting only,
//! matching the `[min, max]` pair named in spec.md.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, TryAcquireError};

use crate::config::PoolSize;

/// A handle to a bounded dispatch pool, or the inline sentinel.
pub(crate) enum Dispatcher {
    /// Work runs inline, on the caller's own task.
    Inline,
    /// Work is gated by a semaphore sized to `max` permits.
    Bounded { min: usize, semaphore: Arc<Semaphore> },
}

/// Returned by [`Dispatcher::try_dispatch`] when every permit is currently
/// held.
pub(crate) struct PoolSaturated;

impl Dispatcher {
    pub(crate) fn new(size: PoolSize) -> Self {
        match size {
            PoolSize::Inline => Dispatcher::Inline,
            PoolSize::Bounded { min, max } => Dispatcher::Bounded {
                min,
                semaphore: Arc::new(Semaphore::new(max)),
            },
        }
    }

    /// Minimum worker count for status reporting; `0` for inline dispatch.
    pub(crate) fn min_workers(&self) -> usize {
        match self {
            Dispatcher::Inline => 0,
            Dispatcher::Bounded { min, .. } => *min,
        }
    }

    /// Number of permits not currently in use; always `0` for inline
    /// dispatch since there is no separate worker to be idle.
    pub(crate) fn available_permits(&self) -> usize {
        match self {
            Dispatcher::Inline => 0,
            Dispatcher::Bounded { semaphore, .. } => semaphore.available_permits(),
        }
    }

    /// Attempts to acquire a permit without waiting. `Inline` always
    /// succeeds with no permit to hold.
    pub(crate) fn try_dispatch(&self) -> Result<Option<tokio::sync::OwnedSemaphorePermit>, PoolSaturated> {
        match self {
            Dispatcher::Inline => Ok(None),
            Dispatcher::Bounded { semaphore, .. } => match semaphore.clone().try_acquire_owned() {
                Ok(permit) => Ok(Some(permit)),
                Err(TryAcquireError::NoPermits) => Err(PoolSaturated),
                Err(TryAcquireError::Closed) => Err(PoolSaturated),
            },
        }
    }

    /// Waits up to `max_wait` for a permit, for use when
    /// `mainQueueMaxRequestHandoverWaitTime` allows the processor to block
    /// briefly rather than immediately re-queueing.
    pub(crate) async fn dispatch_with_wait(
        &self,
        max_wait: Duration,
    ) -> Result<(Option<tokio::sync::OwnedSemaphorePermit>, Duration), PoolSaturated> {
        let started = Instant::now();
        match self {
            Dispatcher::Inline => Ok((None, Duration::ZERO)),
            Dispatcher::Bounded { semaphore, .. } => {
                match tokio::time::timeout(max_wait, semaphore.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => Ok((Some(permit), started.elapsed())),
                    _ => Err(PoolSaturated),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_dispatch_never_saturates() {
        let d = Dispatcher::new(PoolSize::Inline);
        assert!(d.try_dispatch().unwrap().is_none());
        assert_eq!(d.min_workers(), 0);
    }

    #[test]
    fn bounded_dispatch_saturates_at_max() {
        let d = Dispatcher::new(PoolSize::Bounded { min: 1, max: 1 });
        let permit = d.try_dispatch().unwrap();
        assert!(permit.is_some());
        assert!(d.try_dispatch().is_err());
        drop(permit);
        assert!(d.try_dispatch().is_ok());
    }

    #[tokio::test]
    async fn dispatch_with_wait_times_out_when_saturated() {
        let d = Dispatcher::new(PoolSize::Bounded { min: 1, max: 1 });
        let _held = d.try_dispatch().unwrap();
        let result = d.dispatch_with_wait(Duration::from_millis(10)).await;
        assert!(result.is_err());
    }
}
