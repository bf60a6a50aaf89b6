//! Request state, handles, and the per-request dispatch attempt (spec.md §3.2, §4.3).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::DispatchError;

/// The state of one in-flight or completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    /// Accepted onto the Main Queue, not yet claimed by a worker.
    Pending = 0,
    /// Claimed by the dispatch loop, waiting for a free worker.
    WaitingForWorker = 1,
    /// Holding a worker, waiting for a rate-limit token.
    WaitingForToken = 2,
    /// `process` is currently executing.
    InFlight = 3,
    /// Waiting in the delay-queue chain for a retry.
    Delayed = 4,
    /// Deadline passed before a successful dispatch.
    TimedOut = 5,
    /// Exhausted attempts or received a fatal failure.
    FailedFinal = 6,
    /// Completed successfully.
    Succeeded = 7,
    /// Cancelled by the caller.
    Cancelled = 8,
}

impl RequestState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RequestState::Pending,
            1 => RequestState::WaitingForWorker,
            2 => RequestState::WaitingForToken,
            3 => RequestState::InFlight,
            4 => RequestState::Delayed,
            5 => RequestState::TimedOut,
            6 => RequestState::FailedFinal,
            7 => RequestState::Succeeded,
            8 => RequestState::Cancelled,
            other => unreachable!("invalid RequestState encoding: {other}"),
        }
    }

    /// Whether this is a terminal state; once reached it never changes
    /// again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::TimedOut | RequestState::FailedFinal | RequestState::Succeeded | RequestState::Cancelled
        )
    }
}

pub(crate) struct AtomicRequestState(AtomicU8);

impl AtomicRequestState {
    pub(crate) fn new(initial: RequestState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub(crate) fn load(&self) -> RequestState {
        RequestState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: RequestState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// One submitted unit of work moving through the dispatcher.
pub(crate) struct Task<P, E> {
    pub(crate) id: u64,
    pub(crate) payload: P,
    pub(crate) submitted_at: Instant,
    pub(crate) deadline_at: Instant,
    pub(crate) attempt: u32,
    pub(crate) state: Arc<AtomicRequestState>,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) result_tx: Option<oneshot::Sender<Result<(), DispatchError<E>>>>,
}

impl<P, E> Task<P, E> {
    pub(crate) fn complete(&mut self, state: RequestState, result: Result<(), DispatchError<E>>) {
        self.state.store(state);
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(result);
        }
    }
}

/// A handle to a submitted request: awaitable, cancellable, and queryable.
///
/// Mirrors the "Future with task reference" pattern named in spec.md §9,
/// generalized into a plain async handle rather than a blocking future.
pub struct Handle<E> {
    id: u64,
    state: Arc<AtomicRequestState>,
    cancelled: Arc<AtomicBool>,
    result_rx: oneshot::Receiver<Result<(), DispatchError<E>>>,
}

impl<E> Handle<E> {
    pub(crate) fn new(
        id: u64,
        state: Arc<AtomicRequestState>,
        cancelled: Arc<AtomicBool>,
        result_rx: oneshot::Receiver<Result<(), DispatchError<E>>>,
    ) -> Self {
        Self { id, state, cancelled, result_rx }
    }

    /// The id assigned to this request at submission time.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The request's current state.
    pub fn state(&self) -> RequestState {
        self.state.load()
    }

    /// Requests cancellation. Takes effect the next time the dispatcher
    /// loop or a worker observes the cancelled flag; already in-flight
    /// processing is not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Waits up to `timeout` for the request to complete.
    pub async fn await_result(self, timeout: Duration) -> Result<(), DispatchError<E>> {
        match tokio::time::timeout(timeout, self.result_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled_sender)) => Err(DispatchError::Internal("result sender dropped".into())),
            Err(_elapsed) => Err(DispatchError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_match_spec() {
        assert!(RequestState::Succeeded.is_terminal());
        assert!(RequestState::FailedFinal.is_terminal());
        assert!(RequestState::TimedOut.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
        assert!(!RequestState::Pending.is_terminal());
        assert!(!RequestState::Delayed.is_terminal());
    }

    #[tokio::test]
    async fn handle_await_result_returns_sent_value() {
        let (tx, rx) = oneshot::channel::<Result<(), DispatchError<String>>>();
        let state = Arc::new(AtomicRequestState::new(RequestState::Succeeded));
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = Handle::new(1, state, cancelled, rx);

        tx.send(Ok(())).unwrap();
        assert!(handle.await_result(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn handle_cancel_sets_flag() {
        let (_tx, rx) = oneshot::channel::<Result<(), DispatchError<String>>>();
        let state = Arc::new(AtomicRequestState::new(RequestState::Pending));
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = Handle::new(1, state, cancelled.clone(), rx);

        handle.cancel();
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
