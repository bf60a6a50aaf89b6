//! Retry-and-Rate-Limit request dispatcher.
//!
//! [`RrlService`] accepts submitted requests, dispatches them under a
//! token-bucket rate limit and a bounded worker pool, retries failed
//! attempts through a coarse-grained delay-queue chain, and honors
//! per-request deadlines and graceful shutdown ("spooldown").

pub mod backoff;
pub mod budget;
pub mod config;
pub mod control;
pub mod delay_queue;
pub mod error;
pub mod events;
pub mod processor;

mod dispatcher;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;

use resilience_core::{SharedClock, SystemClock, ThrottlingLogger};

pub use config::{PoolSize, RrlConfig, RrlConfigBuilder};
pub use control::{ControlState, ControlStateHandle};
pub use dispatcher::{Handle, RequestState};
pub use error::DispatchError;
pub use events::DispatchEvent;
pub use processor::{FailureClass, Processor};

use delay_queue::DelayQueueChain;
use dispatcher::{AtomicRequestState, Task};
use limiter::TokenBucket;

pub mod limiter;

/// Shutdown mode passed to [`RrlService::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let queued and delayed requests drain normally, subject to the
    /// supplied deadline.
    Normal,
    /// Skip delay-queue waits (equivalent to `ignoreDelays`) so retries
    /// fire immediately, but otherwise let in-flight work finish.
    Quick,
    /// Fail every pending and delayed request immediately with
    /// `ShutdownInProgress`; only already-dispatched attempts are allowed
    /// to finish.
    Immediate,
}

struct Inner<P, Proc, E> {
    config: RrlConfig,
    processor: Arc<Proc>,
    main_queue: Mutex<VecDeque<Task<P, E>>>,
    delay_chain: Mutex<DelayQueueChain<Task<P, E>>>,
    limiter: TokenBucket,
    worker_permits: Arc<Semaphore>,
    control: ControlStateHandle,
    next_id: AtomicU64,
    pending_count: AtomicUsize,
    shutdown_requested: AtomicBool,
    woken: Notify,
    throttle: ThrottlingLogger,
    clock: SharedClock,
}

/// A Retry-and-Rate-Limit request dispatcher.
///
/// `P` is the request payload type, `Proc` the [`Processor`] implementation,
/// and `E` the processor's failure type.
pub struct RrlService<P, Proc, E> {
    inner: Arc<Inner<P, Proc, E>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P, Proc, E> RrlService<P, Proc, E>
where
    P: Send + Sync + 'static,
    Proc: Processor<P, E>,
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    /// Builds a service from `config` and `processor`. The dispatch loop is
    /// not started until [`RrlService::start`] is called.
    pub fn new(config: RrlConfig, processor: Proc) -> Self {
        let limiter = TokenBucket::new(
            config.rate_limiter_bucket_size,
            config.rate_limiter_refill_rate,
            config.rate_limiter_refill_interval,
        );
        let worker_permits = Arc::new(Semaphore::new(config.request_processing_thread_pool_config.max));
        let delay_chain = DelayQueueChain::new(config.delay_queues.clone(), config.delay_queue_too_long_grace_period);
        let clock: SharedClock = Arc::new(SystemClock);
        let throttle = ThrottlingLogger::with_clock(config.service_name.clone(), Duration::from_secs(30), clock.clone());

        let inner = Inner {
            config,
            processor: Arc::new(processor),
            main_queue: Mutex::new(VecDeque::new()),
            delay_chain: Mutex::new(delay_chain),
            limiter,
            worker_permits,
            control: ControlStateHandle::new(),
            next_id: AtomicU64::new(1),
            pending_count: AtomicUsize::new(0),
            shutdown_requested: AtomicBool::new(false),
            woken: Notify::new(),
            throttle,
            clock,
        };

        Self { inner: Arc::new(inner), loop_handle: Mutex::new(None) }
    }

    /// Installs a new control-state snapshot, observed by every subsequent
    /// dispatch/retry decision (spec.md §4.5).
    pub fn set_control_state(&self, state: ControlState) {
        self.inner.control.set(state);
    }

    /// The current control-state snapshot.
    pub fn control_state(&self) -> Arc<ControlState> {
        self.inner.control.get()
    }

    /// Starts the dispatch loop task.
    pub async fn start(&self) {
        let mut guard = self.loop_handle.lock().await;
        if guard.is_some() {
            return;
        }
        let inner = self.inner.clone();
        *guard = Some(tokio::spawn(async move {
            run_dispatch_loop(inner).await;
        }));
    }

    /// Submits `payload` for processing, valid for `valid_for` from now.
    ///
    /// Fails with `Rejected` if the current control state rejects new
    /// submissions, or `QueueFull` if the Main Queue is at
    /// `maxPendingRequests`.
    pub fn submit(&self, payload: P, valid_for: Duration) -> Result<Handle<E>, DispatchError<E>> {
        let control = self.inner.control.get();
        if let Some(reason) = control.reject_requests.clone() {
            self.inner
                .config
                .event_listeners
                .emit(&DispatchEvent::Rejected { service_name: self.inner.config.service_name.clone(), reason: reason.clone() });
            return Err(DispatchError::Rejected(reason));
        }
        if self.inner.shutdown_requested.load(Ordering::SeqCst) {
            return Err(DispatchError::ShutdownInProgress);
        }

        if self.inner.pending_count.load(Ordering::SeqCst) >= self.inner.config.max_pending_requests {
            self.inner
                .config
                .event_listeners
                .emit(&DispatchEvent::QueueFull { service_name: self.inner.config.service_name.clone() });
            return Err(DispatchError::QueueFull);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.clock.now();
        let state = Arc::new(AtomicRequestState::new(RequestState::Pending));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let task = Task {
            id,
            payload,
            submitted_at: now,
            deadline_at: now + valid_for,
            attempt: 0,
            state: state.clone(),
            cancelled: cancelled.clone(),
            result_tx: Some(tx),
        };

        self.inner.pending_count.fetch_add(1, Ordering::SeqCst);
        self.inner
            .config
            .event_listeners
            .emit(&DispatchEvent::Submitted { service_name: self.inner.config.service_name.clone(), request_id: id });
        tokio::spawn({
            let inner = self.inner.clone();
            async move {
                inner.main_queue.lock().await.push_back(task);
                inner.woken.notify_waiters();
            }
        });

        Ok(Handle::new(id, state, cancelled, rx))
    }

    /// Requests shutdown and waits up to `deadline` for the dispatch loop
    /// to drain and exit.
    ///
    /// Per spec.md §9's resolved open question, when both a caller-supplied
    /// `deadline` here and a `spooldownTargetTimestamp` already installed
    /// via the control state are in effect, the tighter of the two bounds
    /// the wait.
    pub async fn shutdown(&self, mode: ShutdownMode, deadline: Duration) {
        if matches!(mode, ShutdownMode::Immediate) {
            let mut queue = self.inner.main_queue.lock().await;
            while let Some(mut task) = queue.pop_front() {
                task.complete(RequestState::FailedFinal, Err(DispatchError::ShutdownInProgress));
            }
        }
        if matches!(mode, ShutdownMode::Quick | ShutdownMode::Immediate) {
            self.inner.control.set(ControlState {
                ignore_delays: true,
                reject_requests: Some("shutting down".to_string()),
                ..(*self.inner.control.get()).clone()
            });
        } else {
            let mut state = (*self.inner.control.get()).clone();
            state.reject_requests = Some("shutting down".to_string());
            self.inner.control.set(state);
        }

        self.inner.shutdown_requested.store(true, Ordering::SeqCst);
        self.inner.woken.notify_waiters();

        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(deadline, handle).await;
        }
    }
}

async fn run_dispatch_loop<P, Proc, E>(inner: Arc<Inner<P, Proc, E>>)
where
    P: Send + Sync + 'static,
    Proc: Processor<P, E>,
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    loop {
        let now = inner.clock.now();
        let released = inner.delay_chain.lock().await.drain_ready(now);
        if !released.is_empty() {
            let mut queue = inner.main_queue.lock().await;
            for task in released {
                queue.push_back(task);
            }
        }

        let next_task = inner.main_queue.lock().await.pop_front();

        let Some(task) = next_task else {
            if inner.shutdown_requested.load(Ordering::SeqCst) {
                let chain_empty = inner.delay_chain.lock().await.is_empty();
                if chain_empty {
                    return;
                }
            }
            let next_wakeup = inner.delay_chain.lock().await.next_wakeup();
            let sleep_for = next_wakeup
                .map(|at| at.saturating_duration_since(tokio::time::Instant::now().into_std()))
                .unwrap_or(Duration::from_millis(50))
                .min(Duration::from_millis(50));
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = inner.woken.notified() => {}
            }
            continue;
        };

        let inner = inner.clone();
        tokio::spawn(async move {
            dispatch_one(inner, task).await;
        });
    }
}

async fn dispatch_one<P, Proc, E>(inner: Arc<Inner<P, Proc, E>>, mut task: Task<P, E>)
where
    P: Send + Sync + 'static,
    Proc: Processor<P, E>,
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    if task.cancelled.load(Ordering::SeqCst) {
        task.complete(RequestState::Cancelled, Err(DispatchError::Cancelled));
        inner.pending_count.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    let control = inner.control.get();
    if control.timeout_all_pending_requests {
        task.complete(RequestState::TimedOut, Err(DispatchError::Timeout));
        inner.pending_count.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    task.state.store(RequestState::WaitingForWorker);
    let worker_wait = worker_wait_budget(&control, task.deadline_at);
    let permit = match tokio::time::timeout(worker_wait, inner.worker_permits.clone().acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        _ => {
            task.complete(RequestState::TimedOut, Err(DispatchError::Timeout));
            inner.pending_count.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    };

    if let Some(token_wait) = control.limit_waiting_for_ticket {
        task.state.store(RequestState::WaitingForToken);
        let bound = token_wait.min(worker_wait_budget(&control, task.deadline_at));
        if !inner.limiter.acquire(bound, Duration::from_millis(10)).await {
            drop(permit);
            task.complete(RequestState::TimedOut, Err(DispatchError::Timeout));
            inner.pending_count.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    }
    // `limit_waiting_for_ticket == None` bypasses both the wait and the
    // token accounting entirely (spec.md §9 open question, resolved this
    // way: see SPEC_FULL.md).

    if tokio::time::Instant::now().into_std() >= task.deadline_at {
        drop(permit);
        task.complete(RequestState::TimedOut, Err(DispatchError::Timeout));
        inner.pending_count.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    task.attempt += 1;
    task.state.store(RequestState::InFlight);
    let service_name = inner.config.service_name.clone();
    inner
        .config
        .event_listeners
        .emit(&DispatchEvent::Attempted { service_name: service_name.clone(), request_id: task.id, attempt: task.attempt });
    let result = inner.processor.process(&task.payload).await;
    drop(permit);

    match result {
        Ok(()) => {
            inner.config.event_listeners.emit(&DispatchEvent::Succeeded {
                service_name: service_name.clone(),
                request_id: task.id,
                attempt: task.attempt,
            });
            task.complete(RequestState::Succeeded, Ok(()));
            if let Some(budget) = &inner.config.retry_budget {
                budget.deposit();
            }
            inner.pending_count.fetch_sub(1, Ordering::SeqCst);
        }
        Err(err) => {
            let elapsed = task.submitted_at.elapsed();
            let classification = inner.processor.classify_failure(&err, task.attempt, elapsed);

            if classification.timeout || control.timeout_requests_after_failed_attempt {
                inner.config.event_listeners.emit(&DispatchEvent::TimedOut { service_name: service_name.clone(), request_id: task.id });
                task.complete(RequestState::TimedOut, Err(DispatchError::Timeout));
                inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            if classification.fatal {
                inner.config.event_listeners.emit(&DispatchEvent::FailedFinal {
                    service_name: service_name.clone(),
                    request_id: task.id,
                    attempt: task.attempt,
                });
                task.complete(RequestState::FailedFinal, Err(DispatchError::ProcessorFatal(err)));
                inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            if task.attempt >= inner.config.max_attempts {
                inner.throttle.log("attempts_exhausted", &format!("request exhausted attempts: {err}"));
                inner.config.event_listeners.emit(&DispatchEvent::FailedFinal {
                    service_name: service_name.clone(),
                    request_id: task.id,
                    attempt: task.attempt,
                });
                task.complete(
                    RequestState::FailedFinal,
                    Err(DispatchError::AttemptsExhausted { attempts: task.attempt, last: err }),
                );
                inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            if let Some(budget) = &inner.config.retry_budget {
                if !budget.try_withdraw() {
                    inner.throttle.log("retry_budget_exhausted", "retry budget exhausted, failing request");
                    task.complete(
                        RequestState::FailedFinal,
                        Err(DispatchError::AttemptsExhausted { attempts: task.attempt, last: err }),
                    );
                    inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            }

            let delay = inner.config.delays_after_failure.interval_for(task.attempt);
            inner.throttle.log("retry_scheduled", &format!("request failed, retrying after {delay:?}: {err}"));
            inner.config.event_listeners.emit(&DispatchEvent::Retried {
                service_name: service_name.clone(),
                request_id: task.id,
                attempt: task.attempt,
                delay,
            });

            if control.ignore_delays {
                task.state.store(RequestState::Pending);
                inner.main_queue.lock().await.push_back(task);
            } else {
                task.state.store(RequestState::Delayed);
                let now = inner.clock.now();
                inner.delay_chain.lock().await.push(task, delay, now);
            }
            inner.woken.notify_waiters();
        }
    }
}

fn worker_wait_budget(control: &ControlState, deadline_at: std::time::Instant) -> Duration {
    let mut budget = control.limit_waiting_for_processing_thread.unwrap_or(Duration::from_secs(3600));
    if let Some(spooldown) = control.spooldown_target {
        let remaining = spooldown.saturating_duration_since(tokio::time::Instant::now().into_std());
        budget = budget.min(remaining);
    }
    let until_deadline = deadline_at.saturating_duration_since(tokio::time::Instant::now().into_std());
    budget.min(until_deadline.max(Duration::from_millis(1)))
}
