//! Time abstraction used throughout both cores.
//!
//! All lifecycle timing (main/return queue residency, delay-queue dwell,
//! rate-limiter refill, request deadlines) is expressed against a [`Clock`]
//! rather than `Instant::now()` directly, so that tests can drive queues and
//! timeouts deterministically with a [`ManualClock`] instead of racing real
//! wall-clock sleeps.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A source of monotonic time.
///
/// Production code uses [`SystemClock`]; tests use [`ManualClock`] to
/// advance time explicitly and assert on state transitions without
/// `tokio::time::sleep` flakiness.
pub trait Clock: Send + Sync {
    /// Returns the current instant according to this clock.
    fn now(&self) -> Instant;
}

/// The default [`Clock`], backed by `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A [`Clock`] whose value only changes when [`ManualClock::advance`] is
/// called. The base instant is captured at construction and offset by an
/// internally tracked [`Duration`].
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Creates a new manual clock anchored at the real current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap();
        *offset += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

/// A shared, type-erased clock handle passed into configs.
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances_on_its_own() {
        let clock = SystemClock;
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() > t0);
    }

    #[test]
    fn manual_clock_only_advances_when_told() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), t0 + Duration::from_secs(1));
    }

    #[test]
    fn manual_clock_clones_share_state() {
        let clock = ManualClock::new();
        let clone = clock.clone();
        clock.advance(Duration::from_millis(100));
        assert_eq!(clock.now(), clone.now());
    }
}
