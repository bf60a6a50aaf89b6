//! Per-instance throttled logging.
//!
//! spec.md §7 requires that "logging throttling is applied by message type
//! with per-type windows" and that "throttling events themselves are NOT
//! throttled". This is deliberately *not* a process-wide singleton (see
//! spec.md §9 design notes): each cache/service instance owns one
//! [`ThrottlingLogger`], constructed with its own name for attribution in
//! logs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SharedClock, SystemClock};

struct WindowState {
    window_start: Instant,
    suppressed: u64,
}

/// Rate-limits repeated log messages keyed by an arbitrary message-type tag.
///
/// The first message for a given key within a window is logged immediately.
/// Subsequent messages for the same key within the same window are counted
/// but not logged; when the window closes, a summary ("N messages of type X
/// suppressed") is logged unconditionally the next time that key is touched.
pub struct ThrottlingLogger {
    owner: String,
    window: Duration,
    clock: SharedClock,
    state: Mutex<HashMap<&'static str, WindowState>>,
}

impl ThrottlingLogger {
    /// Creates a throttling logger owned by `owner` (used as a log field),
    /// with each message-type key getting its own `window`-long quiet period.
    pub fn new(owner: impl Into<String>, window: Duration) -> Self {
        Self::with_clock(owner, window, std::sync::Arc::new(SystemClock))
    }

    /// As [`ThrottlingLogger::new`] but with an injectable clock for tests.
    pub fn with_clock(owner: impl Into<String>, window: Duration, clock: SharedClock) -> Self {
        Self {
            owner: owner.into(),
            window,
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Emits `message` for `key`, logging at `level` if this is the first
    /// occurrence of `key` in the current window, otherwise incrementing the
    /// suppressed count for that key. Returns `true` if the message was
    /// actually logged (useful for tests that don't want to assert on log
    /// output directly).
    pub fn log(&self, key: &'static str, message: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();

        let should_emit = match state.get_mut(key) {
            None => {
                state.insert(
                    key,
                    WindowState {
                        window_start: now,
                        suppressed: 0,
                    },
                );
                true
            }
            Some(entry) => {
                if now.duration_since(entry.window_start) >= self.window {
                    let suppressed = entry.suppressed;
                    entry.window_start = now;
                    entry.suppressed = 0;
                    if suppressed > 0 {
                        self.emit_summary(key, suppressed);
                    }
                    true
                } else {
                    entry.suppressed += 1;
                    false
                }
            }
        };

        if should_emit {
            self.emit(key, message);
        }

        should_emit
    }

    /// Always logs `message` at CRITICAL-equivalent severity, bypassing
    /// throttling entirely. Used for invariant violations (spec.md §7:
    /// "Invariant violations ... immediately log a CRITICAL event").
    pub fn critical(&self, key: &'static str, message: &str) {
        #[cfg(feature = "tracing")]
        tracing::error!(owner = %self.owner, kind = key, critical = true, "{}", message);

        #[cfg(not(feature = "tracing"))]
        let _ = (key, message);
    }

    fn emit(&self, key: &'static str, message: &str) {
        #[cfg(feature = "tracing")]
        tracing::warn!(owner = %self.owner, kind = key, "{}", message);

        #[cfg(not(feature = "tracing"))]
        let _ = (key, message);
    }

    fn emit_summary(&self, key: &'static str, suppressed: u64) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            owner = %self.owner,
            kind = key,
            suppressed,
            "{} messages of type {} suppressed by throttling",
            suppressed,
            key
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "resilience_throttled_log_messages_total",
            "owner" => self.owner.clone(),
            "kind" => key.to_string()
        )
        .increment(suppressed);

        #[cfg(not(feature = "tracing"))]
        let _ = suppressed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn first_message_in_window_is_logged() {
        let logger = ThrottlingLogger::new("test", Duration::from_secs(1));
        assert!(logger.log("read_retry", "first"));
    }

    #[test]
    fn subsequent_messages_in_same_window_are_suppressed() {
        let logger = ThrottlingLogger::new("test", Duration::from_secs(60));
        assert!(logger.log("read_retry", "first"));
        assert!(!logger.log("read_retry", "second"));
        assert!(!logger.log("read_retry", "third"));
    }

    #[test]
    fn distinct_keys_have_independent_windows() {
        let logger = ThrottlingLogger::new("test", Duration::from_secs(60));
        assert!(logger.log("read_retry", "first"));
        assert!(logger.log("write_retry", "first"));
    }

    #[test]
    fn new_window_logs_again() {
        let clock = Arc::new(ManualClock::new());
        let logger = ThrottlingLogger::with_clock("test", Duration::from_millis(100), clock.clone());

        assert!(logger.log("resync_too_late", "first"));
        assert!(!logger.log("resync_too_late", "suppressed"));

        clock.advance(Duration::from_millis(150));
        assert!(logger.log("resync_too_late", "new window"));
    }
}
