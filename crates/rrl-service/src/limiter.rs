//! Token-bucket rate limiter (spec.md §4.4).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// Lazily-refilled token bucket.
///
/// `bucket_size == 0` disables limiting entirely: [`TokenBucket::try_acquire`]
/// always succeeds and [`TokenBucket::acquire`] never waits.
pub struct TokenBucket {
    bucket_size: u64,
    refill_rate: u64,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u64,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// Creates a bucket of capacity `bucket_size`, refilling `refill_rate`
    /// tokens spread uniformly over every `refill_interval`.
    pub fn new(bucket_size: u64, refill_rate: u64, refill_interval: Duration) -> Self {
        Self {
            bucket_size,
            refill_rate,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: bucket_size,
                last_refill_at: Instant::now(),
            }),
        }
    }

    /// Whether this bucket has limiting disabled (`bucketSize == 0`).
    pub fn is_unbounded(&self) -> bool {
        self.bucket_size == 0
    }

    fn refill_locked(&self, state: &mut BucketState, now: Instant) {
        if self.refill_rate == 0 || self.refill_interval.is_zero() {
            return;
        }
        let elapsed = now.duration_since(state.last_refill_at);
        let added = (elapsed.as_nanos() * self.refill_rate as u128 / self.refill_interval.as_nanos().max(1)) as u64;
        if added == 0 {
            return;
        }
        state.tokens = (state.tokens + added).min(self.bucket_size);
        let advance_nanos = (added as u128) * self.refill_interval.as_nanos() / self.refill_rate as u128;
        state.last_refill_at += Duration::from_nanos(advance_nanos as u64);
    }

    /// Attempts to take one token immediately, without waiting.
    pub fn try_acquire(&self) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        self.refill_locked(&mut state, now);
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Waits, in `poll_interval`-sized segments up to `max_wait`, for a
    /// token to become available. Returns `true` if a token was acquired,
    /// `false` if `max_wait` elapsed first.
    pub async fn acquire(&self, max_wait: Duration, poll_interval: Duration) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let deadline = Instant::now() + max_wait;
        loop {
            if self.try_acquire() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(remaining.min(poll_interval)).await;
        }
    }

    /// Current token count, for monitoring.
    pub fn available_tokens(&self) -> u64 {
        if self.is_unbounded() {
            return u64::MAX;
        }
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        self.refill_locked(&mut state, now);
        state.tokens
    }
}
