//! Back-off strategies for computing the delay before a retry attempt.
//!
//! spec.md §4.3 specifies `delaysAfterFailure[min(attempt-1,last)]` as the
//! core table-lookup strategy, with "use last value" once `attempt` runs
//! past the table. [`TableInterval`] implements exactly that; the other
//! strategies are supplementary back-off shapes in the same idiom.

use std::time::Duration;

use rand::Rng;

/// Computes the delay to apply before retry attempt `attempt` (1-based).
pub trait IntervalFunction: Send + Sync + 'static {
    /// Returns the delay before the `attempt`-th retry.
    fn interval_for(&self, attempt: u32) -> Duration;
}

/// The delay table named in spec.md: `delaysAfterFailure[min(attempt-1,
/// last)]`. Once `attempt` exceeds the table length, the last entry is
/// reused indefinitely.
pub struct TableInterval {
    delays: Vec<Duration>,
}

impl TableInterval {
    /// Builds a table interval function. Panics if `delays` is empty: the
    /// spec requires at least one value (`delaysAfterFailure` ≥ 1 value).
    pub fn new(delays: Vec<Duration>) -> Self {
        assert!(!delays.is_empty(), "delaysAfterFailure must have at least one value");
        Self { delays }
    }
}

impl IntervalFunction for TableInterval {
    fn interval_for(&self, attempt: u32) -> Duration {
        let index = (attempt.saturating_sub(1) as usize).min(self.delays.len() - 1);
        self.delays[index]
    }
}

/// A constant delay regardless of attempt number.
pub struct FixedInterval(pub Duration);

impl IntervalFunction for FixedInterval {
    fn interval_for(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Delay doubling each attempt, capped at `max`.
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl IntervalFunction for ExponentialBackoff {
    fn interval_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Exponential back-off with full jitter: a uniform random delay between
/// zero and the exponential value, to avoid synchronized retry storms.
pub struct ExponentialRandomBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl IntervalFunction for ExponentialRandomBackoff {
    fn interval_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let ceiling = self.base.saturating_mul(factor).min(self.max);
        if ceiling.is_zero() {
            return ceiling;
        }
        let millis = ceiling.as_millis().max(1) as u64;
        let jittered = rand::rng().random_range(0..=millis);
        Duration::from_millis(jittered)
    }
}

/// An arbitrary caller-supplied interval function.
pub struct FnInterval<F>(pub F);

impl<F> IntervalFunction for FnInterval<F>
where
    F: Fn(u32) -> Duration + Send + Sync + 'static,
{
    fn interval_for(&self, attempt: u32) -> Duration {
        (self.0)(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_interval_uses_last_value_past_table_length() {
        let table = TableInterval::new(vec![Duration::from_millis(100), Duration::from_millis(800)]);
        assert_eq!(table.interval_for(1), Duration::from_millis(100));
        assert_eq!(table.interval_for(2), Duration::from_millis(800));
        assert_eq!(table.interval_for(3), Duration::from_millis(800));
        assert_eq!(table.interval_for(100), Duration::from_millis(800));
    }

    #[test]
    fn fixed_interval_ignores_attempt() {
        let fixed = FixedInterval(Duration::from_millis(50));
        assert_eq!(fixed.interval_for(1), fixed.interval_for(9));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let backoff = ExponentialBackoff { base: Duration::from_millis(10), max: Duration::from_millis(100) };
        assert_eq!(backoff.interval_for(1), Duration::from_millis(10));
        assert_eq!(backoff.interval_for(2), Duration::from_millis(20));
        assert_eq!(backoff.interval_for(3), Duration::from_millis(40));
        assert_eq!(backoff.interval_for(10), Duration::from_millis(100));
    }

    #[test]
    fn random_backoff_stays_within_ceiling() {
        let backoff = ExponentialRandomBackoff { base: Duration::from_millis(10), max: Duration::from_millis(100) };
        for attempt in 1..5 {
            let d = backoff.interval_for(attempt);
            assert!(d <= Duration::from_millis(100));
        }
    }
}
