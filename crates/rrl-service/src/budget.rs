//! An optional secondary retry gate, independent of the rate limiter.
//!
//! The token bucket in [`crate::limiter`] governs how fast requests are
//! *dispatched*; a [`RetryBudget`] additionally caps how many *retries*
//! happen overall, so a downstream outage doesn't turn into a retry storm
//! even if the rate limiter alone would allow it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A budget controlling how many retries are allowed across all requests.
pub trait RetryBudget: Send + Sync {
    /// Attempts to withdraw one retry token. Returns `true` if the retry
    /// may proceed.
    fn try_withdraw(&self) -> bool;

    /// Deposits tokens after a successful dispatch.
    fn deposit(&self);

    /// Current balance, for observability.
    fn balance(&self) -> i64;
}

/// A simple token-bucket budget: `deposit_amount` added per success,
/// `withdraw_amount` subtracted per retry, bounded to `[0, max_budget]`.
pub struct TokenBucketBudget {
    max_budget: i64,
    deposit_amount: i64,
    withdraw_amount: i64,
    balance: AtomicI64,
}

impl TokenBucketBudget {
    /// Creates a budget starting at `max_budget` tokens.
    pub fn new(max_budget: i64, deposit_amount: i64, withdraw_amount: i64) -> Arc<Self> {
        Arc::new(Self {
            max_budget,
            deposit_amount,
            withdraw_amount,
            balance: AtomicI64::new(max_budget),
        })
    }
}

impl RetryBudget for TokenBucketBudget {
    fn try_withdraw(&self) -> bool {
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            if current < self.withdraw_amount {
                return false;
            }
            let next = current - self.withdraw_amount;
            match self.balance.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn deposit(&self) {
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            let next = (current + self.deposit_amount).min(self.max_budget);
            match self.balance.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn balance(&self) -> i64 {
        self.balance.load(Ordering::Acquire)
    }
}

/// An AIMD (additive-increase, multiplicative-decrease) budget: grows by
/// `deposit_amount` on each success, halves (via `decrease_factor`) its
/// ceiling the first time it's found exhausted.
pub struct AimdBudget {
    min_budget: i64,
    max_budget: AtomicI64,
    deposit_amount: i64,
    withdraw_amount: i64,
    decrease_factor: f64,
    balance: AtomicI64,
}

impl AimdBudget {
    /// Creates an AIMD budget starting at `max_budget`.
    pub fn new(min_budget: i64, max_budget: i64, deposit_amount: i64, withdraw_amount: i64, decrease_factor: f64) -> Arc<Self> {
        Arc::new(Self {
            min_budget,
            max_budget: AtomicI64::new(max_budget),
            deposit_amount,
            withdraw_amount,
            decrease_factor,
            balance: AtomicI64::new(max_budget),
        })
    }
}

impl RetryBudget for AimdBudget {
    fn try_withdraw(&self) -> bool {
        let current = self.balance.load(Ordering::Acquire);
        if current < self.withdraw_amount {
            let ceiling = self.max_budget.load(Ordering::Acquire);
            let shrunk = ((ceiling as f64 * self.decrease_factor) as i64).max(self.min_budget);
            self.max_budget.store(shrunk, Ordering::Release);
            return false;
        }
        self.balance.fetch_sub(self.withdraw_amount, Ordering::AcqRel);
        true
    }

    fn deposit(&self) {
        let ceiling = self.max_budget.load(Ordering::Acquire);
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            let next = (current + self.deposit_amount).min(ceiling);
            match self.balance.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn balance(&self) -> i64 {
        self.balance.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_budget_exhausts_and_refills() {
        let budget = TokenBucketBudget::new(2, 1, 1);
        assert!(budget.try_withdraw());
        assert!(budget.try_withdraw());
        assert!(!budget.try_withdraw());
        budget.deposit();
        assert!(budget.try_withdraw());
    }

    #[test]
    fn aimd_budget_shrinks_ceiling_on_exhaustion() {
        let budget = AimdBudget::new(1, 10, 1, 10, 0.5);
        assert!(!budget.try_withdraw());
        assert_eq!(budget.max_budget.load(Ordering::Acquire), 5);
    }
}
