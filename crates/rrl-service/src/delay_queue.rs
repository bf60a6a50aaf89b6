//! The delay-queue chain: a coarse-grained scheduling wheel (spec.md §4.3).
//!
//! Rather than one timer per delayed item, delay is approximated by
//! shuttling the item through a small fixed chain of FIFOs, each with its
//! own dwell time. An item needing more delay than the largest lane's dwell
//! is re-enqueued into that same lane as many times as needed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct Lane<T> {
    dwell: Duration,
    items: VecDeque<(T, Instant, Duration)>,
}

/// A chain of fixed-dwell FIFO lanes, ascending by dwell.
pub struct DelayQueueChain<T> {
    lanes: Vec<Lane<T>>,
    grace: Duration,
}

impl<T> DelayQueueChain<T> {
    /// Builds a chain from ascending `dwells`. `grace` is the tolerance
    /// (`delayQueueTooLongGracePeriod`) within which a delay slightly
    /// longer than a lane's dwell is still placed in that lane rather than
    /// escalated to the next one.
    ///
    /// Panics if `dwells` is empty or not ascending: both are configuration
    /// errors that should be caught by the builder before reaching here.
    pub fn new(dwells: Vec<Duration>, grace: Duration) -> Self {
        assert!(!dwells.is_empty(), "delayQueues must have at least one entry");
        assert!(dwells.windows(2).all(|w| w[0] <= w[1]), "delayQueues must be ascending");
        Self {
            lanes: dwells.into_iter().map(|dwell| Lane { dwell, items: VecDeque::new() }).collect(),
            grace,
        }
    }

    /// Total items currently held across all lanes.
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lane_for(&self, remaining: Duration) -> usize {
        for (i, lane) in self.lanes.iter().enumerate() {
            if lane.dwell + self.grace >= remaining {
                return i;
            }
        }
        self.lanes.len() - 1
    }

    /// Places `item` to be released after approximately `delay`.
    pub fn push(&mut self, item: T, delay: Duration, now: Instant) {
        let lane_index = self.lane_for(delay);
        let dwell = self.lanes[lane_index].dwell;
        let leftover = delay.saturating_sub(dwell);
        self.lanes[lane_index].items.push_back((item, now, leftover));
    }

    /// Pops every item whose current lane dwell has elapsed. Items that
    /// still have leftover delay are immediately re-enqueued into the
    /// appropriate lane rather than returned; only fully-elapsed items are
    /// returned to the caller.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<T> {
        let mut released = Vec::new();
        let mut requeue = Vec::new();

        for lane in self.lanes.iter_mut() {
            while let Some((_, enqueued_at, _)) = lane.items.front() {
                if now.duration_since(*enqueued_at) < lane.dwell {
                    break;
                }
                let (item, _, leftover) = lane.items.pop_front().unwrap();
                if leftover.is_zero() {
                    released.push(item);
                } else {
                    requeue.push((item, leftover));
                }
            }
        }

        for (item, leftover) in requeue {
            self.push(item, leftover, now);
        }

        released
    }

    /// The earliest instant any lane might next have a ready item, for the
    /// processor loop to compute how long it may sleep.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.lanes
            .iter()
            .filter_map(|lane| lane.items.front().map(|(_, enqueued_at, _)| *enqueued_at + lane.dwell))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> DelayQueueChain<u32> {
        DelayQueueChain::new(vec![Duration::from_millis(100), Duration::from_millis(300)], Duration::from_millis(20))
    }

    #[test]
    fn short_delay_lands_in_first_lane() {
        let mut c = chain();
        let now = Instant::now();
        c.push(1, Duration::from_millis(90), now);
        assert!(c.drain_ready(now).is_empty());
        assert_eq!(c.drain_ready(now + Duration::from_millis(100)), vec![1]);
    }

    #[test]
    fn delay_within_grace_stays_in_its_lane() {
        let mut c = chain();
        let now = Instant::now();
        c.push(1, Duration::from_millis(110), now);
        assert_eq!(c.drain_ready(now + Duration::from_millis(100)), vec![1]);
    }

    #[test]
    fn delay_exceeding_largest_lane_shuttles_through() {
        let mut c = chain();
        let now = Instant::now();
        c.push(1, Duration::from_millis(650), now);

        assert!(c.drain_ready(now + Duration::from_millis(300)).is_empty());
        assert!(c.drain_ready(now + Duration::from_millis(600)).is_empty());
        assert_eq!(c.drain_ready(now + Duration::from_millis(900)), vec![1]);
    }

    #[test]
    fn fifo_order_within_a_lane() {
        let mut c = chain();
        let now = Instant::now();
        c.push(1, Duration::from_millis(50), now);
        c.push(2, Duration::from_millis(50), now);
        assert_eq!(c.drain_ready(now + Duration::from_millis(100)), vec![1, 2]);
    }
}
