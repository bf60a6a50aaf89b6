//! Shared infrastructure for the WBRB cache and RRL service.
//!
//! This crate provides the small set of strategy objects both cores need
//! and neither should own exclusively:
//! - [`events`]: an observability event system (listeners, not a bus).
//! - [`clock`]: a `Clock` strategy object so lifecycle timing is testable.
//! - [`throttle`]: a per-instance throttled logger.

pub mod clock;
pub mod events;
pub mod throttle;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
pub use throttle::ThrottlingLogger;
