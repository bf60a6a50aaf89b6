//! Observability events emitted by [`crate::RrlService`] (spec.md §6.2, §7).

use std::time::Duration;

use resilience_core::ResilienceEvent;

/// An event describing dispatch activity, handed to every registered
/// listener.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A request was accepted onto the Main Queue.
    Submitted { service_name: String, request_id: u64 },
    /// A dispatch attempt was made (`attempt` is 1-based).
    Attempted { service_name: String, request_id: u64, attempt: u32 },
    /// A dispatch attempt succeeded.
    Succeeded { service_name: String, request_id: u64, attempt: u32 },
    /// An attempt failed and a retry was scheduled after `delay`.
    Retried { service_name: String, request_id: u64, attempt: u32, delay: Duration },
    /// The request's deadline passed.
    TimedOut { service_name: String, request_id: u64 },
    /// The request exhausted `maxAttempts` or received a fatal failure.
    FailedFinal { service_name: String, request_id: u64, attempt: u32 },
    /// A submission was rejected by the current control state.
    Rejected { service_name: String, reason: String },
    /// A submission was rejected because the Main Queue was full.
    QueueFull { service_name: String },
}

impl ResilienceEvent for DispatchEvent {
    fn name(&self) -> &'static str {
        match self {
            DispatchEvent::Submitted { .. } => "submitted",
            DispatchEvent::Attempted { .. } => "attempted",
            DispatchEvent::Succeeded { .. } => "succeeded",
            DispatchEvent::Retried { .. } => "retried",
            DispatchEvent::TimedOut { .. } => "timed_out",
            DispatchEvent::FailedFinal { .. } => "failed_final",
            DispatchEvent::Rejected { .. } => "rejected",
            DispatchEvent::QueueFull { .. } => "queue_full",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_stable() {
        let event = DispatchEvent::QueueFull { service_name: "svc".into() };
        assert_eq!(event.name(), "queue_full");
    }
}
