//! Metrics for access decisions and notification delivery
//!
//! Counters go through the `metrics` facade; whichever recorder the embedding
//! process installs receives them. Without a recorder they are no-ops.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const NOTIFICATIONS_PUSHED: &str = "huddle.notifications.pushed";
pub const NOTIFICATIONS_EMAILED: &str = "huddle.notifications.emailed";
pub const NOTIFICATIONS_FAILED: &str = "huddle.notifications.failed";
pub const ACCESS_DENIED: &str = "huddle.access.denied";
pub const MESSAGES_POSTED: &str = "huddle.messages.posted";
pub const FANOUT_DURATION_MS: &str = "huddle.fanout.duration_ms";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(NOTIFICATIONS_PUSHED, "Notifications persisted and emitted to a personal room");
    describe_counter!(NOTIFICATIONS_EMAILED, "Fallback emails sent to absent recipients");
    describe_counter!(NOTIFICATIONS_FAILED, "Per-recipient delivery steps that failed");
    describe_counter!(ACCESS_DENIED, "Guarded operations refused, labelled by operation and code");
    describe_counter!(MESSAGES_POSTED, "Messages accepted by the send path");
    describe_histogram!(FANOUT_DURATION_MS, "Time from fan-out start to dispatch completion");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Count a refused operation
pub fn record_denial(operation: &'static str, code: &'static str) {
    counter!(ACCESS_DENIED, "operation" => operation, "code" => code).increment(1);
}

/// Count a failed delivery step (`persist`, `push`, `presence`, `email`)
pub fn record_delivery_failure(step: &'static str) {
    counter!(NOTIFICATIONS_FAILED, "step" => step).increment(1);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record_counter(NOTIFICATIONS_PUSHED, 1);
        record_denial("post_message", "NOT_ALLOWED");
        record_delivery_failure("email");
        Timer::new(FANOUT_DURATION_MS).stop();
    }
}
