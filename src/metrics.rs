//! Metric helpers for `pushwire`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking live gateway connections.
pub const CONNECTIONS_ACTIVE: &str = "pushwire_connections_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "pushwire_frames_processed_total";
/// Name of the counter tracking dispatched events.
pub const EVENTS_DISPATCHED: &str = "pushwire_events_dispatched_total";
/// Name of the counter tracking reconnect attempts after a dropped connection.
pub const RECONNECT_ATTEMPTS: &str = "pushwire_reconnect_attempts_total";
/// Name of the counter tracking partial events dropped by the expiry sweep.
pub const REASSEMBLY_EXPIRED: &str = "pushwire_reassembly_expired_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from the gateway.
    Inbound,
    /// Frames sent to the gateway.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a dispatched event and whether the handler succeeded.
pub fn inc_events(success: bool) {
    #[cfg(feature = "metrics")]
    counter!(EVENTS_DISPATCHED, "outcome" => if success { "ok" } else { "error" }).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = success;
}

/// Record one reconnect attempt.
pub fn inc_reconnect_attempts() {
    #[cfg(feature = "metrics")]
    counter!(RECONNECT_ATTEMPTS).increment(1);
}

/// Record a partial event dropped by the expiry sweep.
pub fn inc_reassembly_expired() {
    #[cfg(feature = "metrics")]
    counter!(REASSEMBLY_EXPIRED).increment(1);
}
