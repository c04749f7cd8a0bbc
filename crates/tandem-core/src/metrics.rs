//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! server installs an exporter.

use crate::connection::Delivery;
use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tandem_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tandem_connections_active";
    pub const MESSAGES_TOTAL: &str = "tandem_messages_total";
    pub const DELIVERIES_TOTAL: &str = "tandem_deliveries_total";
    pub const DROPPED_TOTAL: &str = "tandem_dropped_total";
    pub const SESSIONS_ACTIVE: &str = "tandem_sessions_active";
    pub const ERRORS_TOTAL: &str = "tandem_errors_total";
}

/// Record an inbound frame.
pub fn record_message(kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind).increment(1);
}

/// Record one delivery attempt.
pub fn record_delivery(delivery: Delivery) {
    counter!(names::DELIVERIES_TOTAL, "outcome" => delivery.as_str()).increment(1);
}

/// Record a dropped frame.
pub fn record_drop(reason: &'static str) {
    counter!(names::DROPPED_TOTAL, "reason" => reason).increment(1);
}

/// Update the active session count.
pub fn set_active_sessions(count: usize) {
    gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}
