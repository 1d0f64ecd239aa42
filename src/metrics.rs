//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Registered peer count
//! - Handshake outcomes
//! - Invitation decisions
//! - Replicator lifecycle
//! - Coordinator state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `mesh_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//!
//! # Usage
//!
//! ```rust,no_run
//! use mesh_link::identity::Role;
//! use mesh_link::metrics;
//!
//! metrics::record_handshake(Role::Active, "success");
//! metrics::set_connected_peers(3);
//! ```

use metrics::{counter, gauge};

use crate::identity::Role;

/// Gauge for number of registered peers (pending and established).
pub fn set_connected_peers(count: usize) {
    gauge!("mesh_connected_peers").set(count as f64);
}

/// Record a handshake outcome (`success`, `send_failed`).
pub fn record_handshake(role: Role, outcome: &str) {
    counter!(
        "mesh_handshakes_total",
        "role" => role.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a protocol violation seen during the handshake.
pub fn record_protocol_violation(role: Role) {
    counter!("mesh_protocol_violations_total", "role" => role.to_string()).increment(1);
}

/// Record an inbound invitation decision (`accepted`, `rejected`).
pub fn record_invitation(outcome: &str) {
    counter!("mesh_invitations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an outbound invite attempt (`sent`, `failed`).
pub fn record_invite_sent(outcome: &str) {
    counter!("mesh_invites_sent_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a replicator lifecycle event (`started`, `start_failed`, `stopped`).
pub fn record_replicator(event: &str) {
    counter!("mesh_replicator_events_total", "event" => event.to_string()).increment(1);
}

/// Gauge for coordinator state.
pub fn set_coordinator_state(state: &str) {
    // Numeric for alerting
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "Stopped" => 2.0,
        "Stopping" => 3.0,
        _ => -1.0,
    };
    gauge!("mesh_coordinator_state").set(value);
}
