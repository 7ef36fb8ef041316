// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Trigger ticks and source activity
//! - Source termination and resubscription
//! - Probe latency, failures and stale results
//! - The current sync ratio
//! - Status records and replication errors
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replica_monitor_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a tick leaving the trigger aggregator.
pub fn record_trigger_tick(kind: &str) {
    counter!("replica_monitor_trigger_ticks_total", "kind" => kind.to_string()).increment(1);
}

/// Record one activity signal from a trigger source.
pub fn record_source_activity(source: &str) {
    counter!("replica_monitor_source_activity_total", "source" => source.to_string()).increment(1);
}

/// Record a trigger source terminating.
pub fn record_source_terminated(source: &str, reason: &str) {
    counter!(
        "replica_monitor_source_terminations_total",
        "source" => source.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a trigger source being opened again.
pub fn record_source_resubscribed(source: &str) {
    counter!("replica_monitor_source_resubscriptions_total", "source" => source.to_string()).increment(1);
}

/// Record probe latency.
pub fn record_probe_latency(probe: &str, duration: Duration) {
    histogram!("replica_monitor_probe_duration_seconds", "probe" => probe.to_string())
        .record(duration.as_secs_f64());
}

/// Record a probe failure absorbed or propagated.
pub fn record_probe_failure(probe: &str, reason: &str) {
    counter!(
        "replica_monitor_probe_failures_total",
        "probe" => probe.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a probe result discarded because a newer tick already delivered.
pub fn record_stale_result(probe: &str) {
    counter!("replica_monitor_stale_results_total", "probe" => probe.to_string()).increment(1);
}

/// Record the latest sync ratio.
pub fn set_sync_ratio(ratio: f64) {
    gauge!("replica_monitor_sync_ratio").set(ratio);
}

/// Record a composed status record emitted.
pub fn record_status_emitted() {
    counter!("replica_monitor_status_records_total").increment(1);
}

/// Record a replication error observed on an arm.
pub fn record_replication_error(direction: &str) {
    counter!("replica_monitor_replication_errors_total", "direction" => direction.to_string()).increment(1);
}

/// Record a replication error forwarded to the reporter.
pub fn record_replication_error_reported(direction: &str) {
    counter!("replica_monitor_replication_errors_reported_total", "direction" => direction.to_string()).increment(1);
}

/// Gauge for monitor state, one numeric code per state.
pub fn set_monitor_state(state: &str) {
    gauge!("replica_monitor_state").set(monitor_state_code(state));
}

/// 0=Created, 1=Starting, 2=Running, 3=ShuttingDown, 4=Stopped, 5=Failed.
fn monitor_state_code(state: &str) -> f64 {
    match state {
        "Created" => 0.0,
        "Starting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    }
}
