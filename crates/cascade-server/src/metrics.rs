//! Metrics collection and export for Cascade.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use cascade_core::FanoutReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const WEBHOOKS_TOTAL: &str = "cascade_webhooks_total";
    pub const AUTH_FAILURES_TOTAL: &str = "cascade_auth_failures_total";
    pub const BROADCASTS_TOTAL: &str = "cascade_broadcasts_total";
    pub const DELIVERED_TOTAL: &str = "cascade_delivered_total";
    pub const STALE_CLEANED_TOTAL: &str = "cascade_stale_cleaned_total";
    pub const CONNECTIONS_TOTAL: &str = "cascade_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "cascade_connections_active";
    pub const FANOUT_SECONDS: &str = "cascade_fanout_seconds";
    pub const ERRORS_TOTAL: &str = "cascade_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::WEBHOOKS_TOTAL,
        "Total number of webhook deliveries by outcome"
    );
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of webhook signature verification failures"
    );
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Total number of fanout cycles");
    metrics::describe_counter!(
        names::DELIVERED_TOTAL,
        "Total number of payloads delivered to connections"
    );
    metrics::describe_counter!(
        names::STALE_CLEANED_TOTAL,
        "Total number of stale connections evicted"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_histogram!(names::FANOUT_SECONDS, "Fanout cycle duration in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a webhook delivery outcome.
pub fn record_webhook(outcome: &str) {
    counter!(names::WEBHOOKS_TOTAL, "outcome" => outcome.to_string()).increment(1);
    if outcome == "rejected" {
        counter!(names::AUTH_FAILURES_TOTAL).increment(1);
    }
}

/// Record the outcome of one fanout cycle.
pub fn record_broadcast(report: &FanoutReport) {
    counter!(names::BROADCASTS_TOTAL).increment(1);
    counter!(names::DELIVERED_TOTAL).increment(report.delivered as u64);
    counter!(names::STALE_CLEANED_TOTAL).increment(report.stale_cleaned as u64);
}

/// Record fanout cycle duration.
pub fn record_fanout_seconds(seconds: f64) {
    histogram!(names::FANOUT_SECONDS).record(seconds);
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_record_broadcast() {
        record_broadcast(&FanoutReport {
            delivered: 3,
            stale_cleaned: 1,
        });
    }
}
