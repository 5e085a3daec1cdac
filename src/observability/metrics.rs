//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): total requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): denials by reason
//! - `gateway_auth_total` (counter): validation outcomes by reason
//! - `gateway_permission_cache_entries` (gauge): cached permission sets
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Exposition via a Prometheus scrape listener on its own address

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    if let Err(e) = builder.install() {
        tracing::error!(error = %e, "Failed to install metrics exporter");
    } else {
        tracing::info!(address = %addr, "Metrics exporter listening");
    }
}

pub fn record_request(method: &str, status: u16, start_time: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("gateway_requests_total", &labels).increment(1);
    metrics::histogram!("gateway_request_duration_seconds", &labels)
        .record(start_time.elapsed().as_secs_f64());
}

pub fn record_rate_limited(reason: &'static str) {
    metrics::counter!("gateway_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_auth_outcome(reason: &'static str) {
    metrics::counter!("gateway_auth_total", "reason" => reason).increment(1);
}

pub fn record_permission_cache_size(size: usize) {
    metrics::gauge!("gateway_permission_cache_entries").set(size as f64);
}

pub fn record_cleanup(deleted_counters: u64, deleted_sessions: u64) {
    metrics::counter!("gateway_cleanup_deleted_rows_total", "table" => "rate_limit_counters")
        .increment(deleted_counters);
    metrics::counter!("gateway_cleanup_deleted_rows_total", "table" => "sessions")
        .increment(deleted_sessions);
}
