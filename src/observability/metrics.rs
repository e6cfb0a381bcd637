//! Metrics collection and exposition.
//!
//! # Metrics
//! - `forward_requests_total` (counter): forwarded calls by method, status, transport
//! - `forward_request_duration_seconds` (histogram): latency until the response head
//! - `forward_retries_total` (counter): scheduled retries by transport and reason
//! - `forward_errors_total` (counter): terminal errors by external code
//! - `forward_http2_sessions_total` (counter): HTTP/2 session events
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_forward(method: &str, status: u16, transport: &'static str, start: Instant) {
    counter!(
        "forward_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "transport" => transport
    )
    .increment(1);
    histogram!("forward_request_duration_seconds", "transport" => transport)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(transport: &'static str, reason: &'static str) {
    counter!("forward_retries_total", "transport" => transport, "reason" => reason).increment(1);
}

pub fn record_error(code: &'static str) {
    counter!("forward_errors_total", "code" => code).increment(1);
}

pub fn record_session(event: &'static str) {
    counter!("forward_http2_sessions_total", "event" => event).increment(1);
}
