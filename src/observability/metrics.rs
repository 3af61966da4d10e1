//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, status, instance
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_retries_total` (counter): retry attempts by service
//! - `gateway_active_connections` (gauge): in-flight requests per instance
//! - `gateway_instance_healthy` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these unconditionally.

use std::net::SocketAddr;
use std::time::Instant;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, status: u16, instance: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string(),
        "instance" => instance.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(service: &str) {
    counter!("gateway_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_active_connections(service: &str, instance: &str, count: usize) {
    gauge!(
        "gateway_active_connections",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(count as f64);
}

pub fn record_instance_health(service: &str, instance: &str, healthy: bool) {
    gauge!(
        "gateway_instance_healthy",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_circuit_state(service: &str, instance: &str, state: CircuitState) {
    gauge!(
        "gateway_circuit_state",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(state.as_gauge());
}
