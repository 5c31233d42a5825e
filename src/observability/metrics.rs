//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): rejections by route pattern
//! - `gateway_rate_limit_store_errors_total` (counter): fail-open admissions
//! - `gateway_breaker_state` (gauge): 0=closed, 1=open, 2=half_open
//! - `gateway_breaker_rejections_total` (counter): calls refused by an open circuit
//! - `gateway_credential_rotations_total` (counter): rotations by outcome

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(pattern: &str) {
    counter!("gateway_rate_limited_total", "pattern" => pattern.to_string()).increment(1);
}

pub fn record_rate_limit_store_error() {
    counter!("gateway_rate_limit_store_errors_total").increment(1);
}

pub fn record_breaker_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!("gateway_breaker_state", "breaker" => name.to_string()).set(value);
}

pub fn record_breaker_rejection(name: &str) {
    counter!("gateway_breaker_rejections_total", "breaker" => name.to_string()).increment(1);
}

pub fn record_credential_rotation(outcome: &'static str) {
    counter!("gateway_credential_rotations_total", "outcome" => outcome).increment(1);
}
