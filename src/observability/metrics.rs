//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): rejections by scope
//! - `gateway_breaker_transitions_total` (counter): by breaker, from, to
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `gateway_registry_instances` (gauge): registered instances
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::State;

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
        Label::new("service", service.to_string()),
    ];
    counter!("gateway_requests_total", labels.clone()).increment(1);
    histogram!("gateway_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &str) {
    counter!("gateway_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_breaker_transition(name: &str, from: State, to: State) {
    counter!(
        "gateway_breaker_transitions_total",
        "name" => name.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("gateway_breaker_state", "name" => name.to_string()).set(state_value(to));
}

pub fn record_registry_size(instances: usize) {
    gauge!("gateway_registry_instances").set(instances as f64);
}

fn state_value(state: State) -> f64 {
    match state {
        State::Closed => 0.0,
        State::HalfOpen => 1.0,
        State::Open => 2.0,
    }
}
