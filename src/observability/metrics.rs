//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_admission_total` (counter): admission decisions by service, outcome
//! - `gateway_failover_total` (counter): failover attempts by service
//! - `gateway_sticky_evictions_total` (counter): bindings dropped after a 5xx
//! - `gateway_admission_events_dropped_total` (counter): events lost to a full buffer
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the global recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("service", service.to_string()),
    ];
    ::metrics::counter!("gateway_requests_total", &labels).increment(1);
    ::metrics::histogram!("gateway_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_admission(service: &str, allowed: bool) {
    let outcome = if allowed { "admitted" } else { "rejected" };
    ::metrics::counter!(
        "gateway_admission_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_failover(service: &str) {
    ::metrics::counter!("gateway_failover_total", "service" => service.to_string()).increment(1);
}

pub fn record_sticky_eviction(service: &str) {
    ::metrics::counter!("gateway_sticky_evictions_total", "service" => service.to_string())
        .increment(1);
}

pub fn record_event_dropped() {
    ::metrics::counter!("gateway_admission_events_dropped_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("GET", 200, "svc", Instant::now());
        record_admission("svc", false);
        record_failover("svc");
        record_sticky_eviction("svc");
        record_event_dropped();
    }
}
