//! Gateway-level prometheus metrics
//!
//! Resilience and cache metrics live in their own crates; this module covers
//! the request surface: downstream call outcomes and inbound HTTP traffic.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, TextEncoder,
};
use std::time::Duration;

static DOWNSTREAM_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_downstream_calls_total",
        "Downstream calls by service and outcome",
        &["service", "outcome"]
    )
    .expect("Failed to register downstream calls metric")
});

static DOWNSTREAM_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_downstream_latency_seconds",
        "Downstream call latency by service",
        &["service"]
    )
    .expect("Failed to register downstream latency metric")
});

static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_http_requests_total",
        "Inbound requests by route class and status",
        &["route_class", "status"]
    )
    .expect("Failed to register http requests metric")
});

pub struct GatewayMetrics;

impl GatewayMetrics {
    pub fn record_downstream(service: &str, outcome: &str, latency: Duration) {
        DOWNSTREAM_CALLS
            .with_label_values(&[service, outcome])
            .inc();
        DOWNSTREAM_LATENCY
            .with_label_values(&[service])
            .observe(latency.as_secs_f64());
    }

    pub fn record_http(route_class: &str, status: u16) {
        HTTP_REQUESTS
            .with_label_values(&[route_class, &status.to_string()])
            .inc();
    }

    /// Text exposition of the whole default registry for `/metrics`
    pub fn gather() -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&prometheus::gather())
            .unwrap_or_default()
    }
}
