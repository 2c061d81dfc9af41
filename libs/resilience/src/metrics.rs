/// Prometheus metrics for resilience patterns
#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_circuit_breaker_state_transitions_total",
        "Total number of circuit breaker state transitions",
        &["dependency", "from", "to"]
    )
    .expect("Failed to register circuit breaker state transitions metric")
});

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_circuit_breaker_calls_total",
        "Total number of circuit breaker calls",
        &["dependency", "state", "result"]
    )
    .expect("Failed to register circuit breaker calls metric")
});

#[cfg(feature = "metrics")]
static RETRY_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_retry_attempts",
        "Number of attempts before success or final failure",
        &["result"]
    )
    .expect("Failed to register retry attempts metric")
});

/// Metrics collector for circuit breakers
#[cfg(feature = "metrics")]
pub struct CircuitBreakerMetrics;

#[cfg(feature = "metrics")]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(dependency: &str, from: &str, to: &str) {
        CIRCUIT_BREAKER_STATE_TRANSITIONS
            .with_label_values(&[dependency, from, to])
            .inc();
    }

    pub fn record_call(dependency: &str, state: &str, result: &str) {
        CIRCUIT_BREAKER_CALLS
            .with_label_values(&[dependency, state, result])
            .inc();
    }
}

/// Metrics collector for retries
#[cfg(feature = "metrics")]
pub struct RetryMetrics;

#[cfg(feature = "metrics")]
impl RetryMetrics {
    pub fn record_attempts(result: &str, attempts: u32) {
        RETRY_ATTEMPTS
            .with_label_values(&[result])
            .observe(attempts as f64);
    }
}

// No-op implementations when the metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub struct CircuitBreakerMetrics;

#[cfg(not(feature = "metrics"))]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(_dependency: &str, _from: &str, _to: &str) {}
    pub fn record_call(_dependency: &str, _state: &str, _result: &str) {}
}

#[cfg(not(feature = "metrics"))]
pub struct RetryMetrics;

#[cfg(not(feature = "metrics"))]
impl RetryMetrics {
    pub fn record_attempts(_result: &str, _attempts: u32) {}
}
