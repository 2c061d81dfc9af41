/// Preset configurations per downstream dependency
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Resilience bundle for one dependency
#[derive(Debug, Clone)]
pub struct DependencyConfig {
    pub deadline: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: Option<RetryPolicy>,
}

/// Auth service: token verification
///
/// - Deadline: 3s (verification sits on the hot path of every request)
/// - Breaker trips fast and recovers fast, auth outages are high-blast-radius
/// - Retry: 2 attempts with short backoff (reads, idempotent)
pub fn auth_config() -> DependencyConfig {
    DependencyConfig {
        deadline: Duration::from_secs(3),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 0.5,
            min_calls: 10,
            success_threshold: 2,
            open_timeout: Duration::from_secs(15),
            half_open_max_calls: 2,
            window: Duration::from_secs(30),
        },
        retry: Some(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Data ingestion service: source CRUD and sync triggers
///
/// - Deadline: 15s (connector listings can be slow)
/// - No retry: sync triggers are not idempotent
pub fn ingestion_config() -> DependencyConfig {
    DependencyConfig {
        deadline: Duration::from_secs(15),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 0.5,
            min_calls: 10,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            window: Duration::from_secs(60),
        },
        retry: None,
    }
}

/// Graph/search service: hybrid and vector queries
///
/// - Deadline: 10s
/// - Retry: 3 attempts (queries are idempotent)
pub fn graph_search_config() -> DependencyConfig {
    DependencyConfig {
        deadline: Duration::from_secs(10),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 0.5,
            min_calls: 10,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            window: Duration::from_secs(60),
        },
        retry: Some(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Embedding service: query embedding generation
///
/// - Deadline: 30s (model inference can be slow under load)
/// - Breaker more tolerant, latency spikes are normal
pub fn embeddings_config() -> DependencyConfig {
    DependencyConfig {
        deadline: Duration::from_secs(30),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 0.6,
            min_calls: 10,
            success_threshold: 3,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
            window: Duration::from_secs(120),
        },
        retry: Some(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Tool server: capability listing and tool invocation
///
/// - Deadline: 20s (tools proxy to third parties)
/// - Retry: 2 attempts, invocations declared idempotent by the tool contract
pub fn tool_server_config() -> DependencyConfig {
    DependencyConfig {
        deadline: Duration::from_secs(20),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 0.5,
            min_calls: 10,
            success_threshold: 3,
            open_timeout: Duration::from_secs(45),
            half_open_max_calls: 3,
            window: Duration::from_secs(90),
        },
        retry: Some(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_preset_is_tight() {
        let config = auth_config();
        assert_eq!(config.deadline, Duration::from_secs(3));
        assert_eq!(config.circuit_breaker.open_timeout, Duration::from_secs(15));
        assert!(config.retry.is_some());
    }

    #[test]
    fn ingestion_preset_never_retries() {
        let config = ingestion_config();
        assert!(config.retry.is_none());
    }

    #[test]
    fn graph_search_preset_retries_queries() {
        let config = graph_search_config();
        assert_eq!(config.retry.unwrap().max_attempts, 3);
    }

    #[test]
    fn embeddings_preset_tolerates_latency() {
        let config = embeddings_config();
        assert_eq!(config.deadline, Duration::from_secs(30));
        assert!(config.circuit_breaker.failure_threshold > 0.5);
    }

    #[test]
    fn tool_server_preset_has_bounded_retries() {
        let config = tool_server_config();
        assert_eq!(config.retry.unwrap().max_attempts, 2);
    }
}
