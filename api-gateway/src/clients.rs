//! Service client: the composed path to every downstream dependency
//!
//! One pipeline, strictly ordered: resolve an instance (registry) → check the
//! per-service rate budget → consult the cache (per-call policy) → invoke the
//! network call through circuit breaker, retry executor and deadline → record
//! the outcome → populate the cache on cacheable success → propagate the
//! request correlation id.
//!
//! The network seam is the [`Transport`] trait so tests can script downstream
//! behavior without sockets.

use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use atlas_cache::AtlasCache;
use rate_limit::{keys, CounterStore, SlidingWindowLimiter};
use resilience::{
    presets, with_deadline, with_retry, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerError, DependencyConfig, RetryError, RetryableError,
};
use serde::{Deserialize, Serialize};
use service_registry::{ServiceRegistration, ServiceRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Logical names of the downstream dependencies
pub const AUTH: &str = "auth";
pub const INGESTION: &str = "ingestion";
pub const GRAPH_SEARCH: &str = "graph-search";
pub const EMBEDDINGS: &str = "embeddings";
pub const TOOL_SERVER: &str = "tool-server";

/// How a call interacts with the distributed cache
#[derive(Debug, Clone)]
pub enum CachePolicy {
    /// No cache interaction
    Bypass,
    /// Cache-aside: serve a fresh entry if present, otherwise call and store
    Aside { key: String, ttl: Duration },
    /// Always call, then update the entry with the response
    WriteThrough { key: String, ttl: Duration },
}

/// One outbound request through the resilience pipeline
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub method: reqwest::Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub cache: CachePolicy,
    /// Idempotent calls may be retried; others get exactly one attempt
    pub idempotent: bool,
}

impl CallRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
            body: None,
            cache: CachePolicy::Bypass,
            idempotent: true,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            path: path.into(),
            body: Some(body),
            cache: CachePolicy::Bypass,
            idempotent: false,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::DELETE,
            path: path.into(),
            body: None,
            cache: CachePolicy::Bypass,
            idempotent: false,
        }
    }

    pub fn cached(mut self, key: String, ttl: Duration) -> Self {
        self.cache = CachePolicy::Aside { key, ttl };
        self
    }

    pub fn write_through(mut self, key: String, ttl: Duration) -> Self {
        self.cache = CachePolicy::WriteThrough { key, ttl };
        self
    }

    /// Mark a non-GET call as safe to retry
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

/// Downstream response as the gateway sees it: a status and an opaque body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl CallResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    Invalid(String),
}

/// Network seam between the pipeline and the wire
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        base_url: &str,
        request: &CallRequest,
        request_id: &str,
    ) -> std::result::Result<CallResponse, TransportError>;
}

/// Production transport over reqwest
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            // Per-call deadlines are enforced by the pipeline; this is a
            // backstop against a wedged connection
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        base_url: &str,
        request: &CallRequest,
        request_id: &str,
    ) -> std::result::Result<CallResponse, TransportError> {
        let url = format!("{}{}", base_url, request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header("x-request-id", request_id);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Invalid(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Invalid(e.to_string()))?;

        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(CallResponse { status, body })
    }
}

/// Per-dependency resilience bundles, preset-tuned
pub fn default_dependency_configs() -> HashMap<String, DependencyConfig> {
    HashMap::from([
        (AUTH.to_string(), presets::auth_config()),
        (INGESTION.to_string(), presets::ingestion_config()),
        (GRAPH_SEARCH.to_string(), presets::graph_search_config()),
        (EMBEDDINGS.to_string(), presets::embeddings_config()),
        (TOOL_SERVER.to_string(), presets::tool_server_config()),
    ])
}

pub struct ServiceClientOptions {
    /// Per-downstream-service request budget
    pub service_limit: u32,
    pub service_window: Duration,
    pub skip_rate_limit: bool,
    /// Breaker knobs for dependencies without a preset
    pub default_breaker: CircuitBreakerConfig,
    pub dependency_configs: HashMap<String, DependencyConfig>,
}

impl Default for ServiceClientOptions {
    fn default() -> Self {
        Self {
            service_limit: 1000,
            service_window: Duration::from_secs(60),
            skip_rate_limit: false,
            default_breaker: CircuitBreakerConfig::default(),
            dependency_configs: default_dependency_configs(),
        }
    }
}

enum AttemptFailure {
    Server(CallResponse),
    Transport(TransportError),
    DeadlineExceeded,
}

/// The composed downstream entry point
#[derive(Clone)]
pub struct ServiceClient {
    registry: ServiceRegistry,
    limiter: SlidingWindowLimiter<Arc<dyn CounterStore>>,
    cache: AtlasCache,
    breakers: BreakerRegistry,
    transport: Arc<dyn Transport>,
    configs: Arc<HashMap<String, DependencyConfig>>,
    service_limit: u32,
    service_window: Duration,
    skip_rate_limit: bool,
}

impl ServiceClient {
    pub fn new(
        registry: ServiceRegistry,
        limiter: SlidingWindowLimiter<Arc<dyn CounterStore>>,
        cache: AtlasCache,
        transport: Arc<dyn Transport>,
        options: ServiceClientOptions,
    ) -> Self {
        let breakers = BreakerRegistry::new(options.default_breaker.clone());
        for (name, config) in &options.dependency_configs {
            breakers.configure(name, config.circuit_breaker.clone());
        }

        Self {
            registry,
            limiter,
            cache,
            breakers,
            transport,
            configs: Arc::new(options.dependency_configs),
            service_limit: options.service_limit,
            service_window: options.service_window,
            skip_rate_limit: options.skip_rate_limit,
        }
    }

    /// Live breaker states, for health aggregation
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> &AtlasCache {
        &self.cache
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    fn config_for(&self, service: &str) -> DependencyConfig {
        self.configs.get(service).cloned().unwrap_or_else(|| {
            DependencyConfig {
                deadline: Duration::from_secs(10),
                circuit_breaker: CircuitBreakerConfig::default(),
                retry: Some(Default::default()),
            }
        })
    }

    /// Call a downstream service through the full resilience pipeline
    pub async fn call(
        &self,
        service: &str,
        request: CallRequest,
        request_id: &str,
    ) -> Result<CallResponse> {
        let target = self.registry.resolve(service)?;

        if !self.skip_rate_limit {
            match self
                .limiter
                .check(
                    &keys::service(service),
                    self.service_limit,
                    self.service_window,
                )
                .await
            {
                Ok(decision) if !decision.allowed => {
                    return Err(GatewayError::RateLimited {
                        limit: decision.limit,
                        reset_at: decision.reset_at,
                    });
                }
                Ok(_) => {}
                // A dead counter store downgrades rate limiting rather than
                // taking every request down with it
                Err(e) => warn!(service, error = %e, "service rate limit check failed, allowing"),
            }
        }

        match request.cache.clone() {
            CachePolicy::Aside { key, ttl } => {
                self.cache
                    .get_or_compute(&key, ttl, || {
                        self.dispatch(service, &target, &request, request_id)
                    })
                    .await
            }
            CachePolicy::WriteThrough { key, ttl } => {
                let response = self.dispatch(service, &target, &request, request_id).await?;
                self.cache.write_through(&key, ttl, &response).await;
                Ok(response)
            }
            CachePolicy::Bypass => self.dispatch(service, &target, &request, request_id).await,
        }
    }

    /// Breaker ∘ retry ∘ deadline around the transport call
    async fn dispatch(
        &self,
        service: &str,
        target: &ServiceRegistration,
        request: &CallRequest,
        request_id: &str,
    ) -> Result<CallResponse> {
        let config = self.config_for(service);
        let breaker = self.breakers.get(service);
        let base_url = target.base_url();
        let started = Instant::now();

        let result = match (&config.retry, request.idempotent) {
            (Some(policy), true) => with_retry(policy, |attempt| {
                self.attempt(
                    service,
                    &breaker,
                    config.deadline,
                    &base_url,
                    request,
                    request_id,
                    attempt,
                )
            })
            .await
            .map_err(|err| match err {
                RetryError::Fatal { source, .. } => source,
                RetryError::Exhausted { attempts, last } => GatewayError::RetriesExhausted {
                    service: service.to_string(),
                    attempts,
                    source: Box::new(last),
                },
            }),
            _ => self
                .attempt(
                    service,
                    &breaker,
                    config.deadline,
                    &base_url,
                    request,
                    request_id,
                    1,
                )
                .await
                .map_err(|err| match err {
                    RetryableError::Transient(e) | RetryableError::Fatal(e) => e,
                }),
        };

        let latency = started.elapsed();
        match &result {
            Ok(response) => {
                GatewayMetrics::record_downstream(service, "success", latency);
                debug!(
                    service,
                    request_id,
                    status = response.status,
                    latency_ms = latency.as_millis() as u64,
                    "downstream call completed"
                );
            }
            Err(error) => {
                GatewayMetrics::record_downstream(service, error.error_code(), latency);
                debug!(
                    service,
                    request_id,
                    error = %error,
                    latency_ms = latency.as_millis() as u64,
                    "downstream call failed"
                );
            }
        }

        result
    }

    /// One attempt, counted by the breaker. 4xx responses pass the breaker as
    /// successes (the dependency answered) but are fatal for the retry chain.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        service: &str,
        breaker: &CircuitBreaker,
        deadline: Duration,
        base_url: &str,
        request: &CallRequest,
        request_id: &str,
        attempt: u32,
    ) -> std::result::Result<CallResponse, RetryableError<GatewayError>> {
        debug!(service, request_id, attempt, "dispatching attempt");

        let outcome = breaker
            .call(|| async {
                match with_deadline(deadline, self.transport.send(base_url, request, request_id))
                    .await
                {
                    Ok(Ok(response)) if response.status >= 500 => {
                        Err(AttemptFailure::Server(response))
                    }
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(transport_error)) => Err(AttemptFailure::Transport(transport_error)),
                    Err(_) => Err(AttemptFailure::DeadlineExceeded),
                }
            })
            .await;

        match outcome {
            Ok(response) if !response.is_success() => {
                Err(RetryableError::Fatal(GatewayError::Dependency {
                    service: service.to_string(),
                    status: response.status,
                    message: body_message(&response),
                }))
            }
            Ok(response) => Ok(response),
            Err(CircuitBreakerError::Open(_)) => {
                Err(RetryableError::Fatal(GatewayError::CircuitOpen {
                    service: service.to_string(),
                    retry_after_secs: breaker.retry_after().map(|d| d.as_secs()).unwrap_or(0),
                }))
            }
            Err(CircuitBreakerError::Call(AttemptFailure::DeadlineExceeded)) => {
                // A blown deadline aborts the whole retry chain
                Err(RetryableError::Fatal(GatewayError::Timeout {
                    service: service.to_string(),
                }))
            }
            Err(CircuitBreakerError::Call(AttemptFailure::Server(response))) => {
                Err(RetryableError::Transient(GatewayError::Dependency {
                    service: service.to_string(),
                    status: response.status,
                    message: body_message(&response),
                }))
            }
            Err(CircuitBreakerError::Call(AttemptFailure::Transport(e))) => {
                Err(RetryableError::Transient(GatewayError::Dependency {
                    service: service.to_string(),
                    status: 502,
                    message: e.to_string(),
                }))
            }
        }
    }
}

/// Pull a human-readable message out of a downstream error body
fn body_message(response: &CallResponse) -> String {
    response.body["error"]["message"]
        .as_str()
        .or_else(|| response.body["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let raw = response.body.to_string();
            if raw.chars().count() > 200 {
                format!("{}...", raw.chars().take(200).collect::<String>())
            } else {
                raw
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders_set_sane_defaults() {
        let get = CallRequest::get("/v1/entities/42");
        assert!(get.idempotent);
        assert!(matches!(get.cache, CachePolicy::Bypass));

        let post = CallRequest::post("/v1/search", serde_json::json!({"q": "rust"}));
        assert!(!post.idempotent);

        let retryable_post =
            CallRequest::post("/v1/search", serde_json::json!({"q": "rust"})).idempotent();
        assert!(retryable_post.idempotent);
    }

    #[test]
    fn cache_builders_attach_policies() {
        let cached = CallRequest::get("/x").cached("v1:search:k".into(), Duration::from_secs(30));
        assert!(matches!(cached.cache, CachePolicy::Aside { .. }));

        let wt = CallRequest::post("/x", serde_json::Value::Null)
            .write_through("v1:source:1".into(), Duration::from_secs(60));
        assert!(matches!(wt.cache, CachePolicy::WriteThrough { .. }));
    }

    #[test]
    fn body_message_prefers_structured_error() {
        let response = CallResponse {
            status: 404,
            body: serde_json::json!({"error": {"message": "entity missing"}}),
        };
        assert_eq!(body_message(&response), "entity missing");

        let flat = CallResponse {
            status: 500,
            body: serde_json::json!({"message": "boom"}),
        };
        assert_eq!(body_message(&flat), "boom");
    }

    #[test]
    fn body_message_truncates_long_multibyte_bodies_safely() {
        let response = CallResponse {
            status: 500,
            body: serde_json::json!({ "detail": "Fehlgeschlagen: Überlastung ü".repeat(20) }),
        };

        let message = body_message(&response);
        assert!(message.ends_with("..."));
        assert_eq!(message.chars().count(), 203);
    }
}
