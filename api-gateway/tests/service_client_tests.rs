//! Service client pipeline tests over a scripted transport
//!
//! No sockets: the transport seam is programmed per test, so breaker, retry,
//! deadline, cache and rate-limit behavior can be asserted deterministically.

use api_gateway::clients::{
    CallRequest, CallResponse, ServiceClient, ServiceClientOptions, Transport, TransportError,
    GRAPH_SEARCH,
};
use api_gateway::error::GatewayError;
use atlas_cache::AtlasCache;
use rate_limit::{CounterStore, SlidingWindowLimiter};
use resilience::{CircuitBreakerConfig, CircuitState, DependencyConfig, RetryPolicy};
use serde_json::json;
use service_registry::{ServiceRegistration, ServiceRegistry};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One programmed downstream behavior
enum Step {
    Status(u16),
    Json(u16, serde_json::Value),
    Connect,
    Delay(Duration, u16),
}

struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _base_url: &str,
        _request: &CallRequest,
        _request_id: &str,
    ) -> Result<CallResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();

        match step {
            // An exhausted script answers 200 so tests only program the
            // interesting prefix
            None => Ok(CallResponse {
                status: 200,
                body: json!({ "ok": true }),
            }),
            Some(Step::Status(status)) => Ok(CallResponse {
                status,
                body: serde_json::Value::Null,
            }),
            Some(Step::Json(status, body)) => Ok(CallResponse { status, body }),
            Some(Step::Connect) => Err(TransportError::Connect("connection refused".into())),
            Some(Step::Delay(delay, status)) => {
                tokio::time::sleep(delay).await;
                Ok(CallResponse {
                    status,
                    body: serde_json::Value::Null,
                })
            }
        }
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        multiplier: 2.0,
        jitter: false,
    }
}

fn graph_config(retry: Option<RetryPolicy>, breaker: CircuitBreakerConfig) -> DependencyConfig {
    DependencyConfig {
        deadline: Duration::from_secs(2),
        circuit_breaker: breaker,
        retry,
    }
}

fn test_client(
    transport: Arc<ScriptedTransport>,
    config: DependencyConfig,
    service_limit: u32,
) -> ServiceClient {
    let registry = ServiceRegistry::new();
    registry.register(ServiceRegistration::from_base_url(
        GRAPH_SEARCH,
        "http://graph-search:9080",
        Duration::from_secs(60),
    ));

    let store: Arc<dyn CounterStore> = Arc::new(rate_limit::MemoryStore::new());
    let limiter = SlidingWindowLimiter::new(store);

    ServiceClient::new(
        registry,
        limiter,
        AtlasCache::local_only(),
        transport,
        ServiceClientOptions {
            service_limit,
            service_window: Duration::from_secs(60),
            skip_rate_limit: false,
            default_breaker: CircuitBreakerConfig::default(),
            dependency_configs: HashMap::from([(GRAPH_SEARCH.to_string(), config)]),
        },
    )
}

#[tokio::test]
async fn cached_call_hits_downstream_once() {
    let transport = ScriptedTransport::new(vec![Step::Json(200, json!({ "results": [1, 2] }))]);
    let client = test_client(
        transport.clone(),
        graph_config(Some(fast_retry(3)), CircuitBreakerConfig::default()),
        10_000,
    );

    let request =
        || CallRequest::get("/v1/search").cached("v1:search:q".into(), Duration::from_secs(30));

    let first = client
        .call(GRAPH_SEARCH, request(), "req-1")
        .await
        .unwrap();
    let second = client
        .call(GRAPH_SEARCH, request(), "req-2")
        .await
        .unwrap();

    assert_eq!(first.body, second.body);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn service_budget_rejects_with_reset_guidance() {
    let transport = ScriptedTransport::new(vec![]);
    let client = test_client(
        transport.clone(),
        graph_config(None, CircuitBreakerConfig::default()),
        2,
    );

    for _ in 0..2 {
        client
            .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
            .await
            .unwrap();
    }

    let denied = client
        .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
        .await
        .unwrap_err();

    match denied {
        GatewayError::RateLimited { limit, reset_at } => {
            assert_eq!(limit, 2);
            assert!(reset_at > chrono::Utc::now());
        }
        other => panic!("expected RateLimited, got {other}"),
    }
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn unknown_service_surfaces_no_healthy_instance() {
    let transport = ScriptedTransport::new(vec![]);
    let client = test_client(
        transport.clone(),
        graph_config(None, CircuitBreakerConfig::default()),
        10_000,
    );

    let err = client
        .call("embeddings", CallRequest::get("/x"), "req")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::NoHealthyInstance { .. }));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn client_errors_pass_through_without_retry() {
    let transport = ScriptedTransport::new(vec![Step::Json(
        404,
        json!({ "error": { "message": "entity missing" } }),
    )]);
    let client = test_client(
        transport.clone(),
        graph_config(Some(fast_retry(3)), CircuitBreakerConfig::default()),
        10_000,
    );

    let err = client
        .call(GRAPH_SEARCH, CallRequest::get("/v1/entities/42"), "req")
        .await
        .unwrap_err();

    match err {
        GatewayError::Dependency {
            status, message, ..
        } => {
            assert_eq!(status, 404);
            assert_eq!(message, "entity missing");
        }
        other => panic!("expected Dependency, got {other}"),
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn server_errors_retry_then_exhaust() {
    let transport = ScriptedTransport::new(vec![
        Step::Status(500),
        Step::Status(502),
        Step::Status(500),
    ]);
    let client = test_client(
        transport.clone(),
        graph_config(Some(fast_retry(3)), CircuitBreakerConfig::default()),
        10_000,
    );

    let err = client
        .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
        .await
        .unwrap_err();

    match err {
        GatewayError::RetriesExhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *source,
                GatewayError::Dependency { status: 500, .. }
            ));
        }
        other => panic!("expected RetriesExhausted, got {other}"),
    }
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn transient_connect_errors_recover_within_budget() {
    let transport = ScriptedTransport::new(vec![Step::Connect, Step::Status(200)]);
    let client = test_client(
        transport.clone(),
        graph_config(Some(fast_retry(3)), CircuitBreakerConfig::default()),
        10_000,
    );

    let response = client
        .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn blown_deadline_aborts_the_retry_chain() {
    let transport = ScriptedTransport::new(vec![Step::Delay(Duration::from_millis(300), 200)]);
    let mut config = graph_config(Some(fast_retry(3)), CircuitBreakerConfig::default());
    config.deadline = Duration::from_millis(50);
    let client = test_client(transport.clone(), config, 10_000);

    let err = client
        .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout { .. }));
    // No further attempts were queued after the deadline fired
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn breaker_lifecycle_end_to_end() {
    // failure_threshold 50%, min_calls 10, open_timeout 300ms, 3 successes
    // close from half-open
    let breaker_config = CircuitBreakerConfig {
        failure_threshold: 0.5,
        min_calls: 10,
        success_threshold: 3,
        open_timeout: Duration::from_millis(300),
        half_open_max_calls: 2,
        window: Duration::from_secs(60),
    };

    let mut script = Vec::new();
    for _ in 0..4 {
        script.push(Step::Status(200));
    }
    for _ in 0..6 {
        script.push(Step::Status(500));
    }
    let transport = ScriptedTransport::new(script);
    let client = test_client(
        transport.clone(),
        graph_config(None, breaker_config),
        10_000,
    );

    // 6 of the first 10 calls fail: the breaker trips on the 10th outcome
    for _ in 0..4 {
        client
            .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
            .await
            .unwrap();
    }
    for _ in 0..6 {
        let err = client
            .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Dependency { status: 500, .. }));
    }
    assert_eq!(
        client.breakers().get(GRAPH_SEARCH).state(),
        CircuitState::Open
    );

    // The 11th call fails fast without contacting the dependency
    let rejected = client
        .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
        .await
        .unwrap_err();
    match rejected {
        GatewayError::CircuitOpen {
            retry_after_secs, ..
        } => assert!(retry_after_secs <= 1),
        other => panic!("expected CircuitOpen, got {other}"),
    }
    assert_eq!(transport.calls(), 10);

    // After the open timeout one probe succeeds and the breaker stays
    // half-open; two more successes close it
    tokio::time::sleep(Duration::from_millis(350)).await;

    client
        .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
        .await
        .unwrap();
    assert_eq!(
        client.breakers().get(GRAPH_SEARCH).state(),
        CircuitState::HalfOpen
    );

    for _ in 0..2 {
        client
            .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
            .await
            .unwrap();
    }
    assert_eq!(
        client.breakers().get(GRAPH_SEARCH).state(),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn open_circuit_is_not_retried_into() {
    // min_calls low so the breaker trips inside one retry chain
    let breaker_config = CircuitBreakerConfig {
        failure_threshold: 0.5,
        min_calls: 2,
        success_threshold: 1,
        open_timeout: Duration::from_secs(10),
        half_open_max_calls: 1,
        window: Duration::from_secs(60),
    };
    let transport = ScriptedTransport::new(vec![
        Step::Status(500),
        Step::Status(500),
        Step::Status(500),
    ]);
    let client = test_client(
        transport.clone(),
        graph_config(Some(fast_retry(5)), breaker_config),
        10_000,
    );

    let err = client
        .call(GRAPH_SEARCH, CallRequest::get("/x"), "req")
        .await
        .unwrap_err();

    // Attempts 1-2 reach the dependency and trip the breaker; attempt 3 is
    // rejected by the open circuit and ends the chain early
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn write_through_entry_is_visible_after_call() {
    let transport = ScriptedTransport::new(vec![Step::Json(200, json!({ "id": "s-1" }))]);
    let client = test_client(
        transport.clone(),
        graph_config(None, CircuitBreakerConfig::default()),
        10_000,
    );

    let request = CallRequest::post("/v1/sources", json!({ "name": "docs" }))
        .write_through("v1:source:s-1".into(), Duration::from_secs(60));
    client.call(GRAPH_SEARCH, request, "req").await.unwrap();

    let cached: Option<api_gateway::clients::CallResponse> =
        client.cache().get("v1:source:s-1").await;
    assert_eq!(cached.unwrap().body["id"], "s-1");
}
