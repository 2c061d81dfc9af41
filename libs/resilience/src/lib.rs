/// Resilience patterns for the Atlas gateway
///
/// This library turns unreliable downstream dependencies into callable units
/// with bounded failure behavior:
/// - **Circuit Breaker**: excludes a failing dependency once its failure ratio
///   trips, and probes it back to health with a bounded half-open budget
/// - **Retry Executor**: exponential backoff with jitter for transient
///   failures, short-circuiting on non-retryable ones
/// - **Deadline**: hard time limit attached to every outbound call
/// - **Preset Configurations**: pre-tuned bundles per dependency kind
///
/// # Example: call through a breaker
///
/// ```rust,no_run
/// use resilience::{presets, CircuitBreaker};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::graph_search_config();
///     let breaker = CircuitBreaker::new("graph-search", config.circuit_breaker);
///
///     let result = breaker.call(|| async {
///         // network call against graph-search here
///         Ok::<_, String>(())
///     }).await;
/// }
/// ```
///
/// # Example: retry a transient failure
///
/// ```rust,no_run
/// use resilience::{with_retry, RetryPolicy, RetryableError};
///
/// #[tokio::main]
/// async fn main() {
///     let policy = RetryPolicy::default();
///
///     let result = with_retry(&policy, |_attempt| async {
///         Err::<(), _>(RetryableError::Transient("connection reset"))
///     }).await;
/// }
/// ```

pub mod circuit_breaker;
pub mod deadline;
pub mod metrics;
pub mod presets;
pub mod retry;

pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    StateTransition,
};
pub use deadline::{with_deadline, with_deadline_result, DeadlineError};
pub use presets::{
    auth_config, embeddings_config, graph_search_config, ingestion_config, tool_server_config,
    DependencyConfig,
};
pub use retry::{with_retry, RetryError, RetryPolicy, RetryableError};
