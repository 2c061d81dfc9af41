/// Circuit breaker with a rolling failure-ratio window
///
/// State transitions:
/// - Closed → Open: window has at least `min_calls` calls and the failure
///   ratio reaches `failure_threshold`
/// - Open → HalfOpen: after `open_timeout`, admitting a bounded probe budget
/// - HalfOpen → Closed: `success_threshold` consecutive probe successes
/// - HalfOpen → Open: any probe failure, resetting the timeout clock
use crate::metrics::CircuitBreakerMetrics;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Dependency excluded, calls fail fast
    Open,
    /// Probing recovery, limited concurrent calls allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (0.0 - 1.0) that trips the circuit
    pub failure_threshold: f64,
    /// Minimum calls in the rolling window before the ratio is evaluated
    pub min_calls: u32,
    /// Consecutive successes in HalfOpen required to close the circuit
    pub success_threshold: u32,
    /// Duration the circuit stays open before admitting probes
    pub open_timeout: Duration,
    /// Maximum concurrent probe calls while HalfOpen
    pub half_open_max_calls: u32,
    /// Length of the rolling window for failure-ratio tracking
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            min_calls: 10,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            window: Duration::from_secs(60),
        }
    }
}

/// Emitted on every state transition, for metrics and health reporting
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub dependency: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: chrono::DateTime<chrono::Utc>,
}

struct BreakerInner {
    current: CircuitState,
    window_start: Instant,
    failure_count: u32,
    success_count: u32,
    total_calls: u32,
    consecutive_probe_successes: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            current: CircuitState::Closed,
            window_start: Instant::now(),
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            consecutive_probe_successes: 0,
            opened_at: None,
            half_open_in_flight: 0,
        }
    }

    fn reset_window(&mut self) {
        self.window_start = Instant::now();
        self.failure_count = 0;
        self.success_count = 0;
        self.total_calls = 0;
    }

    fn failure_ratio(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_calls as f64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit '{0}' is open - failing fast")]
    Open(String),
    #[error("call failed: {0}")]
    Call(E),
}

/// Per-dependency circuit breaker
///
/// Cloning is cheap and shares the underlying state, so one breaker can be
/// handed to any number of concurrent callers.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerInner>>,
    events: broadcast::Sender<StateTransition>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            name: Arc::from(name.into()),
            config,
            state: Arc::new(RwLock::new(BreakerInner::new())),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.events.subscribe()
    }

    /// Execute a unit of work against this dependency
    ///
    /// The call is rejected with `CircuitBreakerError::Open` when the circuit
    /// is open (or the half-open probe budget is exhausted); otherwise the
    /// outcome is recorded and drives the state machine.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let probe = match self.try_acquire() {
            Ok(probe) => probe,
            Err(name) => return Err(CircuitBreakerError::Open(name)),
        };

        match f().await {
            Ok(result) => {
                self.record_success(probe);
                Ok(result)
            }
            Err(e) => {
                self.record_failure(probe);
                Err(CircuitBreakerError::Call(e))
            }
        }
    }

    /// Admission check. Returns whether the admitted call is a half-open probe.
    fn try_acquire(&self) -> Result<bool, String> {
        let mut inner = self.state.write();
        self.roll_window(&mut inner);

        match inner.current {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed_open = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if elapsed_open {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.consecutive_probe_successes = 0;
                    inner.half_open_in_flight = 1;
                    Ok(true)
                } else {
                    CircuitBreakerMetrics::record_call(&self.name, "open", "rejected");
                    Err(self.name.to_string())
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(true)
                } else {
                    CircuitBreakerMetrics::record_call(&self.name, "half_open", "rejected");
                    Err(self.name.to_string())
                }
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.state.write();
        self.roll_window(&mut inner);

        inner.success_count += 1;
        inner.total_calls += 1;
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        CircuitBreakerMetrics::record_call(&self.name, inner.current.as_str(), "success");

        if inner.current == CircuitState::HalfOpen {
            inner.consecutive_probe_successes += 1;
            if inner.consecutive_probe_successes >= self.config.success_threshold {
                self.transition(&mut inner, CircuitState::Closed);
                inner.reset_window();
                inner.opened_at = None;
                inner.half_open_in_flight = 0;
            }
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.state.write();
        self.roll_window(&mut inner);

        inner.failure_count += 1;
        inner.total_calls += 1;
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        CircuitBreakerMetrics::record_call(&self.name, inner.current.as_str(), "failure");

        match inner.current {
            CircuitState::Closed => {
                if inner.total_calls >= self.config.min_calls
                    && inner.failure_ratio() >= self.config.failure_threshold
                {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_in_flight = 0;
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens and restarts the timeout clock
                self.transition(&mut inner, CircuitState::Open);
                inner.opened_at = Some(Instant::now());
                inner.consecutive_probe_successes = 0;
                inner.half_open_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Restart the rolling window once it has fully elapsed while Closed
    fn roll_window(&self, inner: &mut BreakerInner) {
        if inner.current == CircuitState::Closed
            && inner.window_start.elapsed() >= self.config.window
        {
            inner.reset_window();
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.current;
        inner.current = to;

        let event = StateTransition {
            dependency: self.name.to_string(),
            from,
            to,
            at: chrono::Utc::now(),
        };

        match to {
            CircuitState::Open => warn!(
                dependency = %self.name,
                from = %from,
                failures = inner.failure_count,
                total = inner.total_calls,
                "circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                dependency = %self.name,
                "circuit breaker half-open, admitting probes"
            ),
            CircuitState::Closed => info!(
                dependency = %self.name,
                "circuit breaker closed, dependency recovered"
            ),
        }

        CircuitBreakerMetrics::record_state_transition(&self.name, from.as_str(), to.as_str());
        let _ = self.events.send(event);
    }

    /// Current state without advancing the machine (for monitoring)
    pub fn state(&self) -> CircuitState {
        let inner = self.state.read();
        // An open circuit past its timeout is reported half-open even before
        // the next call arrives, so health output matches admission behavior.
        if inner.current == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.open_timeout {
                    return CircuitState::HalfOpen;
                }
            }
        }
        inner.current
    }

    /// Current failure ratio in the rolling window (for monitoring)
    pub fn failure_ratio(&self) -> f64 {
        self.state.read().failure_ratio()
    }

    /// Seconds until an open circuit admits probes again, if open
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.state.read();
        if inner.current != CircuitState::Open {
            return None;
        }
        inner
            .opened_at
            .map(|t| self.config.open_timeout.saturating_sub(t.elapsed()))
    }
}

/// Registry of circuit breakers keyed by dependency name
///
/// Breakers are created lazily from the default config unless a
/// per-dependency override was installed up front.
#[derive(Clone)]
pub struct BreakerRegistry {
    breakers: Arc<dashmap::DashMap<String, CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(dashmap::DashMap::new()),
            default_config,
        }
    }

    /// Install a dependency-specific configuration
    pub fn configure(&self, dependency: &str, config: CircuitBreakerConfig) {
        self.breakers
            .insert(dependency.to_string(), CircuitBreaker::new(dependency, config));
    }

    pub fn get(&self, dependency: &str) -> CircuitBreaker {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                CircuitBreaker::new(dependency, self.default_config.clone())
            })
            .clone()
    }

    /// Snapshot of every known breaker's state
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }
}
