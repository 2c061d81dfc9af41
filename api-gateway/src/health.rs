//! Health aggregation
//!
//! A background prober hits every registered instance's health endpoint on a
//! fixed interval, independent of request traffic, and merges the verdicts
//! with live circuit-breaker state into one document:
//! - overall status by worst-of rule (critical dependencies drive unhealthy)
//! - per-dependency status, latency and breaker state
//! - raw numbers exported as prometheus gauges for scraping

use crate::config::HealthSettings;
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus::{register_int_gauge_vec, IntGaugeVec};
use resilience::{BreakerRegistry, CircuitState};
use serde::Serialize;
use service_registry::ServiceRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

static DEPENDENCY_HEALTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "gateway_dependency_health",
        "Dependency health (2 healthy, 1 degraded, 0 unhealthy)",
        &["dependency"]
    )
    .expect("Failed to register dependency health metric")
});

static DEPENDENCY_LATENCY_MS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "gateway_dependency_probe_latency_ms",
        "Last health probe latency per dependency",
        &["dependency"]
    )
    .expect("Failed to register dependency latency metric")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn gauge_value(self) -> i64 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDocument {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, DependencyCheck>,
}

impl HealthDocument {
    fn pending() -> Self {
        Self {
            status: HealthStatus::Degraded,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            checks: BTreeMap::new(),
        }
    }
}

/// Worst-of rule: a critical dependency down takes the gateway down; any
/// other trouble degrades it.
fn overall_status(checks: &BTreeMap<String, DependencyCheck>, critical: &[String]) -> HealthStatus {
    let mut status = HealthStatus::Healthy;

    for (name, check) in checks {
        match check.status {
            HealthStatus::Unhealthy if critical.contains(name) => return HealthStatus::Unhealthy,
            HealthStatus::Unhealthy | HealthStatus::Degraded => status = HealthStatus::Degraded,
            HealthStatus::Healthy => {}
        }
    }

    status
}

#[derive(Clone)]
pub struct HealthAggregator {
    registry: ServiceRegistry,
    breakers: BreakerRegistry,
    http: reqwest::Client,
    settings: HealthSettings,
    latest: Arc<RwLock<HealthDocument>>,
}

impl HealthAggregator {
    pub fn new(
        registry: ServiceRegistry,
        breakers: BreakerRegistry,
        settings: HealthSettings,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(settings.probe_timeout())
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build probe client: {e}")))?;

        Ok(Self {
            registry,
            breakers,
            http,
            settings,
            latest: Arc::new(RwLock::new(HealthDocument::pending())),
        })
    }

    /// Latest aggregated document, without touching the network
    pub fn snapshot(&self) -> HealthDocument {
        self.latest.read().clone()
    }

    /// Probe every registered instance and rebuild the document
    pub async fn refresh(&self) -> HealthDocument {
        let mut checks = BTreeMap::new();

        for service in self.registry.service_names() {
            let check = self.check_dependency(&service).await;

            DEPENDENCY_HEALTH
                .with_label_values(&[service.as_str()])
                .set(check.status.gauge_value());
            if let Some(latency) = check.latency_ms {
                DEPENDENCY_LATENCY_MS
                    .with_label_values(&[service.as_str()])
                    .set(latency as i64);
            }

            checks.insert(service, check);
        }

        let document = HealthDocument {
            status: overall_status(&checks, &self.settings.critical),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            checks,
        };

        *self.latest.write() = document.clone();
        document
    }

    async fn check_dependency(&self, service: &str) -> DependencyCheck {
        let mut best_latency: Option<u64> = None;
        let mut any_reachable = false;
        let mut detail = None;

        for instance in self.registry.instances(service) {
            if instance.expired {
                continue;
            }

            let started = Instant::now();
            let outcome = self
                .http
                .get(&instance.registration.health_check_url)
                .send()
                .await;
            let latency = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) if response.status().is_success() => {
                    any_reachable = true;
                    best_latency = Some(best_latency.map_or(latency, |b| b.min(latency)));
                    self.registry
                        .mark_health(&instance.registration.instance_id, true);
                }
                Ok(response) => {
                    detail = Some(format!("probe returned {}", response.status()));
                    self.registry
                        .mark_health(&instance.registration.instance_id, false);
                }
                Err(e) => {
                    detail = Some(format!("unreachable: {e}"));
                    self.registry
                        .mark_health(&instance.registration.instance_id, false);
                }
            }
        }

        let breaker_state = self.breakers.get(service).state();
        let status = if !any_reachable {
            HealthStatus::Unhealthy
        } else if breaker_state != CircuitState::Closed {
            // Reachable but the breaker is still excluding or probing it
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        if status != HealthStatus::Healthy {
            warn!(service, ?status, breaker = %breaker_state, "dependency not healthy");
        } else {
            debug!(service, latency_ms = best_latency, "dependency healthy");
        }

        DependencyCheck {
            status,
            latency_ms: best_latency,
            circuit_breaker: Some(breaker_state.to_string()),
            detail,
        }
    }

    /// Spawn the probe loop, uncoupled from request traffic
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let aggregator = self.clone();
        let interval = self.settings.probe_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                aggregator.refresh().await;
            }
        })
    }
}

// ============= HTTP handlers =============

/// GET /health
pub async fn health(aggregator: web::Data<HealthAggregator>) -> HttpResponse {
    HttpResponse::Ok().json(aggregator.snapshot())
}

/// GET /health/ready - 503 while a critical dependency is down
pub async fn health_ready(aggregator: web::Data<HealthAggregator>) -> HttpResponse {
    let document = aggregator.snapshot();
    match document.status {
        HealthStatus::Unhealthy => HttpResponse::ServiceUnavailable().json(document),
        _ => HttpResponse::Ok().json(document),
    }
}

/// GET /health/live - process liveness only
pub async fn health_live() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "alive",
        "timestamp": Utc::now().timestamp(),
    }))
}

/// GET /metrics - prometheus text exposition
pub async fn metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(GatewayMetrics::gather())
}
