//! Configuration for the Atlas API gateway
//!
//! Loaded from environment variables with development defaults; a local
//! `.env` file is honored. Every resilience knob the gateway consumes is
//! surfaced here rather than hard-coded at the call sites.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub services: ServiceEndpoints,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub resilience: ResilienceSettings,
    pub health: HealthSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

/// Base URLs of the downstream dependencies, seeded into the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub auth_service: String,
    pub ingestion_service: String,
    pub graph_search_service: String,
    pub embedding_service: String,
    pub tool_server: String,
}

impl ServiceEndpoints {
    /// Logical name / base URL pairs in registry seeding order
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![
            (crate::clients::AUTH, self.auth_service.as_str()),
            (crate::clients::INGESTION, self.ingestion_service.as_str()),
            (crate::clients::GRAPH_SEARCH, self.graph_search_service.as_str()),
            (crate::clients::EMBEDDINGS, self.embedding_service.as_str()),
            (crate::clients::TOOL_SERVER, self.tool_server.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Absent means degraded single-instance mode: in-memory counters and
    /// cache, no cross-instance invalidation
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub default_limit: u32,
    pub search_limit: u32,
    pub sources_limit: u32,
    pub sync_limit: u32,
    pub window_secs: u64,
    /// Per-downstream-service budget applied inside the service client
    pub service_limit: u32,
    pub service_window_secs: u64,
    /// Development toggle, never set in production
    pub skip: bool,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn service_window(&self) -> Duration {
        Duration::from_secs(self.service_window_secs)
    }

    pub fn limit_for_class(&self, class: &str) -> u32 {
        match class {
            "search" => self.search_limit,
            "sources" => self.sources_limit,
            "sync" => self.sync_limit,
            _ => self.default_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub search_ttl_secs: u64,
    pub entity_ttl_secs: u64,
    pub auth_ttl_secs: u64,
    pub capabilities_ttl_secs: u64,
    pub default_ttl_secs: u64,
}

impl CacheSettings {
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }

    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_secs)
    }

    pub fn auth_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_ttl_secs)
    }

    pub fn capabilities_ttl(&self) -> Duration {
        Duration::from_secs(self.capabilities_ttl_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Default circuit-breaker knobs, used for any dependency without a preset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    pub failure_threshold: f64,
    pub min_calls: u32,
    pub success_threshold: u32,
    pub open_timeout_secs: u64,
    pub half_open_max_calls: u32,
    pub window_secs: u64,
}

impl ResilienceSettings {
    pub fn breaker_config(&self) -> resilience::CircuitBreakerConfig {
        resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            min_calls: self.min_calls,
            success_threshold: self.success_threshold,
            open_timeout: Duration::from_secs(self.open_timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
            window: Duration::from_secs(self.window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// Dependencies whose failure makes the whole gateway unhealthy
    pub critical: Vec<String>,
}

impl HealthSettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Development-only bypass, requests get a synthetic identity
    pub bypass: bool,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables, with `.env` support
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_parsed("SERVER_PORT", 8080),
                workers: env_parsed("SERVER_WORKERS", num_cpus::get()),
            },
            services: ServiceEndpoints {
                auth_service: env_or("AUTH_SERVICE_URL", "http://auth-service:9080"),
                ingestion_service: env_or("INGESTION_SERVICE_URL", "http://ingestion-service:9081"),
                graph_search_service: env_or(
                    "GRAPH_SEARCH_SERVICE_URL",
                    "http://graph-search-service:9082",
                ),
                embedding_service: env_or("EMBEDDING_SERVICE_URL", "http://embedding-service:9083"),
                tool_server: env_or("TOOL_SERVER_URL", "http://tool-server:9084"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok(),
            },
            rate_limit: RateLimitSettings {
                default_limit: env_parsed("RATE_LIMIT_DEFAULT", 120),
                search_limit: env_parsed("RATE_LIMIT_SEARCH", 60),
                sources_limit: env_parsed("RATE_LIMIT_SOURCES", 30),
                sync_limit: env_parsed("RATE_LIMIT_SYNC", 10),
                window_secs: env_parsed("RATE_LIMIT_WINDOW_SECS", 60),
                service_limit: env_parsed("RATE_LIMIT_SERVICE", 1000),
                service_window_secs: env_parsed("RATE_LIMIT_SERVICE_WINDOW_SECS", 60),
                skip: env_parsed("RATE_LIMIT_SKIP", false),
            },
            cache: CacheSettings {
                search_ttl_secs: env_parsed("CACHE_SEARCH_TTL_SECS", 30),
                entity_ttl_secs: env_parsed("CACHE_ENTITY_TTL_SECS", 60),
                auth_ttl_secs: env_parsed("CACHE_AUTH_TTL_SECS", 300),
                capabilities_ttl_secs: env_parsed("CACHE_CAPABILITIES_TTL_SECS", 300),
                default_ttl_secs: env_parsed("CACHE_DEFAULT_TTL_SECS", 60),
            },
            resilience: ResilienceSettings {
                failure_threshold: env_parsed("BREAKER_FAILURE_THRESHOLD", 0.5),
                min_calls: env_parsed("BREAKER_MIN_CALLS", 10),
                success_threshold: env_parsed("BREAKER_SUCCESS_THRESHOLD", 3),
                open_timeout_secs: env_parsed("BREAKER_OPEN_TIMEOUT_SECS", 30),
                half_open_max_calls: env_parsed("BREAKER_HALF_OPEN_MAX_CALLS", 3),
                window_secs: env_parsed("BREAKER_WINDOW_SECS", 60),
            },
            health: HealthSettings {
                probe_interval_secs: env_parsed("HEALTH_PROBE_INTERVAL_SECS", 15),
                probe_timeout_secs: env_parsed("HEALTH_PROBE_TIMEOUT_SECS", 5),
                critical: env_or("HEALTH_CRITICAL_DEPENDENCIES", "auth,graph-search")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            auth: AuthSettings {
                bypass: env_parsed("AUTH_BYPASS_ENABLED", false),
            },
        }
    }
}
