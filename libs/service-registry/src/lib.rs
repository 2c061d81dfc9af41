//! Service registry for the Atlas gateway
//!
//! Maps logical service names to live network addresses. Instances register
//! with a TTL and must heartbeat before it lapses or every observer treats
//! them as gone; deregistration on graceful shutdown is best-effort, TTL
//! expiry is the authoritative failure detector. Resolution returns only
//! instances whose last health probe passed, rotating round-robin.
//!
//! # Example
//!
//! ```
//! use service_registry::{ServiceRegistration, ServiceRegistry};
//! use std::time::Duration;
//!
//! let registry = ServiceRegistry::new();
//! registry.register(ServiceRegistration::from_base_url(
//!     "graph-search",
//!     "http://graph-search:9080",
//!     Duration::from_secs(30),
//! ));
//!
//! let instance = registry.resolve("graph-search").unwrap();
//! assert_eq!(instance.base_url(), "http://graph-search:9080");
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no healthy instance available for service '{0}'")]
    NoHealthyInstance(String),
}

/// One registered instance of a logical service
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceRegistration {
    pub name: String,
    pub instance_id: String,
    pub scheme: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub health_check_url: String,
    /// Instance is treated as gone once this long passes without a heartbeat
    pub ttl: Duration,
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "https" {
        443
    } else {
        80
    }
}

impl ServiceRegistration {
    /// Build a registration from a configured base URL such as
    /// `http://graph-search:9080` or `https://graph-search:8443`, tagging it
    /// as statically seeded. The scheme is preserved for calls and probes.
    pub fn from_base_url(name: &str, base_url: &str, ttl: Duration) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("http".to_string(), trimmed),
        };
        let (address, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse().unwrap_or_else(|_| default_port(&scheme)),
            ),
            None => (rest.to_string(), default_port(&scheme)),
        };

        Self {
            name: name.to_string(),
            instance_id: format!("{name}-{}", uuid::Uuid::new_v4()),
            health_check_url: format!("{scheme}://{address}:{port}/health"),
            scheme,
            address,
            port,
            tags: vec!["static".to_string()],
            ttl,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.address, self.port)
    }
}

struct Instance {
    registration: ServiceRegistration,
    last_heartbeat: Instant,
    healthy: bool,
}

impl Instance {
    fn expired(&self) -> bool {
        self.last_heartbeat.elapsed() >= self.registration.ttl
    }
}

struct ServiceEntry {
    instances: Vec<Instance>,
    cursor: usize,
}

/// Point-in-time view of one instance, for health reporting
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub registration: ServiceRegistration,
    pub healthy: bool,
    pub expired: bool,
}

/// Registry of service instances keyed by logical name
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<DashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh an instance. Repeated registration with the same
    /// `instance_id` updates the existing entry rather than duplicating it.
    pub fn register(&self, registration: ServiceRegistration) {
        let mut entry = self
            .services
            .entry(registration.name.clone())
            .or_insert_with(|| ServiceEntry {
                instances: Vec::new(),
                cursor: 0,
            });

        let instance = Instance {
            last_heartbeat: Instant::now(),
            healthy: true,
            registration,
        };

        if let Some(existing) = entry
            .instances
            .iter_mut()
            .find(|i| i.registration.instance_id == instance.registration.instance_id)
        {
            debug!(
                service = %instance.registration.name,
                instance = %instance.registration.instance_id,
                "registration refreshed"
            );
            *existing = instance;
        } else {
            info!(
                service = %instance.registration.name,
                instance = %instance.registration.instance_id,
                address = %instance.registration.base_url(),
                "instance registered"
            );
            entry.instances.push(instance);
        }
    }

    /// Best-effort removal on graceful shutdown
    pub fn deregister(&self, instance_id: &str) {
        for mut entry in self.services.iter_mut() {
            let before = entry.instances.len();
            entry
                .instances
                .retain(|i| i.registration.instance_id != instance_id);
            if entry.instances.len() < before {
                info!(instance = %instance_id, "instance deregistered");
            }
        }
    }

    /// Refresh an instance's liveness. Returns false when the instance has
    /// already been dropped (the caller should re-register).
    pub fn heartbeat(&self, instance_id: &str) -> bool {
        for mut entry in self.services.iter_mut() {
            if let Some(instance) = entry
                .instances
                .iter_mut()
                .find(|i| i.registration.instance_id == instance_id)
            {
                instance.last_heartbeat = Instant::now();
                return true;
            }
        }
        false
    }

    /// Record a probe verdict for an instance
    pub fn mark_health(&self, instance_id: &str, healthy: bool) {
        for mut entry in self.services.iter_mut() {
            if let Some(instance) = entry
                .instances
                .iter_mut()
                .find(|i| i.registration.instance_id == instance_id)
            {
                if instance.healthy != healthy {
                    warn!(
                        instance = %instance_id,
                        healthy,
                        "instance health changed"
                    );
                }
                instance.healthy = healthy;
                return;
            }
        }
    }

    /// Resolve a healthy instance for a service, rotating round-robin.
    /// Instances past their heartbeat TTL are never returned.
    pub fn resolve(&self, service: &str) -> Result<ServiceRegistration, RegistryError> {
        let mut entry = self
            .services
            .get_mut(service)
            .ok_or_else(|| RegistryError::NoHealthyInstance(service.to_string()))?;

        let eligible: Vec<usize> = entry
            .instances
            .iter()
            .enumerate()
            .filter(|(_, i)| i.healthy && !i.expired())
            .map(|(idx, _)| idx)
            .collect();

        if eligible.is_empty() {
            return Err(RegistryError::NoHealthyInstance(service.to_string()));
        }

        let pick = eligible[entry.cursor % eligible.len()];
        entry.cursor = entry.cursor.wrapping_add(1);
        Ok(entry.instances[pick].registration.clone())
    }

    /// Snapshot every instance of a service (including unhealthy/expired)
    pub fn instances(&self, service: &str) -> Vec<InstanceSnapshot> {
        self.services
            .get(service)
            .map(|entry| {
                entry
                    .instances
                    .iter()
                    .map(|i| InstanceSnapshot {
                        registration: i.registration.clone(),
                        healthy: i.healthy,
                        expired: i.expired(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All known service names
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    /// Physically drop instances whose TTL lapsed without a heartbeat
    pub fn sweep_expired(&self) -> usize {
        let mut removed = 0;
        for mut entry in self.services.iter_mut() {
            let before = entry.instances.len();
            entry.instances.retain(|i| !i.expired());
            removed += before - entry.instances.len();
        }
        if removed > 0 {
            warn!(removed, "expired instances swept from registry");
        }
        removed
    }

    /// Spawn the periodic expiry sweep
    pub fn start_expiry_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.sweep_expired();
            }
        })
    }

    /// Spawn a self-heartbeat loop for an instance owned by this process.
    /// Re-registers if the instance was swept in the meantime.
    pub fn start_heartbeat(
        &self,
        registration: ServiceRegistration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !registry.heartbeat(&registration.instance_id) {
                    registry.register(registration.clone());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(name: &str, instance_id: &str, ttl: Duration) -> ServiceRegistration {
        ServiceRegistration {
            name: name.to_string(),
            instance_id: instance_id.to_string(),
            scheme: "http".to_string(),
            address: "localhost".to_string(),
            port: 9080,
            tags: Vec::new(),
            health_check_url: "http://localhost:9080/health".to_string(),
            ttl,
        }
    }

    #[test]
    fn resolve_returns_registered_instance() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth", "auth-1", Duration::from_secs(30)));

        let resolved = registry.resolve("auth").unwrap();
        assert_eq!(resolved.instance_id, "auth-1");
    }

    #[test]
    fn unknown_service_has_no_healthy_instance() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.resolve("nope"),
            Err(RegistryError::NoHealthyInstance(_))
        ));
    }

    #[test]
    fn reregistration_updates_instead_of_duplicating() {
        let registry = ServiceRegistry::new();
        let mut reg = registration("auth", "auth-1", Duration::from_secs(30));
        registry.register(reg.clone());

        reg.port = 9999;
        registry.register(reg);

        let instances = registry.instances("auth");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].registration.port, 9999);
    }

    #[test]
    fn resolution_rotates_round_robin() {
        let registry = ServiceRegistry::new();
        registry.register(registration("graph", "graph-1", Duration::from_secs(30)));
        registry.register(registration("graph", "graph-2", Duration::from_secs(30)));

        let first = registry.resolve("graph").unwrap().instance_id;
        let second = registry.resolve("graph").unwrap().instance_id;
        let third = registry.resolve("graph").unwrap().instance_id;

        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn unhealthy_instances_are_skipped() {
        let registry = ServiceRegistry::new();
        registry.register(registration("graph", "graph-1", Duration::from_secs(30)));
        registry.register(registration("graph", "graph-2", Duration::from_secs(30)));

        registry.mark_health("graph-1", false);

        for _ in 0..4 {
            assert_eq!(registry.resolve("graph").unwrap().instance_id, "graph-2");
        }
    }

    #[tokio::test]
    async fn expired_instance_is_never_resolved() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth", "auth-1", Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            registry.resolve("auth"),
            Err(RegistryError::NoHealthyInstance(_))
        ));
    }

    #[tokio::test]
    async fn heartbeat_keeps_instance_alive() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth", "auth-1", Duration::from_millis(80)));

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(registry.heartbeat("auth-1"));
        }

        assert!(registry.resolve("auth").is_ok());
    }

    #[tokio::test]
    async fn sweep_drops_expired_instances() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth", "auth-1", Duration::from_millis(20)));
        registry.register(registration("auth", "auth-2", Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.sweep_expired(), 1);
        assert_eq!(registry.instances("auth").len(), 1);
    }

    #[test]
    fn deregister_removes_instance() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth", "auth-1", Duration::from_secs(30)));

        registry.deregister("auth-1");

        assert!(registry.resolve("auth").is_err());
    }

    #[test]
    fn base_url_parsing_round_trips() {
        let reg = ServiceRegistration::from_base_url(
            "graph-search",
            "http://graph-search:9080/",
            Duration::from_secs(30),
        );

        assert_eq!(reg.scheme, "http");
        assert_eq!(reg.address, "graph-search");
        assert_eq!(reg.port, 9080);
        assert_eq!(reg.base_url(), "http://graph-search:9080");
        assert_eq!(reg.health_check_url, "http://graph-search:9080/health");
        assert!(reg.tags.contains(&"static".to_string()));
    }

    #[test]
    fn https_scheme_is_preserved() {
        let reg = ServiceRegistration::from_base_url(
            "graph-search",
            "https://graph-search.internal:8443",
            Duration::from_secs(30),
        );

        assert_eq!(reg.scheme, "https");
        assert_eq!(reg.address, "graph-search.internal");
        assert_eq!(reg.port, 8443);
        assert_eq!(reg.base_url(), "https://graph-search.internal:8443");
        assert_eq!(
            reg.health_check_url,
            "https://graph-search.internal:8443/health"
        );
    }

    #[test]
    fn ports_default_per_scheme_when_missing() {
        let plain = ServiceRegistration::from_base_url(
            "auth",
            "http://auth-service",
            Duration::from_secs(30),
        );
        assert_eq!(plain.port, 80);

        let tls = ServiceRegistration::from_base_url(
            "auth",
            "https://auth-service",
            Duration::from_secs(30),
        );
        assert_eq!(tls.port, 443);
        assert_eq!(tls.base_url(), "https://auth-service:443");
    }
}
