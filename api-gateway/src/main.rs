//! Atlas API Gateway - entry point
//!
//! Startup order: logging → configuration → shared stores (Redis when
//! configured, in-memory otherwise) → registry seeding → service client →
//! background loops (health prober, heartbeats, expiry sweep, invalidation
//! subscriber) → HTTP server.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use api_gateway::clients::{HttpTransport, ServiceClient, ServiceClientOptions};
use api_gateway::config::Config;
use api_gateway::downstream::Downstream;
use api_gateway::health::{self, HealthAggregator};
use api_gateway::middleware::{
    AuthMiddleware, RateLimitMiddleware, RequestIdMiddleware, SecurityHeadersMiddleware,
};
use api_gateway::rest_api;
use atlas_cache::{AtlasCache, InvalidationPublisher, InvalidationSubscriber};
use rate_limit::{CounterStore, SlidingWindowLimiter};
use redis::aio::ConnectionManager;
use service_registry::{ServiceRegistration, ServiceRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

/// Static registrations never expire as long as their heartbeat loop runs
const STATIC_INSTANCE_TTL: Duration = Duration::from_secs(90);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const REGISTRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

async fn connect_redis(url: &str) -> Option<ConnectionManager> {
    match redis::Client::open(url) {
        Ok(client) => match ConnectionManager::new(client).await {
            Ok(conn) => {
                info!("connected to redis");
                Some(conn)
            }
            Err(e) => {
                warn!(error = %e, "redis unavailable, running degraded (in-memory stores)");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "invalid redis url, running degraded (in-memory stores)");
            None
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api_gateway=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true),
        )
        .init();

    info!("starting atlas api gateway");

    let config = Config::from_env();
    let instance_id = format!("api-gateway-{}", uuid::Uuid::new_v4());
    info!(instance_id = %instance_id, port = config.server.port, "configuration loaded");

    // Shared stores: Redis when configured, in-memory degraded mode otherwise
    let redis_conn = match &config.redis.url {
        Some(url) => connect_redis(url).await,
        None => {
            info!("no REDIS_URL configured, using in-memory stores");
            None
        }
    };

    let counter_store: Arc<dyn CounterStore> = match &redis_conn {
        Some(conn) => Arc::new(rate_limit::RedisStore::new(conn.clone())),
        None => Arc::new(rate_limit::MemoryStore::new()),
    };
    let limiter = SlidingWindowLimiter::new(counter_store);

    let cache_local = atlas_cache::MemoryStore::new();
    let _cache_sweeper = cache_local.start_sweeper(CACHE_SWEEP_INTERVAL);
    let cache_shared = redis_conn.clone().map(atlas_cache::RedisStore::new);
    let publisher = redis_conn
        .clone()
        .map(|conn| InvalidationPublisher::new(conn, instance_id.clone()));
    let cache = AtlasCache::new(cache_local, cache_shared, publisher);

    // Seed the registry with the configured downstream endpoints and keep
    // them alive with heartbeats; TTL expiry handles everything else
    let registry = ServiceRegistry::new();
    for (name, base_url) in config.services.entries() {
        let registration = ServiceRegistration::from_base_url(name, base_url, STATIC_INSTANCE_TTL);
        registry.register(registration.clone());
        let _ = registry.start_heartbeat(registration, HEARTBEAT_INTERVAL);
    }
    let _registry_sweeper = registry.start_expiry_sweep(REGISTRY_SWEEP_INTERVAL);
    info!("service registry seeded with configured endpoints");

    let transport = Arc::new(HttpTransport::new()?);
    let client = Arc::new(ServiceClient::new(
        registry.clone(),
        limiter.clone(),
        cache.clone(),
        transport,
        ServiceClientOptions {
            service_limit: config.rate_limit.service_limit,
            service_window: config.rate_limit.service_window(),
            skip_rate_limit: config.rate_limit.skip,
            default_breaker: config.resilience.breaker_config(),
            ..ServiceClientOptions::default()
        },
    ));
    let downstream = Downstream::new(client.clone(), config.cache.clone());

    // Apply invalidations broadcast by other gateway instances
    if let Some(url) = &config.redis.url {
        if redis_conn.is_some() {
            let subscriber = InvalidationSubscriber::new(url)?;
            let cache_for_sub = cache.clone();
            let _invalidation_task = subscriber
                .subscribe(move |message| {
                    let cache = cache_for_sub.clone();
                    async move {
                        cache.apply_invalidation(&message).await;
                        Ok(())
                    }
                })
                .await?;
        }
    }

    // Health aggregation: one synchronous refresh so readiness is accurate
    // from the first request, then the background probe loop
    let aggregator = HealthAggregator::new(
        registry.clone(),
        client.breakers().clone(),
        config.health.clone(),
    )?;
    aggregator.refresh().await;
    let _prober = aggregator.start();

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr = %bind_addr, "gateway listening");

    let rate_limit_settings = config.rate_limit.clone();
    let auth_bypass = config.auth.bypass;
    let workers = config.server.workers;

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(SecurityHeadersMiddleware::new())
            .wrap(RequestIdMiddleware::new())
            .app_data(web::Data::new(downstream.clone()))
            .app_data(web::Data::new(aggregator.clone()))
            .route("/health", web::get().to(health::health))
            .route("/health/ready", web::get().to(health::health_ready))
            .route("/health/live", web::get().to(health::health_live))
            .route("/metrics", web::get().to(health::metrics))
            .service(
                web::scope("/v1")
                    .wrap(RateLimitMiddleware::new(
                        limiter.clone(),
                        rate_limit_settings.clone(),
                    ))
                    .wrap(AuthMiddleware::new(downstream.clone(), auth_bypass))
                    .configure(rest_api::configure),
            )
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
