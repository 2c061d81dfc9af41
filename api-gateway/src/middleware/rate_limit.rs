//! Per-user rate limiting with route-class budgets
//!
//! Authenticated requests are keyed by user id, anonymous ones by client IP.
//! Each route class (search, sources, sync, default) carries its own limit
//! over a shared sliding window, so one hot endpoint cannot starve the rest.
//! Successful responses carry the standard `X-RateLimit-*` headers; denials
//! map to 429 with reset guidance. A dead counter store fails open.

use crate::config::RateLimitSettings;
use crate::error::GatewayError;
use crate::middleware::auth::AuthenticatedUser;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use rate_limit::{keys, CounterStore, Decision, SlidingWindowLimiter};
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::warn;

/// Route class used to select the limit for a path
pub fn route_class(path: &str) -> &'static str {
    if path.contains("/search") {
        "search"
    } else if path.contains("/sources") {
        "sources"
    } else if path.contains("/sync") {
        "sync"
    } else {
        "default"
    }
}

fn client_key(req: &ServiceRequest, class: &str) -> String {
    if let Some(user) = req.extensions().get::<AuthenticatedUser>() {
        return keys::user(&user.0.user_id, class);
    }

    let ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();
    keys::ip(&ip, class)
}

#[derive(Clone)]
pub struct RateLimitMiddleware {
    limiter: SlidingWindowLimiter<Arc<dyn CounterStore>>,
    settings: RateLimitSettings,
}

impl RateLimitMiddleware {
    pub fn new(
        limiter: SlidingWindowLimiter<Arc<dyn CounterStore>>,
        settings: RateLimitSettings,
    ) -> Self {
        Self { limiter, settings }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            settings: self.settings.clone(),
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    limiter: SlidingWindowLimiter<Arc<dyn CounterStore>>,
    settings: RateLimitSettings,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let settings = self.settings.clone();

        Box::pin(async move {
            if settings.skip {
                return service.call(req).await;
            }

            let class = route_class(req.path());
            let key = client_key(&req, class);
            let limit = settings.limit_for_class(class);

            let decision = match limiter.check(&key, limit, settings.window()).await {
                Ok(decision) => {
                    if !decision.allowed {
                        warn!(key = %key, class, limit, "rate limit exceeded");
                        return Err(GatewayError::RateLimited {
                            limit: decision.limit,
                            reset_at: decision.reset_at,
                        }
                        .into());
                    }
                    Some(decision)
                }
                Err(e) => {
                    // Never let the limiter store become a point of failure
                    warn!(key = %key, error = %e, "rate limit check failed, allowing request");
                    None
                }
            };

            let mut res = service.call(req).await?;

            if let Some(decision) = decision {
                set_rate_limit_headers(res.headers_mut(), &decision);
            }

            Ok(res)
        })
    }
}

fn set_rate_limit_headers(headers: &mut actix_web::http::header::HeaderMap, decision: &Decision) {
    let pairs = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_at.timestamp().to_string()),
    ];

    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}
