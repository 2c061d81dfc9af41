//! Bearer-token authentication, delegated to the auth service
//!
//! Tokens are verified through the service client, so verification enjoys
//! the same breaker, retry and caching discipline as any downstream call.
//! A configurable bypass exists for local development only.

use crate::downstream::{AuthContext, Downstream};
use crate::error::GatewayError;
use crate::middleware::request_id::CorrelationId;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use tracing::warn;

/// Verified identity available to handlers via request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AuthContext);

#[derive(Clone)]
pub struct AuthMiddleware {
    downstream: Downstream,
    bypass: bool,
}

impl AuthMiddleware {
    pub fn new(downstream: Downstream, bypass: bool) -> Self {
        if bypass {
            warn!("auth bypass enabled - development mode only");
        }
        Self { downstream, bypass }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthService {
            service: Rc::new(service),
            downstream: self.downstream.clone(),
            bypass: self.bypass,
        }))
    }
}

pub struct AuthService<S> {
    service: Rc<S>,
    downstream: Downstream,
    bypass: bool,
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl<S, B> Service<ServiceRequest> for AuthService<S>
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
        let downstream = self.downstream.clone();
        let bypass = self.bypass;

        Box::pin(async move {
            if bypass {
                req.extensions_mut().insert(AuthenticatedUser(AuthContext {
                    user_id: "dev-user".to_string(),
                    email: None,
                    roles: vec!["developer".to_string()],
                }));
                return service.call(req).await;
            }

            let token = bearer_token(&req).ok_or_else(|| {
                Error::from(GatewayError::Unauthorized(
                    "missing bearer token".to_string(),
                ))
            })?;

            let request_id = req
                .extensions()
                .get::<CorrelationId>()
                .map(|id| id.0.clone())
                .unwrap_or_default();

            let context = downstream.verify_token(&token, &request_id).await?;
            req.extensions_mut().insert(AuthenticatedUser(context));

            service.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn bearer_token_extraction() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc123"))
            .to_srv_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc123"));

        let missing = TestRequest::default().to_srv_request();
        assert!(bearer_token(&missing).is_none());

        let malformed = TestRequest::default()
            .insert_header(("Authorization", "Basic abc123"))
            .to_srv_request();
        assert!(bearer_token(&malformed).is_none());

        let empty = TestRequest::default()
            .insert_header(("Authorization", "Bearer "))
            .to_srv_request();
        assert!(bearer_token(&empty).is_none());
    }
}
