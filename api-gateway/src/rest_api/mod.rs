//! Versioned REST surface
//!
//! All `/v1` routes sit behind request-id, auth and rate-limit middleware and
//! reach downstream services exclusively through the service client facades.

pub mod entities;
pub mod models;
pub mod search;
pub mod sources;
pub mod sync;
pub mod tools;

use crate::error::{GatewayError, Result};
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::request_id::CorrelationId;
use actix_web::{web, HttpMessage, HttpRequest};

/// Correlation id for the current request (set by the request-id middleware)
pub(crate) fn request_id(req: &HttpRequest) -> String {
    req.extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

/// Identity established by the auth middleware
pub(crate) fn current_user(req: &HttpRequest) -> Result<AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| GatewayError::Unauthorized("authentication required".to_string()))
}

/// Wire the `/v1` routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/search", web::post().to(search::hybrid_search))
        .route("/search/vector", web::post().to(search::vector_search))
        .route("/sources", web::get().to(sources::list_sources))
        .route("/sources", web::post().to(sources::create_source))
        .route("/sources/{id}", web::get().to(sources::get_source))
        .route("/sources/{id}", web::put().to(sources::update_source))
        .route("/sources/{id}", web::delete().to(sources::delete_source))
        .route("/entities/{id}", web::get().to(entities::get_entity))
        .route(
            "/entities/{id}/neighbors",
            web::get().to(entities::get_neighbors),
        )
        .route("/sync/{source_id}", web::post().to(sync::trigger_sync))
        .route("/sync/{job_id}/status", web::get().to(sync::sync_status))
        .route("/tools/capabilities", web::get().to(tools::capabilities))
        .route("/tools/{name}/invoke", web::post().to(tools::invoke_tool));
}
