//! Search endpoints
//!
//! POST /v1/search - hybrid keyword + graph search
//! POST /v1/search/vector - embedding-backed vector search

use crate::downstream::Downstream;
use crate::error::Result;
use crate::rest_api::models::SearchRequest;
use crate::rest_api::{current_user, request_id};
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

pub async fn hybrid_search(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    body: web::Json<SearchRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let user = current_user(&req)?;
    let rid = request_id(&req);

    info!(
        user_id = %user.0.user_id,
        request_id = %rid,
        limit = body.limit,
        "hybrid search"
    );

    let results = downstream
        .hybrid_search(&body.query, body.limit, &rid)
        .await?;
    Ok(HttpResponse::Ok().json(results))
}

pub async fn vector_search(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    body: web::Json<SearchRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let user = current_user(&req)?;
    let rid = request_id(&req);

    info!(
        user_id = %user.0.user_id,
        request_id = %rid,
        limit = body.limit,
        "vector search"
    );

    let results = downstream
        .vector_search(&body.query, body.limit, &rid)
        .await?;
    Ok(HttpResponse::Ok().json(results))
}
