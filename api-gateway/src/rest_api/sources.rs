//! Source management endpoints
//!
//! GET    /v1/sources        - list the caller's sources
//! POST   /v1/sources        - register a new source
//! GET    /v1/sources/{id}   - source detail
//! PUT    /v1/sources/{id}   - update a source
//! DELETE /v1/sources/{id}   - remove a source

use crate::downstream::Downstream;
use crate::error::Result;
use crate::rest_api::models::{CreateSourceRequest, UpdateSourceRequest};
use crate::rest_api::{current_user, request_id};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn list_sources(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    let rid = request_id(&req);

    let sources = downstream.list_sources(&user.0.user_id, &rid).await?;
    Ok(HttpResponse::Ok().json(sources))
}

pub async fn create_source(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    body: web::Json<CreateSourceRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let user = current_user(&req)?;
    let rid = request_id(&req);

    info!(
        user_id = %user.0.user_id,
        request_id = %rid,
        source_type = %body.source_type,
        "creating source"
    );

    let payload = json!({
        "name": body.name,
        "source_type": body.source_type,
        "config": body.config,
        "owner": user.0.user_id,
    });

    let created = downstream
        .create_source(&user.0.user_id, payload, &rid)
        .await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn get_source(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    current_user(&req)?;
    let rid = request_id(&req);

    let source = downstream.get_source(&path.into_inner(), &rid).await?;
    Ok(HttpResponse::Ok().json(source))
}

pub async fn update_source(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    path: web::Path<String>,
    body: web::Json<UpdateSourceRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    current_user(&req)?;
    let rid = request_id(&req);

    let payload = json!({
        "name": body.name,
        "config": body.config,
    });

    let updated = downstream
        .update_source(&path.into_inner(), payload, &rid)
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

pub async fn delete_source(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    let rid = request_id(&req);
    let source_id = path.into_inner();

    info!(
        user_id = %user.0.user_id,
        request_id = %rid,
        source_id = %source_id,
        "deleting source"
    );

    downstream.delete_source(&source_id, &rid).await?;
    Ok(HttpResponse::NoContent().finish())
}
