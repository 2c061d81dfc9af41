//! Knowledge-graph entity endpoints
//!
//! GET /v1/entities/{id}           - entity detail
//! GET /v1/entities/{id}/neighbors - adjacent entities

use crate::downstream::Downstream;
use crate::error::Result;
use crate::rest_api::{current_user, request_id};
use actix_web::{web, HttpRequest, HttpResponse};

pub async fn get_entity(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    current_user(&req)?;
    let rid = request_id(&req);

    let entity = downstream.get_entity(&path.into_inner(), &rid).await?;
    Ok(HttpResponse::Ok().json(entity))
}

pub async fn get_neighbors(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    current_user(&req)?;
    let rid = request_id(&req);

    let neighbors = downstream
        .get_entity_neighbors(&path.into_inner(), &rid)
        .await?;
    Ok(HttpResponse::Ok().json(neighbors))
}
