//! Ingestion sync endpoints
//!
//! POST /v1/sync/{source_id}     - trigger a sync job (never retried)
//! GET  /v1/sync/{job_id}/status - job progress

use crate::downstream::Downstream;
use crate::error::Result;
use crate::rest_api::{current_user, request_id};
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

pub async fn trigger_sync(
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
        "sync triggered"
    );

    let job = downstream.trigger_sync(&source_id, &rid).await?;
    Ok(HttpResponse::Accepted().json(job))
}

pub async fn sync_status(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    current_user(&req)?;
    let rid = request_id(&req);

    let status = downstream.sync_status(&path.into_inner(), &rid).await?;
    Ok(HttpResponse::Ok().json(status))
}
