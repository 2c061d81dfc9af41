//! Tool-server endpoints
//!
//! GET  /v1/tools/capabilities  - available tools (cached)
//! POST /v1/tools/{name}/invoke - invoke a tool by name

use crate::downstream::Downstream;
use crate::error::Result;
use crate::rest_api::models::InvokeToolRequest;
use crate::rest_api::{current_user, request_id};
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

pub async fn capabilities(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
) -> Result<HttpResponse> {
    current_user(&req)?;
    let rid = request_id(&req);

    let capabilities = downstream.tool_capabilities(&rid).await?;
    Ok(HttpResponse::Ok().json(capabilities))
}

pub async fn invoke_tool(
    req: HttpRequest,
    downstream: web::Data<Downstream>,
    path: web::Path<String>,
    body: web::Json<InvokeToolRequest>,
) -> Result<HttpResponse> {
    let user = current_user(&req)?;
    let rid = request_id(&req);
    let tool = path.into_inner();

    info!(
        user_id = %user.0.user_id,
        request_id = %rid,
        tool = %tool,
        "tool invocation"
    );

    let result = downstream
        .invoke_tool(&tool, body.into_inner().args, &rid)
        .await?;
    Ok(HttpResponse::Ok().json(result))
}
