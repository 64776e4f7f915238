use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{auth::AuthService, utils::validate_auth_token};
use crate::db::request::PgRequestStore;
use crate::error::Result;
use crate::lifecycle::LifecycleService;

type AdminState = (Arc<AuthService>, Arc<LifecycleService<PgRequestStore>>);

async fn pending_requests(
    headers: HeaderMap,
    State((service, lifecycle)): State<AdminState>,
) -> Result<impl IntoResponse> {
    let admin = validate_auth_token(&headers, &service)?;
    service.require_admin(admin).await?;

    let queue = lifecycle.moderation_queue().await?;
    Ok(Json(queue))
}

async fn approve_request(
    headers: HeaderMap,
    State((service, lifecycle)): State<AdminState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let admin = validate_auth_token(&headers, &service)?;
    service.require_admin(admin).await?;

    let request = lifecycle.approve(id).await?;
    tracing::info!("admin {admin} approved request {id}");
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BulkApproveResponse {
    pub approved: u64,
}

async fn bulk_approve(
    headers: HeaderMap,
    State((service, lifecycle)): State<AdminState>,
    Json(body): Json<BulkApproveRequest>,
) -> Result<impl IntoResponse> {
    let admin = validate_auth_token(&headers, &service)?;
    service.require_admin(admin).await?;

    let approved = lifecycle.bulk_approve(&body.ids).await?;
    tracing::info!(
        "admin {admin} bulk-approved {approved} of {} requests",
        body.ids.len()
    );
    Ok(Json(BulkApproveResponse { approved }))
}

async fn stats(
    headers: HeaderMap,
    State((service, lifecycle)): State<AdminState>,
) -> Result<impl IntoResponse> {
    let admin = validate_auth_token(&headers, &service)?;
    service.require_admin(admin).await?;

    let stats = lifecycle.stats().await?;
    Ok(Json(stats))
}

pub fn admin_routes(
    service: Arc<AuthService>,
    lifecycle: Arc<LifecycleService<PgRequestStore>>,
) -> Router {
    Router::new()
        .route("/admin/pending", get(pending_requests))
        .route("/admin/bulk-approve", post(bulk_approve))
        .route("/admin/stats", get(stats))
        .route("/admin/:id/approve", post(approve_request))
        .with_state((service, lifecycle))
}
