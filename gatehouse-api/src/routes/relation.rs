//! Relation REST API Routes
//!
//! Relations exist on engine A only. Tenants on engine B get
//! `501 NOT_IMPLEMENTED` without a backend call.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Json, Router,
};
use serde_json::Map;

use super::entity::{self, EntityPayload};
use crate::{context::Ctx, dispatch::Operation, error::{ApiResult, Envelope}, pipeline::Pipeline, state::AppState};

/// POST /v1/relation - Relate two tables
#[utoipa::path(
    post,
    path = "/v1/relation",
    tag = "Relations",
    request_body = EntityPayload,
    responses(
        (status = 201, description = "Relation created", body = Envelope),
        (status = 501, description = "Tenant engine has no relations", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn create_relation(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<Envelope> {
    entity::create(&pipeline, &ctx, Operation::CreateRelation, payload).await
}

/// DELETE /v1/relation/{id} - Delete a relation
#[utoipa::path(
    delete,
    path = "/v1/relation/{id}",
    tag = "Relations",
    params(("id" = String, Path, description = "Relation id")),
    responses(
        (status = 200, description = "Relation deleted", body = Envelope),
        (status = 501, description = "Tenant engine has no relations", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn delete_relation(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path(id): Path<String>,
) -> ApiResult<Envelope> {
    entity::delete(&pipeline, &ctx, Operation::DeleteRelation, id, Map::new()).await
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/relation", post(create_relation))
        .route("/relation/:id", delete(delete_relation))
}
