//! Field REST API Routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Json, Router,
};
use serde_json::Map;

use super::entity::{self, EntityOps, EntityPayload};
use crate::{context::Ctx, dispatch::Operation, error::{ApiResult, Envelope}, pipeline::Pipeline, state::AppState};

const OPS: EntityOps = EntityOps {
    create: Operation::CreateField,
    update: Operation::UpdateField,
    delete: Operation::DeleteField,
};

/// POST /v1/field - Add a field to a table
#[utoipa::path(
    post,
    path = "/v1/field",
    tag = "Fields",
    request_body = EntityPayload,
    responses(
        (status = 201, description = "Field created", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn create_field(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<Envelope> {
    entity::create(&pipeline, &ctx, OPS.create, payload).await
}

/// PUT /v1/field - Update a field
#[utoipa::path(
    put,
    path = "/v1/field",
    tag = "Fields",
    request_body = EntityPayload,
    responses(
        (status = 200, description = "Field updated", body = Envelope),
        (status = 400, description = "Missing id", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn update_field(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<Envelope> {
    entity::update(&pipeline, &ctx, OPS.update, payload).await
}

/// DELETE /v1/field/{id} - Delete a field
#[utoipa::path(
    delete,
    path = "/v1/field/{id}",
    tag = "Fields",
    params(("id" = String, Path, description = "Field id")),
    responses(
        (status = 200, description = "Field deleted", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn delete_field(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path(id): Path<String>,
) -> ApiResult<Envelope> {
    entity::delete(&pipeline, &ctx, OPS.delete, id, Map::new()).await
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/field", post(create_field).put(update_field))
        .route("/field/:id", delete(delete_field))
}
