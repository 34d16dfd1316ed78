//! Table REST API Routes
//!
//! Table definitions are dispatched as-is. Writes that name the table's
//! `slug` purge its cached object reads.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::entity::{self, EntityOps, EntityPayload};
use crate::{context::Ctx, dispatch::Operation, error::{ApiResult, Envelope}, pipeline::Pipeline, state::AppState};

const OPS: EntityOps = EntityOps {
    create: Operation::CreateTable,
    update: Operation::UpdateTable,
    delete: Operation::DeleteTable,
};

/// Query parameters of table deletion.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct DeleteTableParams {
    /// Slug of the table, used to purge its cached reads.
    pub slug: Option<String>,
}

/// POST /v1/table - Create a table
#[utoipa::path(
    post,
    path = "/v1/table",
    tag = "Tables",
    request_body = EntityPayload,
    responses(
        (status = 201, description = "Table created", body = Envelope),
        (status = 400, description = "Invalid request", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn create_table(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<Envelope> {
    entity::create(&pipeline, &ctx, OPS.create, payload).await
}

/// PUT /v1/table - Update a table
#[utoipa::path(
    put,
    path = "/v1/table",
    tag = "Tables",
    request_body = EntityPayload,
    responses(
        (status = 200, description = "Table updated", body = Envelope),
        (status = 400, description = "Missing id", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn update_table(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<Envelope> {
    entity::update(&pipeline, &ctx, OPS.update, payload).await
}

/// DELETE /v1/table/{id} - Delete a table
#[utoipa::path(
    delete,
    path = "/v1/table/{id}",
    tag = "Tables",
    params(
        ("id" = String, Path, description = "Table id"),
        DeleteTableParams,
    ),
    responses(
        (status = 200, description = "Table deleted", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn delete_table(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path(id): Path<String>,
    Query(params): Query<DeleteTableParams>,
) -> ApiResult<Envelope> {
    let mut data = Map::new();
    if let Some(slug) = params.slug {
        data.insert("slug".to_string(), Value::String(slug));
    }
    entity::delete(&pipeline, &ctx, OPS.delete, id, data).await
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/table", post(create_table).put(update_table))
        .route("/table/:id", delete(delete_table))
}
