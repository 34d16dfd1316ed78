//! Menu REST API Routes

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
    create: Operation::CreateMenu,
    update: Operation::UpdateMenu,
    delete: Operation::DeleteMenu,
};

/// POST /v1/menu - Create a menu
#[utoipa::path(
    post,
    path = "/v1/menu",
    tag = "Menus",
    request_body = EntityPayload,
    responses(
        (status = 201, description = "Menu created", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn create_menu(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<Envelope> {
    entity::create(&pipeline, &ctx, OPS.create, payload).await
}

/// PUT /v1/menu - Update a menu
#[utoipa::path(
    put,
    path = "/v1/menu",
    tag = "Menus",
    request_body = EntityPayload,
    responses(
        (status = 200, description = "Menu updated", body = Envelope),
        (status = 400, description = "Missing id", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn update_menu(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<Envelope> {
    entity::update(&pipeline, &ctx, OPS.update, payload).await
}

/// DELETE /v1/menu/{id} - Delete a menu
#[utoipa::path(
    delete,
    path = "/v1/menu/{id}",
    tag = "Menus",
    params(("id" = String, Path, description = "Menu id")),
    responses(
        (status = 200, description = "Menu deleted", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn delete_menu(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path(id): Path<String>,
) -> ApiResult<Envelope> {
    entity::delete(&pipeline, &ctx, OPS.delete, id, Map::new()).await
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/menu", post(create_menu).put(update_menu))
        .route("/menu/:id", delete(delete_menu))
}
