//! Object REST API Routes
//!
//! Reads are served through the response cache; writes run the table's
//! registered hooks around the backend call and purge the table's cached
//! reads. Handlers never see the engine class.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use gatehouse_core::HookMethod;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    context::Ctx,
    dispatch::{ObjectResponse, Operation},
    error::{ApiError, ApiResult, Envelope},
    pipeline::{Pipeline, OBJECT_ID_FIELD},
    response_cache::CachedResponse,
    state::AppState,
};

// ============================================================================
// TYPES
// ============================================================================

/// Body of object writes and list queries.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ObjectPayload {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: Map<String, Value>,
}

/// Query parameters accepted by cached reads.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct ReadParams {
    /// Skip the response cache entirely: no lookup, no store.
    #[serde(default)]
    pub block_cached: bool,
}

// ============================================================================
// READS
// ============================================================================

/// GET /v1/object-slim/{table}/{id} - Slim single-object read
#[utoipa::path(
    get,
    path = "/v1/object-slim/{table}/{id}",
    tag = "Objects",
    params(
        ("table" = String, Path, description = "Table slug"),
        ("id" = String, Path, description = "Object id"),
        ReadParams,
    ),
    responses(
        (status = 200, description = "Object", body = Envelope),
        (status = 401, description = "Unauthorized", body = Envelope),
        (status = 404, description = "Resource not found", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn get_single_slim(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path((table, id)): Path<(String, String)>,
    Query(params): Query<ReadParams>,
) -> ApiResult<Envelope> {
    let req = Pipeline::object_request(&ctx, &table, with_id(Map::new(), id))?;
    let cached = pipeline
        .read_object(&ctx, Operation::GetSingleSlim, &req, params.block_cached)
        .await?;
    Ok(Envelope::ok(cached_body(&cached)?))
}

/// GET /v1/object/{table}/{id} - Single-object read
#[utoipa::path(
    get,
    path = "/v1/object/{table}/{id}",
    tag = "Objects",
    params(
        ("table" = String, Path, description = "Table slug"),
        ("id" = String, Path, description = "Object id"),
        ReadParams,
    ),
    responses(
        (status = 200, description = "Object", body = Envelope),
        (status = 401, description = "Unauthorized", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn get_single_object(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path((table, id)): Path<(String, String)>,
    Query(params): Query<ReadParams>,
) -> ApiResult<Envelope> {
    let req = Pipeline::object_request(&ctx, &table, with_id(Map::new(), id))?;
    let cached = pipeline
        .read_object(&ctx, Operation::GetSingleObject, &req, params.block_cached)
        .await?;
    Ok(Envelope::ok(cached_body(&cached)?))
}

/// POST /v1/object/get-list/{table} - List objects matching the body's query
#[utoipa::path(
    post,
    path = "/v1/object/get-list/{table}",
    tag = "Objects",
    params(
        ("table" = String, Path, description = "Table slug"),
        ReadParams,
    ),
    request_body = ObjectPayload,
    responses(
        (status = 200, description = "Matching objects", body = Envelope),
        (status = 400, description = "Invalid request", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn get_list_objects(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path(table): Path<String>,
    Query(params): Query<ReadParams>,
    Json(payload): Json<ObjectPayload>,
) -> ApiResult<Envelope> {
    let req = Pipeline::object_request(&ctx, &table, payload.data)?;
    let cached = pipeline
        .read_object(&ctx, Operation::GetListObjects, &req, params.block_cached)
        .await?;
    Ok(Envelope::ok(cached_body(&cached)?))
}

// ============================================================================
// WRITES
// ============================================================================

/// POST /v1/object/{table} - Create an object
#[utoipa::path(
    post,
    path = "/v1/object/{table}",
    tag = "Objects",
    params(("table" = String, Path, description = "Table slug")),
    request_body = ObjectPayload,
    responses(
        (status = 201, description = "Object created", body = Envelope),
        (status = 400, description = "Invalid request or hook failure", body = Envelope),
        (status = 401, description = "Unauthorized", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn create_object(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path(table): Path<String>,
    Json(payload): Json<ObjectPayload>,
) -> ApiResult<Envelope> {
    let req = Pipeline::object_request(&ctx, &table, payload.data)?;
    let resp = pipeline
        .mutate_object(&ctx, Operation::CreateObject, HookMethod::Create, &req)
        .await?;
    Ok(Envelope::created(response_data(resp)?))
}

/// PUT /v1/object/{table} - Update an object identified by `data.guid`
#[utoipa::path(
    put,
    path = "/v1/object/{table}",
    tag = "Objects",
    params(("table" = String, Path, description = "Table slug")),
    request_body = ObjectPayload,
    responses(
        (status = 200, description = "Object updated", body = Envelope),
        (status = 400, description = "Invalid request or hook failure", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn update_object(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path(table): Path<String>,
    Json(payload): Json<ObjectPayload>,
) -> ApiResult<Envelope> {
    let has_id = payload
        .data
        .get(OBJECT_ID_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        return Err(ApiError::missing_field(OBJECT_ID_FIELD));
    }

    let req = Pipeline::object_request(&ctx, &table, payload.data)?;
    let resp = pipeline
        .mutate_object(&ctx, Operation::UpdateObject, HookMethod::Update, &req)
        .await?;
    Ok(Envelope::ok(response_data(resp)?))
}

/// DELETE /v1/object/{table}/{id} - Delete an object
#[utoipa::path(
    delete,
    path = "/v1/object/{table}/{id}",
    tag = "Objects",
    params(
        ("table" = String, Path, description = "Table slug"),
        ("id" = String, Path, description = "Object id"),
    ),
    responses(
        (status = 200, description = "Object deleted", body = Envelope),
        (status = 400, description = "Hook failure", body = Envelope),
    ),
    security(
        ("api_key" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn delete_object(
    State(pipeline): State<Arc<Pipeline>>,
    Ctx(ctx): Ctx,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Envelope> {
    let req = Pipeline::object_request(&ctx, &table, with_id(Map::new(), id))?;
    let resp = pipeline
        .mutate_object(&ctx, Operation::DeleteObject, HookMethod::Delete, &req)
        .await?;
    Ok(Envelope::ok(response_data(resp)?))
}

fn with_id(mut data: Map<String, Value>, id: String) -> Map<String, Value> {
    data.insert(OBJECT_ID_FIELD.to_string(), Value::String(id));
    data
}

/// The stored read, decoded. The body was serialized by the gateway itself.
fn cached_body(cached: &CachedResponse) -> ApiResult<Value> {
    serde_json::from_slice(&cached.body)
        .map_err(|e| ApiError::internal_error(format!("Corrupt cached response: {}", e)))
}

fn response_data(resp: ObjectResponse) -> ApiResult<Value> {
    serde_json::to_value(resp)
        .map_err(|e| ApiError::internal_error(format!("Failed to encode object response: {}", e)))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/object-slim/:table/:id", get(get_single_slim))
        .route("/object/get-list/:table", post(get_list_objects))
        .route("/object/:table", post(create_object).put(update_object))
        .route("/object/:table/:id", get(get_single_object).delete(delete_object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_params_default_to_cached() -> Result<(), String> {
        let params: ReadParams = serde_json::from_value(json!({})).map_err(|e| e.to_string())?;
        assert!(!params.block_cached);
        let params: ReadParams =
            serde_json::from_value(json!({"block_cached": true})).map_err(|e| e.to_string())?;
        assert!(params.block_cached);
        Ok(())
    }

    #[test]
    fn test_corrupt_cached_body_is_a_server_error() {
        let cached = CachedResponse {
            body: bytes::Bytes::from_static(b"\x00 not json"),
            source: None,
        };
        let err = cached_body(&cached).err().map(|e| e.status_code());
        assert_eq!(err, Some(axum::http::StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_path_id_overrides_body_id() {
        let mut data = Map::new();
        data.insert(OBJECT_ID_FIELD.to_string(), json!("from-body"));
        let data = with_id(data, "from-path".to_string());
        assert_eq!(data[OBJECT_ID_FIELD], "from-path");
    }
}
