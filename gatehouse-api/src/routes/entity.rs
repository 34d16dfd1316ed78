//! Shared pieces of the table, menu, field and relation routes.
//!
//! All are plain dispatches through the pipeline: no hooks, no cached
//! reads. Only the operation differs.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    context::RequestContext,
    dispatch::{EntityRequest, Operation},
    error::{ApiError, ApiResult, Envelope},
    pipeline::Pipeline,
};

/// Body of table, menu, field and relation writes.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EntityPayload {
    /// Required by updates; ignored by creates.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: Map<String, Value>,
}

/// The three write shapes every entity route offers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityOps {
    pub create: Operation,
    pub update: Operation,
    pub delete: Operation,
}

pub(crate) async fn create(
    pipeline: &Pipeline,
    ctx: &RequestContext,
    op: Operation,
    payload: EntityPayload,
) -> ApiResult<Envelope> {
    let req = request(ctx, None, payload.data)?;
    let resp = pipeline.mutate_entity(ctx, op, &req).await?;
    Ok(Envelope::created(resp.data))
}

pub(crate) async fn update(
    pipeline: &Pipeline,
    ctx: &RequestContext,
    op: Operation,
    payload: EntityPayload,
) -> ApiResult<Envelope> {
    let id = payload
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("id"))?;
    let req = request(ctx, Some(id), payload.data)?;
    let resp = pipeline.mutate_entity(ctx, op, &req).await?;
    Ok(Envelope::ok(resp.data))
}

pub(crate) async fn delete(
    pipeline: &Pipeline,
    ctx: &RequestContext,
    op: Operation,
    id: String,
    data: Map<String, Value>,
) -> ApiResult<Envelope> {
    let req = request(ctx, Some(id), data)?;
    let resp = pipeline.mutate_entity(ctx, op, &req).await?;
    Ok(Envelope::ok(resp.data))
}

fn request(ctx: &RequestContext, id: Option<String>, data: Map<String, Value>) -> ApiResult<EntityRequest> {
    Ok(EntityRequest {
        project_id: ctx.require_resource()?.resource_environment_id.clone(),
        id,
        data,
    })
}
