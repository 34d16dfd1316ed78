//! Variant Dispatcher
//!
//! Every object-builder operation exists twice, once per engine class, with
//! wire messages that mostly agree and occasionally carry engine-specific
//! fields. Handlers deal in one request and one response type per
//! operation; [`VariantDispatcher::dispatch`] picks the stub named by the
//! resource descriptor and marshals field by field into and out of that
//! engine's shape. There is no fallback to the other engine.

use std::sync::Arc;

use gatehouse_core::{EngineClass, HookMethod, HookRecord, ResourceDescriptor};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backends::{BackendError, BackendResult, ObjectBuilderStub};
use crate::context::CallScope;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// OPERATIONS
// ============================================================================

/// Symbolic name of an object-builder call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateObject,
    UpdateObject,
    DeleteObject,
    GetSingleObject,
    GetSingleSlim,
    GetListObjects,
    ListHooks,
    CreateTable,
    UpdateTable,
    DeleteTable,
    CreateMenu,
    UpdateMenu,
    DeleteMenu,
    CreateField,
    UpdateField,
    DeleteField,
    CreateRelation,
    DeleteRelation,
}

impl Operation {
    pub const ALL: [Operation; 18] = [
        Operation::CreateObject,
        Operation::UpdateObject,
        Operation::DeleteObject,
        Operation::GetSingleObject,
        Operation::GetSingleSlim,
        Operation::GetListObjects,
        Operation::ListHooks,
        Operation::CreateTable,
        Operation::UpdateTable,
        Operation::DeleteTable,
        Operation::CreateMenu,
        Operation::UpdateMenu,
        Operation::DeleteMenu,
        Operation::CreateField,
        Operation::UpdateField,
        Operation::DeleteField,
        Operation::CreateRelation,
        Operation::DeleteRelation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateObject => "create-object",
            Operation::UpdateObject => "update-object",
            Operation::DeleteObject => "delete-object",
            Operation::GetSingleObject => "get-single-object",
            Operation::GetSingleSlim => "get-single-slim",
            Operation::GetListObjects => "get-list-objects",
            Operation::ListHooks => "list-hooks",
            Operation::CreateTable => "create-table",
            Operation::UpdateTable => "update-table",
            Operation::DeleteTable => "delete-table",
            Operation::CreateMenu => "create-menu",
            Operation::UpdateMenu => "update-menu",
            Operation::DeleteMenu => "delete-menu",
            Operation::CreateField => "create-field",
            Operation::UpdateField => "update-field",
            Operation::DeleteField => "delete-field",
            Operation::CreateRelation => "create-relation",
            Operation::DeleteRelation => "delete-relation",
        }
    }

    /// Path of the operation on an object-builder deployment.
    pub fn path(&self) -> &'static str {
        match self {
            Operation::CreateObject => "object/create",
            Operation::UpdateObject => "object/update",
            Operation::DeleteObject => "object/delete",
            Operation::GetSingleObject => "object/get-single",
            Operation::GetSingleSlim => "object/get-single-slim",
            Operation::GetListObjects => "object/get-list",
            Operation::ListHooks => "custom-event/get-list",
            Operation::CreateTable => "table/create",
            Operation::UpdateTable => "table/update",
            Operation::DeleteTable => "table/delete",
            Operation::CreateMenu => "menu/create",
            Operation::UpdateMenu => "menu/update",
            Operation::DeleteMenu => "menu/delete",
            Operation::CreateField => "field/create",
            Operation::UpdateField => "field/update",
            Operation::DeleteField => "field/delete",
            Operation::CreateRelation => "relation/create",
            Operation::DeleteRelation => "relation/delete",
        }
    }

    /// Whether the engine's object-builder offers this operation.
    ///
    /// Engine B manages relations implicitly through field definitions and
    /// has no relation endpoints.
    pub fn supported_by(&self, engine: EngineClass) -> bool {
        match engine {
            EngineClass::A => true,
            EngineClass::B => !matches!(self, Operation::CreateRelation | Operation::DeleteRelation),
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Operation::GetSingleObject
                | Operation::GetSingleSlim
                | Operation::GetListObjects
                | Operation::ListHooks
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// STRUCTURAL MARSHALLING
// ============================================================================

/// Copy `src` into `D` field by field, matching on field names.
///
/// Fields `D` does not declare are dropped; fields `D` declares with
/// `#[serde(default)]` that `src` lacks are defaulted.
pub fn marshal<S, D>(src: &S) -> BackendResult<D>
where
    S: Serialize + ?Sized,
    D: DeserializeOwned,
{
    let value = serde_json::to_value(src)?;
    Ok(serde_json::from_value(value)?)
}

/// A common message type and its per-engine wire shapes.
pub trait WireShape: Serialize + DeserializeOwned + Send + Sync {
    type A: Serialize + DeserializeOwned;
    type B: Serialize + DeserializeOwned;

    fn encode(&self, engine: EngineClass) -> BackendResult<Value> {
        match engine {
            EngineClass::A => Ok(serde_json::to_value(marshal::<Self, Self::A>(self)?)?),
            EngineClass::B => Ok(serde_json::to_value(marshal::<Self, Self::B>(self)?)?),
        }
    }

    fn decode(engine: EngineClass, raw: Value) -> BackendResult<Self> {
        match engine {
            EngineClass::A => marshal(&serde_json::from_value::<Self::A>(raw)?),
            EngineClass::B => marshal(&serde_json::from_value::<Self::B>(raw)?),
        }
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Request for any object operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub table_slug: String,
    /// The resource environment id; the backend's notion of project.
    pub project_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Engine A's object message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMessageA {
    pub table_slug: String,
    pub project_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Engine B's object message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMessageB {
    pub table_slug: String,
    pub project_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub env_id: String,
    #[serde(default)]
    pub blocked_builder: bool,
}

impl WireShape for ObjectRequest {
    type A = ObjectMessageA;
    type B = ObjectMessageB;
}

/// Answer to any object operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectResponse {
    pub table_slug: String,
    #[serde(default)]
    pub data: Value,
    /// Set by the backend when the answer may be served from cache.
    #[serde(default)]
    pub is_cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectResponseB {
    pub table_slug: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub is_cached: bool,
    #[serde(default)]
    pub custom_message: String,
}

impl WireShape for ObjectResponse {
    type A = ObjectResponse;
    type B = ObjectResponseB;
}

/// Request for table, menu, field and relation operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRequest {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMessageB {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub env_id: String,
}

impl WireShape for EntityRequest {
    type A = EntityRequest;
    type B = EntityMessageB;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityResponse {
    #[serde(default)]
    pub data: Value,
}

impl WireShape for EntityResponse {
    type A = EntityResponse;
    type B = EntityResponse;
}

/// Request for the hooks registered on (table, method, role).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HooksRequest {
    pub table_slug: String,
    pub method: HookMethod,
    pub role_id: String,
    pub project_id: String,
}

impl WireShape for HooksRequest {
    type A = HooksRequest;
    type B = HooksRequest;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HooksResponse {
    #[serde(default)]
    pub custom_events: Vec<HookRecord>,
}

impl WireShape for HooksResponse {
    type A = HooksResponse;
    type B = HooksResponse;
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Routes each call to the object-builder of the resource's engine class.
#[derive(Clone)]
pub struct VariantDispatcher {
    variant_a: Arc<dyn ObjectBuilderStub>,
    variant_b: Arc<dyn ObjectBuilderStub>,
}

impl std::fmt::Debug for VariantDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantDispatcher").finish_non_exhaustive()
    }
}

impl VariantDispatcher {
    pub fn new(variant_a: Arc<dyn ObjectBuilderStub>, variant_b: Arc<dyn ObjectBuilderStub>) -> Self {
        Self { variant_a, variant_b }
    }

    fn stub(&self, engine: EngineClass) -> &Arc<dyn ObjectBuilderStub> {
        match engine {
            EngineClass::A => &self.variant_a,
            EngineClass::B => &self.variant_b,
        }
    }

    /// Perform `op` against the backend named by `resource`.
    ///
    /// A cancelled or expired scope fails before the stub is called.
    pub async fn dispatch<Req, Resp>(
        &self,
        op: Operation,
        req: &Req,
        resource: &ResourceDescriptor,
        scope: &CallScope,
    ) -> ApiResult<Resp>
    where
        Req: WireShape,
        Resp: WireShape,
    {
        let engine = resource.engine_class;
        let stub = self.stub(engine);
        if !stub.implements(op) {
            tracing::debug!(
                correlation_id = %scope.correlation_id,
                op = op.as_str(),
                engine = %engine,
                "Operation not implemented by engine"
            );
            return Err(ApiError::not_implemented(op, engine));
        }

        let body = req.encode(engine).map_err(ApiError::from)?;
        let raw = scope
            .run(op.as_str(), stub.invoke(op, resource, body, scope))
            .await
            .map_err(|e| log_dispatch_failure(op, engine, scope, e))?;
        Resp::decode(engine, raw).map_err(ApiError::from)
    }
}

fn log_dispatch_failure(op: Operation, engine: EngineClass, scope: &CallScope, err: BackendError) -> ApiError {
    tracing::warn!(
        correlation_id = %scope.correlation_id,
        op = op.as_str(),
        engine = %engine,
        mutation = op.is_mutation(),
        error = %err,
        "Dispatch failed"
    );
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use async_trait::async_trait;
    use gatehouse_test_utils::fixtures::object_builder_resource;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts invocations; answers every call with an empty entity.
    struct CountingStub {
        engine: EngineClass,
        invocations: AtomicUsize,
    }

    impl CountingStub {
        fn new(engine: EngineClass) -> Arc<Self> {
            Arc::new(Self {
                engine,
                invocations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ObjectBuilderStub for CountingStub {
        fn engine(&self) -> EngineClass {
            self.engine
        }

        fn implements(&self, op: Operation) -> bool {
            op.supported_by(self.engine)
        }

        async fn invoke(
            &self,
            _op: Operation,
            _resource: &ResourceDescriptor,
            _body: Value,
            _scope: &CallScope,
        ) -> BackendResult<Value> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "data": {} }))
        }
    }

    fn entity_request() -> EntityRequest {
        EntityRequest {
            project_id: "env-res-1".into(),
            id: None,
            data: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_relations_on_engine_b_are_refused_without_a_call() -> Result<(), String> {
        let (a, b) = (CountingStub::new(EngineClass::A), CountingStub::new(EngineClass::B));
        let dispatcher = VariantDispatcher::new(a.clone(), b.clone());
        let scope = CallScope::detached("corr-dispatch", Duration::from_secs(5));

        for op in [Operation::CreateRelation, Operation::DeleteRelation] {
            let err = dispatcher
                .dispatch::<_, EntityResponse>(op, &entity_request(), &object_builder_resource(EngineClass::B), &scope)
                .await
                .err()
                .ok_or("engine B should refuse relations")?;
            assert_eq!(err.code, ErrorCode::NotImplemented);
        }
        assert_eq!(b.invocations.load(Ordering::SeqCst), 0);
        assert_eq!(a.invocations.load(Ordering::SeqCst), 0);

        // Engine A serves them.
        dispatcher
            .dispatch::<_, EntityResponse>(
                Operation::CreateRelation,
                &entity_request(),
                &object_builder_resource(EngineClass::A),
                &scope,
            )
            .await
            .map_err(|e| e.message)?;
        assert_eq!(a.invocations.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_object_request_encodes_per_engine() -> Result<(), BackendError> {
        let mut data = Map::new();
        data.insert("guid".into(), json!("abc"));
        let req = ObjectRequest {
            table_slug: "orders".into(),
            project_id: "env-1".into(),
            data,
        };

        let a = req.encode(EngineClass::A)?;
        assert!(a.get("env_id").is_none());

        let b = req.encode(EngineClass::B)?;
        assert_eq!(b["env_id"], "");
        assert_eq!(b["blocked_builder"], false);
        assert_eq!(b["data"]["guid"], "abc");
        Ok(())
    }

    #[test]
    fn test_b_only_fields_are_dropped_on_decode() -> Result<(), BackendError> {
        let raw = json!({
            "table_slug": "orders",
            "data": {"guid": "abc"},
            "is_cached": true,
            "custom_message": "served by B"
        });
        let resp = ObjectResponse::decode(EngineClass::B, raw)?;
        assert_eq!(
            resp,
            ObjectResponse {
                table_slug: "orders".into(),
                data: json!({"guid": "abc"}),
                is_cached: true,
            }
        );
        Ok(())
    }

    #[test]
    fn test_missing_required_field_is_a_decode_error() {
        let err = ObjectResponse::decode(EngineClass::A, json!({"data": {}}))
            .err()
            .map(|e| e.kind());
        assert_eq!(err, Some("decode"));
    }

    #[test]
    fn test_operation_support() {
        for op in Operation::ALL {
            assert!(op.supported_by(EngineClass::A), "{}", op);
        }
        assert!(!Operation::CreateRelation.supported_by(EngineClass::B));
        assert!(Operation::GetSingleSlim.supported_by(EngineClass::B));
    }

    #[test]
    fn test_reads_are_not_mutations() {
        assert!(!Operation::GetSingleSlim.is_mutation());
        assert!(!Operation::ListHooks.is_mutation());
        assert!(Operation::DeleteObject.is_mutation());
    }
}
