//! Request pipeline
//!
//! What handlers call once the tenant middleware has produced a
//! [`RequestContext`]. Reads go through the response cache; object mutations
//! are wrapped in before/after hooks; every backend call goes through the
//! variant dispatcher so handlers never see the engine class.

use bytes::Bytes;
use gatehouse_core::{HookMethod, HookSet};
use serde_json::{Map, Value};

use crate::config::ApiConfig;
use crate::context::RequestContext;
use crate::dispatch::{
    EntityRequest, EntityResponse, HooksRequest, HooksResponse, ObjectRequest, ObjectResponse, Operation,
    VariantDispatcher,
};
use crate::error::{ApiError, ApiResult};
use crate::hooks::{HookOrchestrator, MutationEvent};
use crate::response_cache::{cache_key, fingerprint, CachedResponse, ResponseCache};

/// Cache namespace for hook listings, kept apart from table reads so object
/// writes do not purge them.
pub const HOOKS_NAMESPACE: &str = "custom_event";

/// Field carrying an object's id in requests and responses.
pub const OBJECT_ID_FIELD: &str = "guid";

#[derive(Debug, Clone)]
pub struct Pipeline {
    dispatcher: VariantDispatcher,
    responses: ResponseCache,
    hooks: HookOrchestrator,
    invalidate_on_write: bool,
    cache_hooks: bool,
}

impl Pipeline {
    pub fn new(
        dispatcher: VariantDispatcher,
        responses: ResponseCache,
        hooks: HookOrchestrator,
        config: &ApiConfig,
    ) -> Self {
        Self {
            dispatcher,
            responses,
            hooks,
            invalidate_on_write: config.invalidate_on_write,
            cache_hooks: config.cache_hooks,
        }
    }

    pub fn response_cache(&self) -> &ResponseCache {
        &self.responses
    }

    /// The object request a handler should send for `table_slug`.
    pub fn object_request(ctx: &RequestContext, table_slug: &str, data: Map<String, Value>) -> ApiResult<ObjectRequest> {
        Ok(ObjectRequest {
            table_slug: table_slug.to_string(),
            project_id: ctx.require_resource()?.resource_environment_id.clone(),
            data,
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// A cached object read. The body is the serialized [`ObjectResponse`].
    pub async fn read_object(
        &self,
        ctx: &RequestContext,
        op: Operation,
        req: &ObjectRequest,
        block_cached: bool,
    ) -> ApiResult<CachedResponse> {
        let resource = ctx.require_resource()?;
        let fp = fingerprint(&(op.as_str(), req))?;
        let key = cache_key(&req.table_slug, &fp, &resource.resource_environment_id);
        let scope = ctx.scope();
        let call_scope = &scope;

        let read = self.responses.read_through(&key, block_cached, || async move {
            let resp: ObjectResponse = self.dispatcher.dispatch(op, req, resource, call_scope).await?;
            let body = serde_json::to_vec(&resp)?;
            Ok::<_, ApiError>((Bytes::from(body), resp.is_cached))
        });
        let response = scope.within(op.as_str(), read).await?;

        tracing::debug!(
            correlation_id = %ctx.correlation_id(),
            table_slug = %req.table_slug,
            op = op.as_str(),
            source = response.source.map(|s| s.as_str()).unwrap_or("bypass"),
            "Object read served"
        );
        Ok(response)
    }

    /// Hooks registered for `(table_slug, method)` and the caller's role.
    pub async fn hooks_for(&self, ctx: &RequestContext, table_slug: &str, method: HookMethod) -> ApiResult<HookSet> {
        let resource = ctx.require_resource()?;
        let req = HooksRequest {
            table_slug: table_slug.to_string(),
            method,
            role_id: ctx.principal().role_id().to_string(),
            project_id: resource.resource_environment_id.clone(),
        };
        let scope = ctx.scope();
        let (call_scope, listing_req) = (&scope, &req);

        let listing: HooksResponse = if self.cache_hooks {
            let key = cache_key(HOOKS_NAMESPACE, &fingerprint(&req)?, &resource.resource_environment_id);
            let read = self.responses.read_through(&key, false, || async move {
                let resp: HooksResponse = self
                    .dispatcher
                    .dispatch(Operation::ListHooks, listing_req, resource, call_scope)
                    .await?;
                Ok::<_, ApiError>((Bytes::from(serde_json::to_vec(&resp)?), true))
            });
            let cached = scope.within(Operation::ListHooks.as_str(), read).await?;
            serde_json::from_slice(&cached.body)
                .map_err(|e| ApiError::internal_error(format!("Corrupt cached hook listing: {}", e)))?
        } else {
            self.dispatcher
                .dispatch(Operation::ListHooks, &req, resource, &scope)
                .await?
        };
        Ok(HookSet::from_records(listing.custom_events))
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Perform an object mutation wrapped in its hooks.
    ///
    /// A failing before-hook stops the mutation. A failing blocking
    /// after-hook is reported with the mutation result as its `data`.
    pub async fn mutate_object(
        &self,
        ctx: &RequestContext,
        op: Operation,
        method: HookMethod,
        req: &ObjectRequest,
    ) -> ApiResult<ObjectResponse> {
        let resource = ctx.require_resource()?;
        let hooks = self.hooks_for(ctx, &req.table_slug, method).await?;
        let scope = ctx.scope();

        let before = if method.has_pre_image() && !hooks.is_empty() {
            let current: ObjectResponse = self
                .dispatcher
                .dispatch(Operation::GetSingleObject, req, resource, &scope)
                .await?;
            Some(current.data)
        } else {
            None
        };

        let event = MutationEvent::new(&req.table_slug, method)
            .with_object_ids(object_ids(&req.data, None))
            .with_before(before)
            .with_after(Some(Value::Object(req.data.clone())));
        self.hooks.run_before(ctx, &hooks.before, &event).await?;

        let resp: ObjectResponse = self.dispatcher.dispatch(op, req, resource, &scope).await?;
        if self.invalidate_on_write {
            self.responses
                .invalidate(&req.table_slug, &resource.resource_environment_id);
        }

        if hooks.after.is_empty() {
            return Ok(resp);
        }
        let event = MutationEvent {
            object_ids: object_ids(&req.data, Some(&resp.data)),
            ..event
        }
        .with_after(Some(resp.data.clone()));
        match self.hooks.run_after(ctx, &hooks.after, &event).await {
            Ok(()) => Ok(resp),
            Err(err) => {
                let details = serde_json::to_value(&resp).unwrap_or(Value::Null);
                Err(err.with_details(details))
            }
        }
    }

    /// Table, menu, field and relation operations: dispatch only.
    ///
    /// Writes to a table's definition purge that table's cached reads.
    pub async fn mutate_entity(&self, ctx: &RequestContext, op: Operation, req: &EntityRequest) -> ApiResult<EntityResponse> {
        let resource = ctx.require_resource()?;
        let resp: EntityResponse = self.dispatcher.dispatch(op, req, resource, &ctx.scope()).await?;

        let table_op = matches!(
            op,
            Operation::CreateTable | Operation::UpdateTable | Operation::DeleteTable
        );
        if self.invalidate_on_write && table_op {
            if let Some(slug) = req.data.get("slug").and_then(Value::as_str) {
                self.responses
                    .invalidate(slug, &resource.resource_environment_id);
            }
        }
        Ok(resp)
    }
}

/// Ids of the affected objects: the request's `guid`, else the response's.
fn object_ids(data: &Map<String, Value>, response: Option<&Value>) -> Vec<String> {
    data.get(OBJECT_ID_FIELD)
        .or_else(|| response.and_then(|r| r.get(OBJECT_ID_FIELD)))
        .and_then(Value::as_str)
        .map(|id| vec![id.to_string()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::backends::{BackendResult, FunctionResponse, FunctionService, ObjectBuilderStub};
    use crate::context::CallScope;
    use crate::error::ErrorCode;
    use async_trait::async_trait;
    use gatehouse_cache::CacheConfig;
    use gatehouse_core::{EngineClass, HookDispatch, HookPhase, HookRecord, Principal, ResourceDescriptor};
    use gatehouse_test_utils::fixtures::{hook, object_builder_resource, test_tenant};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Records every operation; answers reads with a cacheable body.
    struct RecordingBuilder {
        engine: EngineClass,
        hooks: Vec<HookRecord>,
        ops: Mutex<Vec<Operation>>,
    }

    #[async_trait]
    impl ObjectBuilderStub for RecordingBuilder {
        fn engine(&self) -> EngineClass {
            self.engine
        }

        fn implements(&self, op: Operation) -> bool {
            op.supported_by(self.engine)
        }

        async fn invoke(
            &self,
            op: Operation,
            _resource: &ResourceDescriptor,
            body: Value,
            _scope: &CallScope,
        ) -> BackendResult<Value> {
            self.ops.lock().push(op);
            Ok(match op {
                Operation::ListHooks => json!({ "custom_events": self.hooks }),
                _ => json!({
                    "table_slug": body.get("table_slug").cloned().unwrap_or(Value::Null),
                    "data": {"guid": "o-1", "status": "paid"},
                    "is_cached": true
                }),
            })
        }
    }

    struct FailingFunctions;

    #[async_trait]
    impl FunctionService for FailingFunctions {
        async fn invoke(&self, _path: &str, _payload: &Value, _scope: &CallScope) -> BackendResult<FunctionResponse> {
            Ok(FunctionResponse {
                status: "error".into(),
                data: json!({"message": "bad payload"}),
                ..Default::default()
            })
        }
    }

    fn setup(hooks: Vec<HookRecord>) -> Result<(Pipeline, Arc<RecordingBuilder>, RequestContext), String> {
        let builder = |engine| {
            Arc::new(RecordingBuilder {
                engine,
                hooks: hooks.clone(),
                ops: Mutex::new(Vec::new()),
            })
        };
        let a = builder(EngineClass::A);
        let dispatcher = VariantDispatcher::new(a.clone(), builder(EngineClass::B));
        let responses = ResponseCache::new(CacheConfig::new().with_capacity(64), Duration::from_secs(15))
            .map_err(|e| e.message)?;
        let orchestrator = HookOrchestrator::new(Arc::new(FailingFunctions), Duration::from_secs(5));
        let pipeline = Pipeline::new(dispatcher, responses, orchestrator, &ApiConfig::default());

        let ctx = RequestContext::new(
            "corr-pipeline",
            Principal::api_key("role-1", "client-1"),
            test_tenant(),
            Duration::from_secs(5),
        )
        .with_resource(object_builder_resource(EngineClass::A));
        Ok((pipeline, a, ctx))
    }

    fn request(ctx: &RequestContext) -> Result<ObjectRequest, String> {
        let mut data = Map::new();
        data.insert("guid".into(), json!("o-1"));
        Pipeline::object_request(ctx, "orders", data).map_err(|e| e.message)
    }

    #[tokio::test]
    async fn test_second_read_is_a_hit() -> Result<(), String> {
        let (pipeline, builder, ctx) = setup(vec![])?;
        let req = request(&ctx)?;
        for _ in 0..2 {
            pipeline
                .read_object(&ctx, Operation::GetSingleSlim, &req, false)
                .await
                .map_err(|e| e.message)?;
        }
        assert_eq!(*builder.ops.lock(), vec![Operation::GetSingleSlim]);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_purges_cached_reads() -> Result<(), String> {
        let (pipeline, builder, ctx) = setup(vec![])?;
        let req = request(&ctx)?;
        pipeline
            .read_object(&ctx, Operation::GetSingleSlim, &req, false)
            .await
            .map_err(|e| e.message)?;
        pipeline
            .mutate_object(&ctx, Operation::UpdateObject, HookMethod::Update, &req)
            .await
            .map_err(|e| e.message)?;
        pipeline
            .read_object(&ctx, Operation::GetSingleSlim, &req, false)
            .await
            .map_err(|e| e.message)?;

        let reads = builder
            .ops
            .lock()
            .iter()
            .filter(|op| **op == Operation::GetSingleSlim)
            .count();
        assert_eq!(reads, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_before_hook_failure_skips_mutation() -> Result<(), String> {
        let (pipeline, builder, ctx) = setup(vec![hook("validate", HookPhase::Before, HookDispatch::Blocking)])?;
        let req = request(&ctx)?;

        let err = pipeline
            .mutate_object(&ctx, Operation::CreateObject, HookMethod::Create, &req)
            .await
            .err()
            .ok_or("expected the hook to fail")?;
        assert_eq!(err.code, ErrorCode::HookFailed);
        assert!(err.message.ends_with("in validate"));
        assert!(!builder.ops.lock().contains(&Operation::CreateObject));
        Ok(())
    }

    #[tokio::test]
    async fn test_after_hook_failure_carries_mutation_result() -> Result<(), String> {
        let (pipeline, builder, ctx) = setup(vec![hook("audit", HookPhase::After, HookDispatch::Blocking)])?;
        let req = request(&ctx)?;

        let err = pipeline
            .mutate_object(&ctx, Operation::DeleteObject, HookMethod::Delete, &req)
            .await
            .err()
            .ok_or("expected the hook to fail")?;
        assert_eq!(err.code, ErrorCode::HookFailed);
        assert_eq!(err.details.as_ref().map(|d| d["table_slug"].clone()), Some(json!("orders")));

        let ops = builder.ops.lock().clone();
        assert!(ops.contains(&Operation::GetSingleObject), "pre-image fetched");
        assert!(ops.contains(&Operation::DeleteObject));
        Ok(())
    }

    #[tokio::test]
    async fn test_hook_listing_is_cached() -> Result<(), String> {
        let (pipeline, builder, ctx) = setup(vec![])?;
        for _ in 0..3 {
            let set = pipeline
                .hooks_for(&ctx, "orders", HookMethod::Create)
                .await
                .map_err(|e| e.message)?;
            assert!(set.is_empty());
        }
        let listings = builder
            .ops
            .lock()
            .iter()
            .filter(|op| **op == Operation::ListHooks)
            .count();
        assert_eq!(listings, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_context_reads_fail() -> Result<(), String> {
        let (pipeline, builder, ctx) = setup(vec![])?;
        let req = request(&ctx)?;
        ctx.cancel();
        let err = pipeline
            .read_object(&ctx, Operation::GetSingleSlim, &req, false)
            .await
            .err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::Cancelled));
        assert!(builder.ops.lock().is_empty());
        Ok(())
    }

    /// Reads report the status current when they were issued, then wait for
    /// the gate. Updates change the status.
    struct GatedBuilder {
        status: Mutex<&'static str>,
        reads_started: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait]
    impl ObjectBuilderStub for GatedBuilder {
        fn engine(&self) -> EngineClass {
            EngineClass::A
        }

        fn implements(&self, _op: Operation) -> bool {
            true
        }

        async fn invoke(
            &self,
            op: Operation,
            _resource: &ResourceDescriptor,
            body: Value,
            _scope: &CallScope,
        ) -> BackendResult<Value> {
            match op {
                Operation::ListHooks => Ok(json!({ "custom_events": [] })),
                Operation::UpdateObject => {
                    *self.status.lock() = "paid";
                    Ok(json!({"table_slug": body["table_slug"].clone(), "data": {"status": "paid"}}))
                }
                _ => {
                    let status = *self.status.lock();
                    self.reads_started.fetch_add(1, Ordering::SeqCst);
                    let _permit = self.gate.acquire().await;
                    Ok(json!({
                        "table_slug": body["table_slug"].clone(),
                        "data": {"status": status},
                        "is_cached": true
                    }))
                }
            }
        }
    }

    #[tokio::test]
    async fn test_write_during_read_fill_is_not_masked_by_stale_read() -> Result<(), String> {
        let builder = Arc::new(GatedBuilder {
            status: Mutex::new("new"),
            reads_started: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        });
        let dispatcher = VariantDispatcher::new(builder.clone(), builder.clone());
        let responses = ResponseCache::new(CacheConfig::new().with_capacity(64), Duration::from_secs(15))
            .map_err(|e| e.message)?;
        let orchestrator = HookOrchestrator::new(Arc::new(FailingFunctions), Duration::from_secs(5));
        let pipeline = Pipeline::new(dispatcher, responses, orchestrator, &ApiConfig::default());
        let ctx = RequestContext::new(
            "corr-stale",
            Principal::api_key("role-1", "client-1"),
            test_tenant(),
            Duration::from_secs(5),
        )
        .with_resource(object_builder_resource(EngineClass::A));
        let req = request(&ctx)?;

        let in_flight = pipeline.read_object(&ctx, Operation::GetSingleSlim, &req, false);
        let write = async {
            while builder.reads_started.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            let written = pipeline
                .mutate_object(&ctx, Operation::UpdateObject, HookMethod::Update, &req)
                .await;
            builder.gate.add_permits(16);
            written
        };
        let (first, written) = tokio::join!(in_flight, write);
        written.map_err(|e| e.message)?;
        let first = first.map_err(|e| e.message)?;
        let first: Value = serde_json::from_slice(&first.body).map_err(|e| e.to_string())?;
        assert_eq!(first["data"]["status"], "new");

        let after = pipeline
            .read_object(&ctx, Operation::GetSingleSlim, &req, false)
            .await
            .map_err(|e| e.message)?;
        let after: Value = serde_json::from_slice(&after.body).map_err(|e| e.to_string())?;
        assert_eq!(after["data"]["status"], "paid");
        assert_eq!(builder.reads_started.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn test_object_ids_prefer_request() {
        let mut data = Map::new();
        assert!(object_ids(&data, None).is_empty());
        assert_eq!(object_ids(&data, Some(&json!({"guid": "new"}))), vec!["new"]);
        data.insert("guid".into(), json!("given"));
        assert_eq!(object_ids(&data, Some(&json!({"guid": "new"}))), vec!["given"]);
    }
}
