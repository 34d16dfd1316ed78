//! Hook Orchestrator
//!
//! Runs user-registered "custom event" hooks around object mutations.
//!
//! - Before-phase blocking hooks run in registration order; the first
//!   failure aborts the mutation and is reported as `"<message> in <hook>"`.
//! - After-phase blocking hooks all run; the first failure is reported to
//!   the caller even though the mutation already happened.
//! - Fire-and-forget hooks run on a detached task in either phase. They are
//!   not cancelled when the request ends and their failures are only logged.
//!
//! Hooks are delivered at most once; nothing here retries.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::{HookDispatch, HookMethod, HookPhase, HookRecord};
use serde_json::{json, Map, Value};

use crate::backends::FunctionService;
use crate::context::{CallScope, RequestContext};
use crate::error::{ApiError, ApiResult};
use crate::telemetry::with_metrics;

/// Payload keys owned by the gateway; hook attributes never replace them.
const RESERVED_KEYS: [&str; 10] = [
    "object_ids",
    "table_slug",
    "object_data_before",
    "object_data_after",
    "method",
    "app_id",
    "user_id",
    "project_id",
    "environment_id",
    "correlation_id",
];

/// What a mutation did, as seen by its hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub table_slug: String,
    pub method: HookMethod,
    pub object_ids: Vec<String>,
    /// The objects before the mutation (update and delete).
    pub before: Option<Value>,
    /// The objects after the mutation (create and update).
    pub after: Option<Value>,
}

impl MutationEvent {
    pub fn new(table_slug: impl Into<String>, method: HookMethod) -> Self {
        Self {
            table_slug: table_slug.into(),
            method,
            object_ids: Vec::new(),
            before: None,
            after: None,
        }
    }

    pub fn with_object_ids(mut self, ids: Vec<String>) -> Self {
        self.object_ids = ids;
        self
    }

    pub fn with_before(mut self, before: Option<Value>) -> Self {
        self.before = before.filter(|_| self.method.has_pre_image());
        self
    }

    pub fn with_after(mut self, after: Option<Value>) -> Self {
        self.after = after.filter(|_| self.method.has_post_image());
        self
    }
}

/// Build the JSON body POSTed to a hook.
pub fn build_payload(ctx: &RequestContext, hook: &HookRecord, event: &MutationEvent) -> Value {
    let tenant = ctx.tenant();
    let mut payload = Map::new();
    payload.insert("object_ids".into(), json!(event.object_ids));
    payload.insert("table_slug".into(), json!(event.table_slug));
    if let Some(before) = &event.before {
        payload.insert("object_data_before".into(), before.clone());
    }
    if let Some(after) = &event.after {
        payload.insert("object_data_after".into(), after.clone());
    }
    payload.insert("method".into(), json!(event.method.as_str()));
    payload.insert("app_id".into(), json!(ctx.app_id().unwrap_or_default()));
    payload.insert("user_id".into(), json!(ctx.principal().user_id()));
    payload.insert("project_id".into(), json!(tenant.project_id));
    payload.insert("environment_id".into(), json!(tenant.environment_id));
    payload.insert("correlation_id".into(), json!(ctx.correlation_id()));

    for (key, value) in &hook.attributes {
        if RESERVED_KEYS.contains(&key.as_str()) {
            tracing::debug!(hook = %hook.name, attribute = %key, "Ignoring attribute that shadows a payload field");
            continue;
        }
        payload.insert(key.clone(), value.clone());
    }
    Value::Object(payload)
}

#[derive(Clone)]
pub struct HookOrchestrator {
    functions: Arc<dyn FunctionService>,
    /// Deadline given to each fire-and-forget invocation.
    detached_timeout: Duration,
}

impl std::fmt::Debug for HookOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookOrchestrator")
            .field("detached_timeout", &self.detached_timeout)
            .finish_non_exhaustive()
    }
}

impl HookOrchestrator {
    pub fn new(functions: Arc<dyn FunctionService>, detached_timeout: Duration) -> Self {
        Self {
            functions,
            detached_timeout,
        }
    }

    /// Run before-hooks. An error means the mutation must not happen.
    pub async fn run_before(&self, ctx: &RequestContext, hooks: &[HookRecord], event: &MutationEvent) -> ApiResult<()> {
        for hook in hooks {
            let payload = build_payload(ctx, hook, event);
            match hook.dispatch {
                HookDispatch::Blocking => {
                    invoke(self.functions.as_ref(), HookPhase::Before, hook, &payload, &ctx.scope()).await?;
                }
                HookDispatch::FireAndForget => {
                    self.spawn_detached(HookPhase::Before, hook.clone(), payload, ctx.detached_scope(self.detached_timeout));
                }
            }
        }
        Ok(())
    }

    /// Run after-hooks. Every hook is attempted; the first blocking failure
    /// is returned.
    pub async fn run_after(&self, ctx: &RequestContext, hooks: &[HookRecord], event: &MutationEvent) -> ApiResult<()> {
        let mut first_failure = None;
        for hook in hooks {
            let payload = build_payload(ctx, hook, event);
            match hook.dispatch {
                HookDispatch::Blocking => {
                    let result =
                        invoke(self.functions.as_ref(), HookPhase::After, hook, &payload, &ctx.scope()).await;
                    if let Err(err) = result {
                        first_failure.get_or_insert(err);
                    }
                }
                HookDispatch::FireAndForget => {
                    self.spawn_detached(HookPhase::After, hook.clone(), payload, ctx.detached_scope(self.detached_timeout));
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_detached(&self, phase: HookPhase, hook: HookRecord, payload: Value, scope: CallScope) {
        let functions = Arc::clone(&self.functions);
        tokio::spawn(async move {
            if let Err(err) = invoke(functions.as_ref(), phase, &hook, &payload, &scope).await {
                tracing::warn!(
                    correlation_id = %scope.correlation_id,
                    hook = %hook.name,
                    phase = phase.as_str(),
                    error = %err.message,
                    "Fire-and-forget hook failed"
                );
            }
        });
    }
}

async fn invoke(
    functions: &dyn FunctionService,
    phase: HookPhase,
    hook: &HookRecord,
    payload: &Value,
    scope: &CallScope,
) -> ApiResult<()> {
    let outcome = match functions.invoke(&hook.path, payload, scope).await {
        Ok(response) => match response.failure_message() {
            Some(message) => Err(ApiError::hook_failed(&hook.name, message)),
            None => Ok(()),
        },
        Err(err) => Err(ApiError::hook_failed(&hook.name, &err)),
    };

    with_metrics(|m| m.record_hook(phase.as_str(), hook.dispatch.as_str(), outcome.is_ok()));
    match &outcome {
        Ok(()) => tracing::debug!(
            correlation_id = %scope.correlation_id,
            hook = %hook.name,
            phase = phase.as_str(),
            mode = hook.dispatch.as_str(),
            "Hook succeeded"
        ),
        Err(err) => tracing::info!(
            correlation_id = %scope.correlation_id,
            hook = %hook.name,
            phase = phase.as_str(),
            mode = hook.dispatch.as_str(),
            error = %err.message,
            "Hook failed"
        ),
    }
    outcome
}
