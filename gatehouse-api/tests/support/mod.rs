//! In-memory backends for router-level tests.
//!
//! Every fake counts the calls it receives so tests can assert how many
//! RPCs a request cost.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use gatehouse_api::backends::{
    AccessCheck, AccessGrant, AuthService, BackendClients, BackendCode, BackendError, BackendResult,
    CompanyService, FunctionResponse, FunctionService, ObjectBuilderStub, ResourceLookup,
};
use gatehouse_api::{create_api_router, ApiConfig, AppState, CallScope, Operation, Services};
use gatehouse_core::{ApiKeyBinding, EngineClass, HookMethod, HookRecord, ResourceDescriptor};
use gatehouse_test_utils::fixtures::{
    api_key_binding, api_key_binding_without_project, object_builder_resource, test_tenant,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

/// App id bound to a complete tenant.
pub const APP_ID: &str = "app-1";

/// App id whose binding lacks a project.
pub const APP_WITHOUT_PROJECT: &str = "app-no-project";

// ============================================================================
// AUTH
// ============================================================================

#[derive(Default)]
pub struct FakeAuth {
    bindings: Mutex<HashMap<String, ApiKeyBinding>>,
    grants: Mutex<HashMap<String, AccessGrant>>,
    pub binding_calls: AtomicUsize,
    pub access_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn bind(&self, binding: ApiKeyBinding) {
        self.bindings.lock().insert(binding.app_id.clone(), binding);
    }

    pub fn grant(&self, token: &str, grant: AccessGrant) {
        self.grants.lock().insert(token.to_string(), grant);
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn has_access(&self, check: &AccessCheck, _scope: &CallScope) -> BackendResult<AccessGrant> {
        self.access_calls.fetch_add(1, Ordering::SeqCst);
        self.grants
            .lock()
            .get(&check.token)
            .cloned()
            .ok_or_else(|| BackendError::rejected(BackendCode::Unauthenticated, "unknown session"))
    }

    async fn api_key_binding(&self, app_id: &str, _scope: &CallScope) -> BackendResult<ApiKeyBinding> {
        self.binding_calls.fetch_add(1, Ordering::SeqCst);
        self.bindings
            .lock()
            .get(app_id)
            .cloned()
            .ok_or_else(|| BackendError::rejected(BackendCode::NotFound, "no such app"))
    }
}

// ============================================================================
// COMPANY
// ============================================================================

pub struct FakeCompany {
    engine: Mutex<EngineClass>,
    pub calls: AtomicUsize,
}

impl FakeCompany {
    pub fn new(engine: EngineClass) -> Self {
        Self {
            engine: Mutex::new(engine),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompanyService for FakeCompany {
    async fn get_single_resource(
        &self,
        _lookup: &ResourceLookup,
        _scope: &CallScope,
    ) -> BackendResult<ResourceDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(object_builder_resource(*self.engine.lock()))
    }
}

// ============================================================================
// FUNCTIONS
// ============================================================================

#[derive(Default)]
pub struct FakeFunctions {
    answers: Mutex<HashMap<String, FunctionResponse>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeFunctions {
    /// Make the function at `path` report `status: "error"` with `message`.
    pub fn fail(&self, path: &str, message: &str) {
        let answer = FunctionResponse {
            status: "error".to_string(),
            data: json!({ "message": message }),
            ..FunctionResponse::default()
        };
        self.answers.lock().insert(path.to_string(), answer);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FunctionService for FakeFunctions {
    async fn invoke(&self, path: &str, payload: &Value, _scope: &CallScope) -> BackendResult<FunctionResponse> {
        self.calls.lock().push((path.to_string(), payload.clone()));
        Ok(self.answers.lock().get(path).cloned().unwrap_or_else(|| FunctionResponse {
            status: "done".to_string(),
            ..FunctionResponse::default()
        }))
    }
}

// ============================================================================
// OBJECT BUILDER
// ============================================================================

/// One engine's object-builder. Answers in that engine's wire shape.
pub struct FakeBuilder {
    engine: EngineClass,
    hooks: Mutex<HashMap<(String, String), Vec<HookRecord>>>,
    read_delay: Mutex<Option<Duration>>,
    calls: Mutex<HashMap<Operation, usize>>,
}

impl FakeBuilder {
    pub fn new(engine: EngineClass) -> Self {
        Self {
            engine,
            hooks: Mutex::new(HashMap::new()),
            read_delay: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_hook(&self, table_slug: &str, method: HookMethod, hook: HookRecord) {
        self.hooks
            .lock()
            .entry((table_slug.to_string(), method.as_str().to_string()))
            .or_default()
            .push(hook);
    }

    /// Hold every object read for `delay` before answering.
    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn object_answer(&self, body: &Value, data: Value, is_cached: bool) -> Value {
        let mut answer = json!({
            "table_slug": body["table_slug"].clone(),
            "data": data,
            "is_cached": is_cached,
        });
        if self.engine == EngineClass::B {
            answer["custom_message"] = json!("answered by engine B");
        }
        answer
    }
}

#[async_trait]
impl ObjectBuilderStub for FakeBuilder {
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
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let is_read = matches!(
            op,
            Operation::GetSingleObject | Operation::GetSingleSlim | Operation::GetListObjects
        );
        let delay = *self.read_delay.lock();
        if let (true, Some(delay)) = (is_read, delay) {
            tokio::time::sleep(delay).await;
        }

        let guid = body["data"]["guid"].clone();
        let answer = match op {
            Operation::GetSingleObject | Operation::GetSingleSlim => {
                self.object_answer(&body, json!({ "guid": guid, "status": "paid", "total": 42 }), true)
            }
            Operation::GetListObjects => self.object_answer(
                &body,
                json!({ "count": 1, "response": [{ "guid": "abc-uuid", "total": 42 }] }),
                true,
            ),
            Operation::CreateObject => {
                let mut data = body["data"].clone();
                data["guid"] = json!("created-1");
                self.object_answer(&body, data, false)
            }
            Operation::UpdateObject | Operation::DeleteObject => {
                self.object_answer(&body, body["data"].clone(), false)
            }
            Operation::ListHooks => {
                let key = (
                    body["table_slug"].as_str().unwrap_or_default().to_string(),
                    body["method"].as_str().unwrap_or_default().to_string(),
                );
                let events = self.hooks.lock().get(&key).cloned().unwrap_or_default();
                json!({ "custom_events": events })
            }
            _ => json!({ "data": { "id": body.get("id").cloned().unwrap_or(json!("entity-1")) } }),
        };
        Ok(answer)
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

/// The full router over fake backends.
pub struct Gateway {
    pub router: Router,
    pub state: AppState,
    pub auth: Arc<FakeAuth>,
    pub company: Arc<FakeCompany>,
    pub functions: Arc<FakeFunctions>,
    pub builder_a: Arc<FakeBuilder>,
    pub builder_b: Arc<FakeBuilder>,
}

/// Defaults with the rate limiter off so parallel tests are not throttled.
pub fn test_config() -> ApiConfig {
    ApiConfig {
        rate_limit_enabled: false,
        ..ApiConfig::default()
    }
}

impl Gateway {
    pub fn start(engine: EngineClass) -> Result<Self, String> {
        Self::with_config(engine, test_config())
    }

    pub fn with_config(engine: EngineClass, config: ApiConfig) -> Result<Self, String> {
        let auth = Arc::new(FakeAuth::default());
        auth.bind(api_key_binding(APP_ID, test_tenant()));
        auth.bind(api_key_binding_without_project(APP_WITHOUT_PROJECT));

        let company = Arc::new(FakeCompany::new(engine));
        let functions = Arc::new(FakeFunctions::default());
        let builder_a = Arc::new(FakeBuilder::new(EngineClass::A));
        let builder_b = Arc::new(FakeBuilder::new(EngineClass::B));

        let services = Services {
            auth: auth.clone(),
            company: company.clone(),
            functions: functions.clone(),
            object_builder_a: builder_a.clone(),
            object_builder_b: builder_b.clone(),
        };
        let backends = BackendClients::new(&config.backends).map_err(|e| e.to_string())?;
        let state = AppState::new(config, services, backends).map_err(|e| e.to_string())?;
        let router = create_api_router(state.clone()).map_err(|e| e.to_string())?;

        Ok(Self {
            router,
            state,
            auth,
            company,
            functions,
            builder_a,
            builder_b,
        })
    }

    /// The builder the company fake routes tenants to.
    pub fn builder(&self, engine: EngineClass) -> &FakeBuilder {
        match engine {
            EngineClass::A => &self.builder_a,
            EngineClass::B => &self.builder_b,
        }
    }

    pub fn builder_calls(&self) -> usize {
        self.builder_a.total_calls() + self.builder_b.total_calls()
    }

    pub async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value), String> {
        send(&self.router, request).await
    }
}

/// A request authenticated with `app_id` as api key.
pub fn api_key_request(method: Method, uri: &str, app_id: &str, body: Option<Value>) -> Result<Request<Body>, String> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", app_id)
        .header("content-type", "application/json");
    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value).map_err(|e| e.to_string())?),
        None => Body::empty(),
    };
    builder.body(body).map_err(|e| e.to_string())
}

pub async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value), String> {
    let response = router.clone().oneshot(request).await.map_err(|e| e.to_string())?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok((status, body))
}
