//! HTTP implementations of the backend contracts

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use gatehouse_core::{ApiKeyBinding, EngineClass, NodeType, ResourceDescriptor};
use serde_json::{json, Value};

use super::error::{BackendError, BackendResult};
use super::pool::{BackendClients, BackendPool};
use super::services::{
    AccessCheck, AccessGrant, AuthService, CompanyService, FunctionResponse, FunctionService,
    ObjectBuilderStub, ResourceLookup,
};
use super::Upstream;
use crate::config::BackendConfig;
use crate::context::CallScope;
use crate::dispatch::Operation;

fn pool_for(clients: &BackendClients, upstream: Upstream) -> BackendResult<BackendPool> {
    clients.pool(upstream).cloned()
}

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpAuthService {
    pool: BackendPool,
}

impl HttpAuthService {
    pub fn new(clients: &BackendClients) -> BackendResult<Self> {
        Ok(Self {
            pool: pool_for(clients, Upstream::Auth)?,
        })
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn has_access(&self, check: &AccessCheck, scope: &CallScope) -> BackendResult<AccessGrant> {
        self.pool.call_json("v1/auth/has-access", check, scope).await
    }

    async fn api_key_binding(&self, app_id: &str, scope: &CallScope) -> BackendResult<ApiKeyBinding> {
        self.pool
            .call_json("v1/auth/api-key/get", &json!({ "app_id": app_id }), scope)
            .await
    }
}

// ============================================================================
// COMPANY
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpCompanyService {
    pool: BackendPool,
}

impl HttpCompanyService {
    pub fn new(clients: &BackendClients) -> BackendResult<Self> {
        Ok(Self {
            pool: pool_for(clients, Upstream::Company)?,
        })
    }
}

#[async_trait]
impl CompanyService for HttpCompanyService {
    async fn get_single_resource(
        &self,
        lookup: &ResourceLookup,
        scope: &CallScope,
    ) -> BackendResult<ResourceDescriptor> {
        self.pool
            .call_json("v1/company/resource/get-single", lookup, scope)
            .await
    }
}

// ============================================================================
// FUNCTION
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpFunctionService {
    pool: BackendPool,
}

impl HttpFunctionService {
    pub fn new(clients: &BackendClients) -> BackendResult<Self> {
        Ok(Self {
            pool: pool_for(clients, Upstream::Function)?,
        })
    }
}

/// `validate`, `/validate` and `/function/validate` all name the same endpoint.
pub(crate) fn function_endpoint(path: &str) -> String {
    let path = path.trim_start_matches('/');
    let path = path.strip_prefix("function/").unwrap_or(path);
    format!("function/{}", path)
}

#[async_trait]
impl FunctionService for HttpFunctionService {
    async fn invoke(&self, path: &str, payload: &Value, scope: &CallScope) -> BackendResult<FunctionResponse> {
        self.pool
            .call_json(&function_endpoint(path), payload, scope)
            .await
    }
}

// ============================================================================
// OBJECT BUILDER
// ============================================================================

/// One engine's object-builder.
///
/// `LOW` resources share the engine's pool. `HIGH` resources get a pool of
/// their own onto their dedicated node, opened on first use and keyed by
/// resource id.
#[derive(Debug, Clone)]
pub struct HttpObjectBuilder {
    engine: EngineClass,
    shared: BackendPool,
    dedicated: Arc<DashMap<String, BackendPool>>,
    config: BackendConfig,
}

impl HttpObjectBuilder {
    pub fn new(clients: &BackendClients, engine: EngineClass) -> BackendResult<Self> {
        Ok(Self {
            engine,
            shared: pool_for(clients, Upstream::object_builder(engine))?,
            dedicated: Arc::new(DashMap::new()),
            config: clients.config().clone(),
        })
    }

    /// The pool serving `resource`.
    fn target(&self, resource: &ResourceDescriptor) -> BackendResult<BackendPool> {
        if resource.node_type != NodeType::High {
            return Ok(self.shared.clone());
        }
        let Some(url) = self.config.dedicated_url(self.engine, &resource.resource_id) else {
            tracing::debug!(
                engine = %self.engine,
                resource_id = %resource.resource_id,
                "No dedicated node configured, using the shared node"
            );
            return Ok(self.shared.clone());
        };
        if let Some(pool) = self.dedicated.get(&resource.resource_id) {
            return Ok(pool.clone());
        }
        let pool = BackendPool::with_url(Upstream::object_builder(self.engine), url, &self.config)?;
        Ok(self
            .dedicated
            .entry(resource.resource_id.clone())
            .or_insert(pool)
            .clone())
    }
}

#[async_trait]
impl ObjectBuilderStub for HttpObjectBuilder {
    fn engine(&self) -> EngineClass {
        self.engine
    }

    fn implements(&self, op: Operation) -> bool {
        op.supported_by(self.engine)
    }

    async fn invoke(
        &self,
        op: Operation,
        resource: &ResourceDescriptor,
        body: Value,
        scope: &CallScope,
    ) -> BackendResult<Value> {
        if !self.implements(op) {
            return Err(BackendError::NotImplemented {
                operation: op.as_str().to_string(),
                engine: self.engine,
            });
        }
        let pool = self.target(resource)?;
        tracing::trace!(
            correlation_id = %scope.correlation_id,
            engine = %self.engine,
            resource_id = %resource.resource_id,
            node_type = resource.node_type.as_str(),
            base_url = pool.base_url(),
            op = op.as_str(),
            "Dispatching to object builder"
        );
        let path = format!("v1/{}", op.path());
        pool.call_json(&path, &body, scope).await
    }
}
