//! Backend service contracts
//!
//! The pipeline only talks to backends through these traits. The HTTP
//! implementations live in `http.rs`; tests substitute in-memory fakes.

use async_trait::async_trait;
use gatehouse_core::{
    ApiKeyBinding, EngineClass, Principal, ResourceDescriptor, ServiceClass, TenantKey,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::BackendResult;
use crate::context::CallScope;
use crate::dispatch::Operation;

// ============================================================================
// AUTH
// ============================================================================

/// Inputs to the auth service's has-access check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessCheck {
    pub token: String,
    pub method: String,
    /// Request path, including the table slug.
    pub path: String,
    pub project_id: Option<String>,
    pub environment_id: Option<String>,
}

/// A successful has-access answer.
///
/// The auth service may name a different tenant than the request did; when
/// it does, its ids win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub user_id: String,
    pub role_id: String,
    pub client_type_id: String,
    #[serde(default)]
    pub row_access: Vec<Value>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub environment_id: Option<Uuid>,
}

impl AccessGrant {
    pub fn principal(&self) -> Principal {
        Principal::session(
            self.user_id.clone(),
            self.role_id.clone(),
            self.client_type_id.clone(),
            self.row_access.clone(),
        )
    }
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn has_access(&self, check: &AccessCheck, scope: &CallScope) -> BackendResult<AccessGrant>;

    async fn api_key_binding(&self, app_id: &str, scope: &CallScope) -> BackendResult<ApiKeyBinding>;
}

// ============================================================================
// COMPANY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLookup {
    pub project_id: Uuid,
    pub environment_id: Uuid,
    pub service_class: ServiceClass,
    /// Explicit resource requested with `Resource-Id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ResourceLookup {
    pub fn new(tenant: TenantKey, service_class: ServiceClass) -> Self {
        Self {
            project_id: tenant.project_id,
            environment_id: tenant.environment_id,
            service_class,
            resource_id: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: Option<String>) -> Self {
        self.resource_id = resource_id;
        self
    }
}

#[async_trait]
pub trait CompanyService: Send + Sync {
    async fn get_single_resource(
        &self,
        lookup: &ResourceLookup,
        scope: &CallScope,
    ) -> BackendResult<ResourceDescriptor>;
}

// ============================================================================
// FUNCTION
// ============================================================================

/// What a function (hook endpoint) answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl FunctionResponse {
    /// The failure message when the function reported `status: "error"`.
    pub fn failure_message(&self) -> Option<String> {
        if !self.status.eq_ignore_ascii_case("error") {
            return None;
        }
        let message = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("function reported an error");
        Some(message.to_string())
    }
}

#[async_trait]
pub trait FunctionService: Send + Sync {
    /// Invoke the function registered at `path`.
    async fn invoke(&self, path: &str, payload: &Value, scope: &CallScope) -> BackendResult<FunctionResponse>;
}

// ============================================================================
// OBJECT BUILDER
// ============================================================================

/// One engine's object-builder deployment.
///
/// Requests and responses are in the engine's own wire shape; the
/// dispatcher does the marshalling.
#[async_trait]
pub trait ObjectBuilderStub: Send + Sync {
    fn engine(&self) -> EngineClass;

    fn implements(&self, op: Operation) -> bool;

    async fn invoke(
        &self,
        op: Operation,
        resource: &ResourceDescriptor,
        body: Value,
        scope: &CallScope,
    ) -> BackendResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_failure_message() -> Result<(), serde_json::Error> {
        let failed: FunctionResponse =
            serde_json::from_value(json!({"status": "error", "data": {"message": "bad payload"}}))?;
        assert_eq!(failed.failure_message().as_deref(), Some("bad payload"));

        let bare: FunctionResponse = serde_json::from_value(json!({"status": "error"}))?;
        assert_eq!(bare.failure_message().as_deref(), Some("function reported an error"));

        let ok: FunctionResponse = serde_json::from_value(json!({"status": "done", "data": {}}))?;
        assert_eq!(ok.failure_message(), None);
        Ok(())
    }

    #[test]
    fn test_grant_builds_session_principal() {
        let grant = AccessGrant {
            user_id: "user-1".into(),
            role_id: "role-1".into(),
            client_type_id: "client-1".into(),
            row_access: vec![json!({"table": "orders"})],
            project_id: None,
            environment_id: None,
        };
        let principal = grant.principal();
        assert_eq!(principal.user_id(), "user-1");
        assert_eq!(principal.row_access().len(), 1);
    }
}
