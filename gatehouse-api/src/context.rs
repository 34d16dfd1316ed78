//! Per-request context
//!
//! A [`RequestContext`] is created by the tenant middleware once the caller
//! and tenant are known, and handed to exactly one handler through the
//! [`Ctx`] extractor. It is the cancellation root for the request: every
//! backend call and cache wait runs under a [`CallScope`] derived from it,
//! and dropping the context (handler finished, client went away) cancels
//! anything still in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use gatehouse_core::{Principal, ResourceDescriptor, TenantKey};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::backends::{BackendError, BackendResult};
use crate::error::{ApiError, ApiResult};

// ============================================================================
// CALL SCOPE
// ============================================================================

/// What every downstream call needs from the request: who to blame in the
/// logs, when to give up, and how to learn the caller has gone away.
#[derive(Debug, Clone)]
pub struct CallScope {
    pub correlation_id: String,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl CallScope {
    pub fn new(correlation_id: impl Into<String>, deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            deadline,
            cancel,
        }
    }

    /// A scope with its own token and a fresh deadline `timeout` from now.
    pub fn detached(correlation_id: impl Into<String>, timeout: Duration) -> Self {
        Self::new(correlation_id, Instant::now() + timeout, CancellationToken::new())
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race `fut` against the scope's deadline and cancellation.
    ///
    /// A scope that is already cancelled fails without polling `fut`.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackendError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(BackendError::Timeout {
                operation: operation.to_string(),
            }),
            result = fut => result,
        }
    }

    /// [`CallScope::run`] for gateway-side work such as single-flight waits.
    pub async fn within<T, F>(&self, operation: &str, fut: F) -> ApiResult<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ApiError::cancelled());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApiError::cancelled()),
            _ = tokio::time::sleep_until(self.deadline) => Err(ApiError::timeout(operation)),
            result = fut => result,
        }
    }
}

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Everything the pipeline knows about one HTTP transaction.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: String,
    principal: Principal,
    tenant: TenantKey,
    resource: Option<ResourceDescriptor>,
    app_id: Option<String>,
    deadline: Instant,
    cancel: CancellationToken,
    // Cancels `cancel` when the last clone of the context is dropped.
    _cancel_on_drop: Arc<DropGuard>,
    headers: HeaderMap,
    query: HashMap<String, String>,
}

impl RequestContext {
    /// Build a context rooted at `scope`'s token and deadline.
    pub fn from_scope(scope: CallScope, principal: Principal, tenant: TenantKey) -> Self {
        let guard = scope.cancel.clone().drop_guard();
        Self {
            correlation_id: scope.correlation_id,
            principal,
            tenant,
            resource: None,
            app_id: None,
            deadline: scope.deadline,
            cancel: scope.cancel,
            _cancel_on_drop: Arc::new(guard),
            headers: HeaderMap::new(),
            query: HashMap::new(),
        }
    }

    /// A fresh context with its own token and a deadline `timeout` from now.
    pub fn new(
        correlation_id: impl Into<String>,
        principal: Principal,
        tenant: TenantKey,
        timeout: Duration,
    ) -> Self {
        Self::from_scope(CallScope::detached(correlation_id, timeout), principal, tenant)
    }

    pub fn with_resource(mut self, resource: ResourceDescriptor) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Attach a read-only copy of the request's headers and query string.
    pub fn with_request_view(mut self, headers: HeaderMap, query: HashMap<String, String>) -> Self {
        self.headers = headers;
        self.query = query;
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn tenant(&self) -> TenantKey {
        self.tenant
    }

    pub fn resource(&self) -> Option<&ResourceDescriptor> {
        self.resource.as_ref()
    }

    /// The resolved backend resource, or an error if resolution skipped it.
    pub fn require_resource(&self) -> ApiResult<&ResourceDescriptor> {
        self.resource
            .as_ref()
            .ok_or_else(|| ApiError::internal_error("Request context has no resolved resource"))
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Abort everything running under this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Scope for a downstream call. Cancelling the context cancels it.
    pub fn scope(&self) -> CallScope {
        CallScope::new(self.correlation_id.clone(), self.deadline, self.cancel.child_token())
    }

    /// Scope for work that must outlive the request, such as
    /// fire-and-forget hooks. Shares only the correlation id.
    pub fn detached_scope(&self, timeout: Duration) -> CallScope {
        CallScope::detached(self.correlation_id.clone(), timeout)
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Takes the [`RequestContext`] out of the request extensions.
///
/// The context is removed, not cloned, so the handler is its only owner.
#[derive(Debug)]
pub struct Ctx(pub RequestContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .remove::<RequestContext>()
            .map(Ctx)
            .ok_or_else(|| {
                ApiError::internal_error(
                    "RequestContext not found in request extensions. \
                     Ensure tenant_middleware is applied to this route.",
                )
            })
    }
}

impl std::ops::Deref for Ctx {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
