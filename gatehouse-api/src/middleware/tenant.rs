//! Tenant middleware
//!
//! Resolves the caller and tenant before any protected handler runs and
//! inserts the resulting [`RequestContext`] into the request extensions.
//! Failures end the request here with the resolver's error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use gatehouse_core::{new_correlation_id, ServiceClass};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::CallScope;
use crate::error::ApiError;
use crate::telemetry::CorrelationId;
use crate::tenant::{ResolveRequest, TenantResolver};

#[derive(Debug, Clone)]
pub struct TenantState {
    pub resolver: Arc<TenantResolver>,
    /// Service class whose resource the protected routes need.
    pub service_class: ServiceClass,
    /// Deadline given to each request context.
    pub request_timeout: Duration,
}

impl TenantState {
    pub fn new(resolver: Arc<TenantResolver>, service_class: ServiceClass, request_timeout: Duration) -> Self {
        Self {
            resolver,
            service_class,
            request_timeout,
        }
    }
}

pub async fn tenant_middleware(
    State(state): State<TenantState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|c| c.0.clone())
        .unwrap_or_else(new_correlation_id);

    let query: HashMap<String, String> = Query::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let scope = CallScope::new(
        correlation_id,
        Instant::now() + state.request_timeout,
        CancellationToken::new(),
    );
    let view = ResolveRequest {
        method: request.method(),
        path: request.uri().path(),
        headers: request.headers(),
        query: &query,
    };

    let context = match state.resolver.resolve(view, state.service_class, scope).await {
        Ok(context) => context,
        Err(err) => {
            tracing::info!(
                path = %request.uri().path(),
                code = %err.code,
                error = %err.message,
                "Tenant resolution failed"
            );
            return Err(err);
        }
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
