//! REST API Routes Module
//!
//! - Object, table, menu, field and relation routes under `/v1` (tenant
//!   resolution required)
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics and the OpenAPI document

pub mod entity;
pub mod field;
pub mod health;
pub mod menu;
pub mod object;
pub mod relation;
pub mod table;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use gatehouse_core::ServiceClass;
use tower::limit::GlobalConcurrencyLimitLayer;
use utoipa::OpenApi;

use crate::config::{is_production_environment, ApiConfig};
use crate::error::ApiResult;
use crate::middleware::{
    build_cors_layer, rate_limit_middleware, tenant_middleware, tenant_rate_limit_middleware, RateLimitState,
    TenantState,
};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use field::create_router as field_router;
pub use health::create_router as health_router;
pub use menu::create_router as menu_router;
pub use object::create_router as object_router;
pub use relation::create_router as relation_router;
pub use table::create_router as table_router;

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// ROUTER BUILDER
// ============================================================================

/// Builds the gateway router with its full middleware stack.
///
/// # Middleware Order (outer to inner)
/// 1. CORS - handles preflight requests
/// 2. Concurrency limit - bounds requests in flight across all routes
/// 3. Observability - correlation id, span, metrics
/// 4. Rate limiting by client address - rejects floods before any backend call
/// 5. Tenant resolution (only on /v1/*) - credentials, tenant, resource
/// 6. Rate limiting by tenant (only on /v1/*)
pub struct GatewayRouterBuilder {
    state: AppState,
    tenant_state: TenantState,
    rate_limit_state: RateLimitState,
}

impl GatewayRouterBuilder {
    /// In production environments, rejects configuration that is unsafe to
    /// serve with.
    pub fn new(state: AppState) -> ApiResult<Self> {
        if is_production_environment() {
            state.config.validate_for_production()?;
        }

        let tenant_state = TenantState::new(
            state.resolver.clone(),
            ServiceClass::ObjectBuilder,
            state.config.request_timeout,
        );
        let rate_limit_state = state.rate_limit.clone();

        Ok(Self {
            state,
            tenant_state,
            rate_limit_state,
        })
    }

    fn protected_routes(&self) -> Router<AppState> {
        Router::new()
            .merge(object::create_router())
            .merge(table::create_router())
            .merge(menu::create_router())
            .merge(field::create_router())
            .merge(relation::create_router())
            .layer(from_fn_with_state(self.rate_limit_state.clone(), tenant_rate_limit_middleware))
            .layer(from_fn_with_state(self.tenant_state.clone(), tenant_middleware))
    }

    pub fn build(self) -> Router {
        let config: &ApiConfig = &self.state.config;
        let cors = build_cors_layer(config);
        let concurrency = GlobalConcurrencyLimitLayer::new(config.max_in_flight.max(1));

        Router::new()
            .nest("/v1", self.protected_routes())
            .nest("/health", health::create_router())
            .route("/metrics", get(metrics_handler))
            .route("/openapi.json", get(openapi_json))
            .layer(from_fn_with_state(self.rate_limit_state, rate_limit_middleware))
            .layer(from_fn(observability_middleware))
            .layer(concurrency)
            .layer(cors)
            .with_state(self.state)
    }
}

/// Create the complete gateway router.
pub fn create_api_router(state: AppState) -> ApiResult<Router> {
    GatewayRouterBuilder::new(state).map(GatewayRouterBuilder::build)
}
