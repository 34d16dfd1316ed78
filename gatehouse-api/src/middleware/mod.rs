//! Middleware modules for the Gatehouse API
//!
//! - `tenant`: credential and tenant resolution, inserts the request context
//! - `rate_limit`: per client address quota, then per tenant once resolved
//! - `cors`: CORS layer built from configuration
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .nest("/v1", protected)          // tenant_middleware, then tenant_rate_limit_middleware
//!     .layer(rate_limit_middleware)
//!     .layer(observability_middleware)
//!     .layer(GlobalConcurrencyLimitLayer)
//!     .layer(cors)                     // outermost
//! ```

mod cors;
mod rate_limit;
mod tenant;

pub use cors::build_cors_layer;
pub use rate_limit::{
    rate_limit_middleware, tenant_rate_limit_middleware, RateLimitError, RateLimitKey, RateLimitState,
};
pub use tenant::{tenant_middleware, TenantState};
