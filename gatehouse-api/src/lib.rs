//! Gatehouse API - multi-tenant request-dispatch gateway
//!
//! Every protected request passes the same pipeline: credentials and tenant
//! are resolved (with cached api-key bindings and resource descriptors), the
//! call is routed to the object-builder deployment of the tenant's engine
//! class, reads are served through a coalescing response cache, and writes
//! run the table's registered hooks around the backend call.

pub mod backends;
pub mod config;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod macros;
pub mod middleware;
pub mod openapi;
pub mod pipeline;
pub mod response_cache;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod tenant;

// Re-export commonly used types
pub use config::{ApiConfig, BackendConfig};
pub use context::{CallScope, Ctx, RequestContext};
pub use dispatch::{Operation, VariantDispatcher};
pub use error::{ApiError, ApiResult, Envelope, ErrorCode};
pub use hooks::HookOrchestrator;
pub use openapi::ApiDoc;
pub use pipeline::Pipeline;
pub use response_cache::ResponseCache;
pub use routes::create_api_router;
pub use state::{AppState, Services};
pub use tenant::TenantResolver;
