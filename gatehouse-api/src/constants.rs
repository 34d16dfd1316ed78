//! Constants for the Gatehouse API
//!
//! Default values and header names used throughout the gateway.

// ============================================================================
// HEADERS
// ============================================================================

/// Carries the app id in api-key mode.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authorization scheme marking api-key mode.
pub const API_KEY_SCHEME: &str = "API-KEY";

pub const PROJECT_ID_HEADER: &str = "project-id";
pub const ENVIRONMENT_ID_HEADER: &str = "environment-id";
pub const RESOURCE_ID_HEADER: &str = "resource-id";

/// Correlation id, read from the client and forwarded to every backend.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// RATE LIMITING AND CONCURRENCY
// ============================================================================

pub const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 100;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 200;
pub const DEFAULT_TENANT_RATE_LIMIT_PER_SECOND: u32 = 100;
pub const DEFAULT_TENANT_RATE_LIMIT_BURST: u32 = 200;

/// Limiters idle for five minutes are dropped
pub const DEFAULT_RATE_LIMIT_IDLE_SECS: u64 = 300;

/// Requests processed at once across the gateway
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// Per-request deadline (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// CACHING
// ============================================================================

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_SINGLE_FLIGHT_WAIT_MS: u64 = 5_000;

/// Api-key bindings live for ten minutes
pub const DEFAULT_APIKEY_TTL_SECS: u64 = 600;

/// Resource descriptors live for ten minutes
pub const DEFAULT_RESOURCE_TTL_SECS: u64 = 600;

/// Hot reads live for fifteen seconds
pub const DEFAULT_RESPONSE_TTL_SECS: u64 = 15;

// ============================================================================
// BACKEND POOLS
// ============================================================================

pub const DEFAULT_POOL_MAX_SIZE: usize = 32;
pub const DEFAULT_POOL_WAIT_MS: u64 = 2_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

// ============================================================================
// SERVER
// ============================================================================

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
