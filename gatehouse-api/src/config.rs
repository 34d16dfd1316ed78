//! API Configuration Module
//!
//! Configuration for CORS, rate limiting, request deadlines, the caches, and
//! backend pools. Everything is loaded from `GATEHOUSE_*` environment
//! variables with defaults suitable for development.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use gatehouse_cache::CacheConfig;
use gatehouse_core::EngineClass;

use crate::backends::Upstream;
use crate::constants::*;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Rate Limiting and Concurrency
    // ========================================================================
    pub rate_limit_enabled: bool,

    /// Sustained requests per second per client address, before credentials
    /// are checked.
    pub rate_limit_per_second: u32,

    /// Burst capacity above the steady per-address rate.
    pub rate_limit_burst: u32,

    /// Sustained requests per second per resolved tenant.
    pub rate_limit_tenant_per_second: u32,

    pub rate_limit_tenant_burst: u32,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe behind a proxy that overwrites those headers.
    pub rate_limit_trust_forwarded: bool,

    /// Limiters untouched for this long are dropped by the janitor.
    pub rate_limit_idle: Duration,

    /// Maximum requests processed at once across the whole gateway.
    pub max_in_flight: usize,

    /// Deadline given to every request context.
    pub request_timeout: Duration,

    // ========================================================================
    // Caching
    // ========================================================================
    /// Capacity of each in-memory cache.
    pub cache_capacity: usize,

    /// How long a caller waits on another caller's fill.
    pub single_flight_wait: Duration,

    /// TTL of cached api-key bindings.
    pub apikey_ttl: Duration,

    /// TTL of cached resource descriptors.
    pub resource_ttl: Duration,

    /// TTL of cached read responses.
    pub response_ttl: Duration,

    /// Purge cached reads for a table when it is written.
    pub invalidate_on_write: bool,

    /// Cache hook listings alongside read responses.
    pub cache_hooks: bool,

    // ========================================================================
    // Backends
    // ========================================================================
    pub backends: BackendConfig,
}

/// Where the backends live and how many connections each pool may hold.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub urls: HashMap<Upstream, String>,
    /// Base URL of a dedicated object-builder node, with `{engine}` and
    /// `{resource_id}` filled in per resource. Unset routes every resource to
    /// the shared node.
    pub dedicated_node_url: Option<String>,
    pub pool_max_size: usize,
    pub pool_wait: Duration,
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            urls: Upstream::ALL
                .into_iter()
                .map(|upstream| (upstream, upstream.default_url()))
                .collect(),
            dedicated_node_url: None,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            pool_wait: Duration::from_millis(DEFAULT_POOL_WAIT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        let urls = Upstream::ALL
            .into_iter()
            .map(|upstream| {
                let url = std::env::var(upstream.env_var())
                    .ok()
                    .map(|s| s.trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| upstream.default_url());
                (upstream, url)
            })
            .collect();

        Self {
            urls,
            dedicated_node_url: std::env::var("GATEHOUSE_DEDICATED_NODE_URL")
                .ok()
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty()),
            pool_max_size: env_parse("GATEHOUSE_POOL_MAX_SIZE", DEFAULT_POOL_MAX_SIZE),
            pool_wait: Duration::from_millis(env_parse("GATEHOUSE_POOL_WAIT_MS", DEFAULT_POOL_WAIT_MS)),
            connect_timeout: Duration::from_millis(env_parse(
                "GATEHOUSE_BACKEND_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )),
        }
    }

    pub fn url(&self, upstream: Upstream) -> String {
        self.urls
            .get(&upstream)
            .cloned()
            .unwrap_or_else(|| upstream.default_url())
    }

    /// The dedicated node serving `resource_id` on `engine`, if configured.
    pub fn dedicated_url(&self, engine: EngineClass, resource_id: &str) -> Option<String> {
        self.dedicated_node_url.as_ref().map(|template| {
            template
                .replace("{engine}", &engine.as_str().to_lowercase())
                .replace("{resource_id}", resource_id)
        })
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,

            rate_limit_enabled: true,
            rate_limit_per_second: DEFAULT_RATE_LIMIT_PER_SECOND,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_tenant_per_second: DEFAULT_TENANT_RATE_LIMIT_PER_SECOND,
            rate_limit_tenant_burst: DEFAULT_TENANT_RATE_LIMIT_BURST,
            rate_limit_trust_forwarded: false,
            rate_limit_idle: Duration::from_secs(DEFAULT_RATE_LIMIT_IDLE_SECS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),

            cache_capacity: DEFAULT_CACHE_CAPACITY,
            single_flight_wait: Duration::from_millis(DEFAULT_SINGLE_FLIGHT_WAIT_MS),
            apikey_ttl: Duration::from_secs(DEFAULT_APIKEY_TTL_SECS),
            resource_ttl: Duration::from_secs(DEFAULT_RESOURCE_TTL_SECS),
            response_ttl: Duration::from_secs(DEFAULT_RESPONSE_TTL_SECS),
            invalidate_on_write: true,
            cache_hooks: true,

            backends: BackendConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GATEHOUSE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `GATEHOUSE_CORS_ALLOW_CREDENTIALS`, `GATEHOUSE_CORS_MAX_AGE_SECS`
    /// - `GATEHOUSE_RATE_LIMIT_ENABLED`, `GATEHOUSE_RATE_LIMIT_PER_SECOND`,
    ///   `GATEHOUSE_RATE_LIMIT_BURST`, `GATEHOUSE_TENANT_RATE_LIMIT_PER_SECOND`,
    ///   `GATEHOUSE_TENANT_RATE_LIMIT_BURST`, `GATEHOUSE_RATE_LIMIT_TRUST_FORWARDED`,
    ///   `GATEHOUSE_RATE_LIMIT_IDLE_SECS`
    /// - `GATEHOUSE_MAX_IN_FLIGHT`, `GATEHOUSE_REQUEST_TIMEOUT_MS`
    /// - `GATEHOUSE_CACHE_CAPACITY`, `GATEHOUSE_SINGLE_FLIGHT_WAIT_MS`
    /// - `GATEHOUSE_APIKEY_TTL_SECS`, `GATEHOUSE_RESOURCE_TTL_SECS`, `GATEHOUSE_RESPONSE_TTL_SECS`
    /// - `GATEHOUSE_INVALIDATE_ON_WRITE`, `GATEHOUSE_CACHE_HOOKS`
    /// - `GATEHOUSE_<UPSTREAM>_URL`, `GATEHOUSE_POOL_MAX_SIZE`, `GATEHOUSE_POOL_WAIT_MS`,
    ///   `GATEHOUSE_BACKEND_CONNECT_TIMEOUT_MS`, `GATEHOUSE_DEDICATED_NODE_URL`
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("GATEHOUSE_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            cors_origins,
            cors_allow_credentials: env_bool("GATEHOUSE_CORS_ALLOW_CREDENTIALS", false),
            cors_max_age_secs: env_parse("GATEHOUSE_CORS_MAX_AGE_SECS", DEFAULT_CORS_MAX_AGE_SECS),

            rate_limit_enabled: env_bool("GATEHOUSE_RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse(
                "GATEHOUSE_RATE_LIMIT_PER_SECOND",
                DEFAULT_RATE_LIMIT_PER_SECOND,
            ),
            rate_limit_burst: env_parse("GATEHOUSE_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST),
            rate_limit_tenant_per_second: env_parse(
                "GATEHOUSE_TENANT_RATE_LIMIT_PER_SECOND",
                DEFAULT_TENANT_RATE_LIMIT_PER_SECOND,
            ),
            rate_limit_tenant_burst: env_parse(
                "GATEHOUSE_TENANT_RATE_LIMIT_BURST",
                DEFAULT_TENANT_RATE_LIMIT_BURST,
            ),
            rate_limit_trust_forwarded: env_bool("GATEHOUSE_RATE_LIMIT_TRUST_FORWARDED", false),
            rate_limit_idle: Duration::from_secs(env_parse(
                "GATEHOUSE_RATE_LIMIT_IDLE_SECS",
                DEFAULT_RATE_LIMIT_IDLE_SECS,
            )),
            max_in_flight: env_parse("GATEHOUSE_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT),
            request_timeout: Duration::from_millis(env_parse(
                "GATEHOUSE_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )),

            cache_capacity: env_parse("GATEHOUSE_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
            single_flight_wait: Duration::from_millis(env_parse(
                "GATEHOUSE_SINGLE_FLIGHT_WAIT_MS",
                DEFAULT_SINGLE_FLIGHT_WAIT_MS,
            )),
            apikey_ttl: Duration::from_secs(env_parse("GATEHOUSE_APIKEY_TTL_SECS", DEFAULT_APIKEY_TTL_SECS)),
            resource_ttl: Duration::from_secs(env_parse(
                "GATEHOUSE_RESOURCE_TTL_SECS",
                DEFAULT_RESOURCE_TTL_SECS,
            )),
            response_ttl: Duration::from_secs(env_parse(
                "GATEHOUSE_RESPONSE_TTL_SECS",
                DEFAULT_RESPONSE_TTL_SECS,
            )),
            invalidate_on_write: env_bool("GATEHOUSE_INVALIDATE_ON_WRITE", true),
            cache_hooks: env_bool("GATEHOUSE_CACHE_HOOKS", true),

            backends: BackendConfig::from_env(),
        }
    }

    /// Settings for the in-memory caches.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_capacity(self.cache_capacity)
            .with_wait_bound(self.single_flight_wait)
    }

    /// Reject settings that are unsafe outside development.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        if self.cors_origins.is_empty() {
            return Err(ApiError::invalid_input(
                "CORS origins not configured for production. Set GATEHOUSE_CORS_ORIGINS.",
            ));
        }
        if self.apikey_ttl.is_zero() || self.resource_ttl.is_zero() || self.response_ttl.is_zero() {
            return Err(ApiError::invalid_input("Cache TTLs must be greater than zero"));
        }
        if self.max_in_flight == 0 {
            return Err(ApiError::invalid_input("GATEHOUSE_MAX_IN_FLIGHT must be at least 1"));
        }
        if !self.rate_limit_enabled {
            tracing::warn!(
                "Rate limiting is disabled in production. Set GATEHOUSE_RATE_LIMIT_ENABLED=true to enable it."
            );
        }
        Ok(())
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }
        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern)) || origin_domain == pattern;
                }
            }
            false
        })
    }
}

/// Whether `GATEHOUSE_ENVIRONMENT` names a production deployment.
pub fn is_production_environment() -> bool {
    std::env::var("GATEHOUSE_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}
