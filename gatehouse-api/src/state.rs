//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use gatehouse_core::EngineClass;

use crate::backends::{
    AuthService, BackendClients, CompanyService, FunctionService, HttpAuthService, HttpCompanyService,
    HttpFunctionService, HttpObjectBuilder, ObjectBuilderStub,
};
use crate::config::ApiConfig;
use crate::dispatch::VariantDispatcher;
use crate::error::ApiResult;
use crate::hooks::HookOrchestrator;
use crate::middleware::RateLimitState;
use crate::pipeline::Pipeline;
use crate::response_cache::ResponseCache;
use crate::tenant::TenantResolver;

/// The backend contracts the gateway is wired to.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn AuthService>,
    pub company: Arc<dyn CompanyService>,
    pub functions: Arc<dyn FunctionService>,
    pub object_builder_a: Arc<dyn ObjectBuilderStub>,
    pub object_builder_b: Arc<dyn ObjectBuilderStub>,
}

impl Services {
    /// HTTP clients over the pooled backends.
    pub fn http(backends: &BackendClients) -> ApiResult<Self> {
        Ok(Self {
            auth: Arc::new(HttpAuthService::new(backends)?),
            company: Arc::new(HttpCompanyService::new(backends)?),
            functions: Arc::new(HttpFunctionService::new(backends)?),
            object_builder_a: Arc::new(HttpObjectBuilder::new(backends, EngineClass::A)?),
            object_builder_b: Arc::new(HttpObjectBuilder::new(backends, EngineClass::B)?),
        })
    }
}

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub resolver: Arc<TenantResolver>,
    pub pipeline: Arc<Pipeline>,
    /// Pools behind the HTTP services, reported by readiness checks.
    pub backends: Arc<BackendClients>,
    /// Shared by the per-address and per-tenant limiters.
    pub rate_limit: RateLimitState,
    pub start_time: Instant,
}

impl AppState {
    /// Assemble the gateway over `services`.
    ///
    /// The resolver and the response cache each get their own cache of
    /// `config.cache_capacity` entries.
    pub fn new(config: ApiConfig, services: Services, backends: BackendClients) -> ApiResult<Self> {
        let resolver = TenantResolver::new(
            services.auth,
            services.company,
            config.cache_config(),
            config.apikey_ttl,
            config.resource_ttl,
        )?;
        let responses = ResponseCache::new(config.cache_config(), config.response_ttl)?;
        let dispatcher = VariantDispatcher::new(services.object_builder_a, services.object_builder_b);
        let hooks = HookOrchestrator::new(services.functions, config.request_timeout);
        let pipeline = Pipeline::new(dispatcher, responses, hooks, &config);
        let rate_limit = RateLimitState::new(&config);

        Ok(Self {
            config: Arc::new(config),
            resolver: Arc::new(resolver),
            pipeline: Arc::new(pipeline),
            backends: Arc::new(backends),
            rate_limit,
            start_time: Instant::now(),
        })
    }

    /// Build pools and HTTP services from configuration.
    pub fn connect(config: ApiConfig) -> ApiResult<Self> {
        let backends = BackendClients::new(&config.backends)?;
        let services = Services::http(&backends)?;
        Self::new(config, services, backends)
    }

    /// Drop expired entries from both caches and limiters gone idle.
    pub fn purge_expired(&self) -> usize {
        self.resolver.purge_expired()
            + self.pipeline.response_cache().purge_expired()
            + self.rate_limit.purge_idle()
    }
}

crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(Arc<TenantResolver>, resolver);
crate::impl_from_ref!(Arc<Pipeline>, pipeline);
crate::impl_from_ref!(Arc<BackendClients>, backends);
