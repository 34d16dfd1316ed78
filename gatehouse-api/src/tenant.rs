//! Tenant Resolution
//!
//! Turns request credentials into a caller, a tenant and the backend
//! resource serving that tenant. Two credential modes are accepted and they
//! are exclusive:
//!
//! - `Authorization: API-KEY` (or no authorization) with `X-API-KEY: <app-id>`.
//!   The api-key binding names the tenant authoritatively; bindings and
//!   resources are cached with single-flight fills.
//! - `Authorization: Bearer <token>`. The auth service's has-access check
//!   returns the caller and may override the requested tenant ids.
//!
//! Resolution fails closed: any error here ends the request before a
//! handler runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header::AUTHORIZATION, HeaderMap, Method};
use bytes::Bytes;
use gatehouse_cache::{CacheConfig, CacheStats, ExpiringLru, Fill};
use gatehouse_core::{ApiKeyBinding, Principal, ResourceDescriptor, ServiceClass, TenantKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::backends::{AccessCheck, AuthService, BackendCode, BackendError, CompanyService, ResourceLookup};
use crate::constants::{
    API_KEY_HEADER, API_KEY_SCHEME, ENVIRONMENT_ID_HEADER, PROJECT_ID_HEADER, RESOURCE_ID_HEADER,
};
use crate::context::{CallScope, RequestContext};
use crate::error::{ApiError, ApiResult};
use crate::telemetry::with_metrics;

// ============================================================================
// CREDENTIALS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey { app_id: String },
    Bearer { token: String },
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// Work out which credential mode the request uses.
pub fn parse_credentials(headers: &HeaderMap) -> ApiResult<Credentials> {
    let authorization = header_str(headers, AUTHORIZATION.as_str()).filter(|v| !v.is_empty());
    let api_key = header_str(headers, API_KEY_HEADER);

    match authorization {
        Some(value) if value.eq_ignore_ascii_case(API_KEY_SCHEME) => api_key_credentials(api_key),
        Some(value) => {
            let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
            if !scheme.eq_ignore_ascii_case("bearer") {
                return Err(ApiError::invalid_format(
                    "authorization",
                    "'Bearer <token>' or 'API-KEY'",
                ));
            }
            if api_key.is_some() {
                return Err(ApiError::invalid_format(
                    "authorization",
                    "a bearer token or an api key, not both",
                ));
            }
            let token = token.trim();
            if token.is_empty() {
                return Err(ApiError::invalid_format("authorization", "a non-empty bearer token"));
            }
            Ok(Credentials::Bearer {
                token: token.to_string(),
            })
        }
        None if api_key.is_some() => api_key_credentials(api_key),
        None => Err(ApiError::unauthorized(
            "Authentication required: provide Authorization: Bearer or X-API-KEY",
        )),
    }
}

fn api_key_credentials(api_key: Option<&str>) -> ApiResult<Credentials> {
    match api_key.filter(|k| !k.is_empty()) {
        Some(app_id) => Ok(Credentials::ApiKey {
            app_id: app_id.to_string(),
        }),
        None => Err(ApiError::unauthorized("X-API-KEY header is required")),
    }
}

// ============================================================================
// REQUEST VIEW
// ============================================================================

/// The parts of an HTTP request the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub query: &'a HashMap<String, String>,
}

impl<'a> ResolveRequest<'a> {
    /// A header value, falling back to the query parameter of the same name
    /// (dashed or underscored).
    fn hint(&self, name: &str) -> Option<&'a str> {
        header_str(self.headers, name)
            .or_else(|| self.query.get(name).map(String::as_str))
            .or_else(|| self.query.get(&name.replace('-', "_")).map(String::as_str))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn resource_id(&self) -> Option<String> {
        self.hint(RESOURCE_ID_HEADER).map(str::to_string)
    }
}

fn parse_hint(field: &str, raw: Option<&str>) -> ApiResult<Option<Uuid>> {
    raw.map(|value| Uuid::parse_str(value).map_err(|_| ApiError::invalid_format(field, "a UUID")))
        .transpose()
}

// ============================================================================
// RESOLVER
// ============================================================================

#[derive(Clone)]
pub struct TenantResolver {
    auth: Arc<dyn AuthService>,
    company: Arc<dyn CompanyService>,
    cache: ExpiringLru<ApiError>,
    apikey_ttl: Duration,
    resource_ttl: Duration,
}

impl std::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantResolver")
            .field("cache", &self.cache)
            .field("apikey_ttl", &self.apikey_ttl)
            .field("resource_ttl", &self.resource_ttl)
            .finish_non_exhaustive()
    }
}

impl TenantResolver {
    pub fn new(
        auth: Arc<dyn AuthService>,
        company: Arc<dyn CompanyService>,
        cache: CacheConfig,
        apikey_ttl: Duration,
        resource_ttl: Duration,
    ) -> ApiResult<Self> {
        Ok(Self {
            auth,
            company,
            cache: ExpiringLru::new(cache)?,
            apikey_ttl,
            resource_ttl,
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Drop the cached binding for `app_id`, e.g. after the key is revoked.
    pub fn forget_api_key(&self, app_id: &str) -> bool {
        self.cache.remove(&format!("apikey:{}", app_id))
    }

    /// Resolve the request into a context rooted at `scope`.
    pub async fn resolve(
        &self,
        request: ResolveRequest<'_>,
        service_class: ServiceClass,
        scope: CallScope,
    ) -> ApiResult<RequestContext> {
        let context = match parse_credentials(request.headers)? {
            Credentials::ApiKey { app_id } => {
                let (principal, tenant, resource) = self
                    .resolve_api_key(&app_id, request, service_class, &scope)
                    .await?;
                RequestContext::from_scope(scope, principal, tenant)
                    .with_resource(resource)
                    .with_app_id(app_id)
            }
            Credentials::Bearer { token } => {
                let (principal, tenant, resource) = self
                    .resolve_bearer(&token, request, service_class, &scope)
                    .await?;
                RequestContext::from_scope(scope, principal, tenant).with_resource(resource)
            }
        };

        tracing::debug!(
            correlation_id = %context.correlation_id(),
            tenant = %context.tenant(),
            auth_mode = ?context.principal().auth_mode(),
            "Tenant resolved"
        );
        Ok(context.with_request_view(request.headers.clone(), request.query.clone()))
    }

    async fn resolve_api_key(
        &self,
        app_id: &str,
        request: ResolveRequest<'_>,
        service_class: ServiceClass,
        scope: &CallScope,
    ) -> ApiResult<(Principal, TenantKey, ResourceDescriptor)> {
        let binding: ApiKeyBinding = self
            .cached(
                "apikey",
                &format!("apikey:{}", app_id),
                self.apikey_ttl,
                scope,
                || async move {
                    self.auth
                        .api_key_binding(app_id, scope)
                        .await
                        .map_err(credential_error)
                },
            )
            .await?;

        let tenant = binding.tenant_key()?;
        check_hint(PROJECT_ID_HEADER, request.hint(PROJECT_ID_HEADER), tenant.project_id)?;
        check_hint(ENVIRONMENT_ID_HEADER, request.hint(ENVIRONMENT_ID_HEADER), tenant.environment_id)?;

        let resource_id = request.resource_id();
        let mut key = format!("resource:{}:{}", app_id, service_class);
        if let Some(rid) = &resource_id {
            key = format!("{}:{}", key, rid);
        }
        let resource = self
            .resource(&key, tenant, service_class, resource_id, scope)
            .await?;

        Ok((
            Principal::api_key(binding.role_id, binding.client_type_id),
            tenant,
            resource,
        ))
    }

    async fn resolve_bearer(
        &self,
        token: &str,
        request: ResolveRequest<'_>,
        service_class: ServiceClass,
        scope: &CallScope,
    ) -> ApiResult<(Principal, TenantKey, ResourceDescriptor)> {
        let requested_project = parse_hint(PROJECT_ID_HEADER, request.hint(PROJECT_ID_HEADER))?;
        let requested_environment = parse_hint(ENVIRONMENT_ID_HEADER, request.hint(ENVIRONMENT_ID_HEADER))?;

        let check = AccessCheck {
            token: token.to_string(),
            method: request.method.as_str().to_string(),
            path: request.path.to_string(),
            project_id: requested_project.map(|id| id.to_string()),
            environment_id: requested_environment.map(|id| id.to_string()),
        };
        let grant = self.auth.has_access(&check, scope).await?;

        let project_id = grant.project_id.or(requested_project).map(|id| id.to_string());
        let environment_id = grant
            .environment_id
            .or(requested_environment)
            .map(|id| id.to_string());
        let tenant = TenantKey::from_parts(project_id.as_deref(), environment_id.as_deref())?;

        let resource_id = request.resource_id();
        let mut key = format!(
            "resource:{}:{}:{}",
            tenant.project_id, tenant.environment_id, service_class
        );
        if let Some(rid) = &resource_id {
            key = format!("{}:{}", key, rid);
        }
        let resource = self
            .resource(&key, tenant, service_class, resource_id, scope)
            .await?;

        Ok((grant.principal(), tenant, resource))
    }

    async fn resource(
        &self,
        key: &str,
        tenant: TenantKey,
        service_class: ServiceClass,
        resource_id: Option<String>,
        scope: &CallScope,
    ) -> ApiResult<ResourceDescriptor> {
        let lookup = ResourceLookup::new(tenant, service_class).with_resource_id(resource_id);
        self.cached("resource", key, self.resource_ttl, scope, || async move {
            match self.company.get_single_resource(&lookup, scope).await {
                Ok(resource) => Ok(resource),
                Err(BackendError::Rejected {
                    code: BackendCode::NotFound,
                    ..
                }) => Err(ApiError::resource_not_found(service_class, tenant)),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    /// Single-flight read of a JSON value through the resolver cache.
    async fn cached<T, F, Fut>(
        &self,
        cache_name: &'static str,
        key: &str,
        ttl: Duration,
        scope: &CallScope,
        fetch: F,
    ) -> ApiResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let lookup = scope
            .within(cache_name, self.cache.get_or_compute(key, ttl, || async move {
                let value = fetch().await?;
                let bytes = serde_json::to_vec(&value).map_err(|e| {
                    ApiError::internal_error(format!("Failed to encode {}: {}", cache_name, e))
                })?;
                Ok(Fill::store(Bytes::from(bytes)))
            }))
            .await?;
        with_metrics(|m| m.record_cache_lookup(cache_name, lookup.source.as_str()));

        serde_json::from_slice(&lookup.value).map_err(|e| {
            tracing::error!(cache = cache_name, key, error = %e, "Undecodable cache entry");
            ApiError::internal_error(format!("Corrupt cached {}", cache_name))
        })
    }
}

/// The binding lookup reports unknown or revoked keys as rejections.
fn credential_error(err: BackendError) -> ApiError {
    match err.backend_code() {
        Some(BackendCode::NotFound | BackendCode::Unauthenticated | BackendCode::PermissionDenied) => {
            ApiError::invalid_token("Invalid API key")
        }
        _ => err.into(),
    }
}

fn check_hint(field: &str, raw: Option<&str>, bound: Uuid) -> ApiResult<()> {
    match parse_hint(field, raw)? {
        Some(requested) if requested != bound => Err(ApiError::tenant_mismatch(format!(
            "{} does not match the api key's tenant",
            field
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AccessGrant, BackendResult};
    use crate::error::ErrorCode;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use gatehouse_core::{AuthMode, EngineClass};
    use gatehouse_test_utils::fixtures::{
        api_key_binding, api_key_binding_without_project, object_builder_resource, test_tenant,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeAuth {
        bindings: Mutex<HashMap<String, ApiKeyBinding>>,
        grant: Mutex<Option<AccessGrant>>,
        binding_calls: AtomicUsize,
        access_calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn has_access(&self, _check: &AccessCheck, _scope: &CallScope) -> BackendResult<AccessGrant> {
            self.access_calls.fetch_add(1, Ordering::SeqCst);
            self.grant
                .lock()
                .clone()
                .ok_or_else(|| BackendError::rejected(BackendCode::Unauthenticated, "token expired"))
        }

        async fn api_key_binding(&self, app_id: &str, _scope: &CallScope) -> BackendResult<ApiKeyBinding> {
            self.binding_calls.fetch_add(1, Ordering::SeqCst);
            self.bindings
                .lock()
                .get(app_id)
                .cloned()
                .ok_or_else(|| BackendError::rejected(BackendCode::NotFound, "no such app"))
        }
    }

    #[derive(Default)]
    struct FakeCompany {
        resource: Mutex<Option<ResourceDescriptor>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompanyService for FakeCompany {
        async fn get_single_resource(
            &self,
            _lookup: &ResourceLookup,
            _scope: &CallScope,
        ) -> BackendResult<ResourceDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.resource
                .lock()
                .clone()
                .ok_or_else(|| BackendError::rejected(BackendCode::NotFound, "no resource"))
        }
    }

    struct Harness {
        auth: Arc<FakeAuth>,
        company: Arc<FakeCompany>,
        resolver: TenantResolver,
    }

    fn harness() -> Result<Harness, String> {
        let auth = Arc::new(FakeAuth::default());
        let company = Arc::new(FakeCompany::default());
        *company.resource.lock() = Some(object_builder_resource(EngineClass::A));
        let resolver = TenantResolver::new(
            auth.clone(),
            company.clone(),
            CacheConfig::new().with_capacity(128),
            Duration::from_secs(600),
            Duration::from_secs(600),
        )
        .map_err(|e| e.message)?;
        Ok(Harness {
            auth,
            company,
            resolver,
        })
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.insert(*name, value);
            }
        }
        map
    }

    async fn resolve(h: &Harness, headers: &HeaderMap) -> ApiResult<RequestContext> {
        let query = HashMap::new();
        let request = ResolveRequest {
            method: &Method::GET,
            path: "/v1/object/orders",
            headers,
            query: &query,
        };
        h.resolver
            .resolve(
                request,
                ServiceClass::ObjectBuilder,
                CallScope::detached("corr-tenant", Duration::from_secs(5)),
            )
            .await
    }

    #[test]
    fn test_parse_credentials_modes() {
        assert_eq!(
            parse_credentials(&headers(&[("x-api-key", "app-1")])).ok(),
            Some(Credentials::ApiKey { app_id: "app-1".into() })
        );
        assert_eq!(
            parse_credentials(&headers(&[("authorization", "API-KEY"), ("x-api-key", "app-1")])).ok(),
            Some(Credentials::ApiKey { app_id: "app-1".into() })
        );
        assert_eq!(
            parse_credentials(&headers(&[("authorization", "Bearer tok")])).ok(),
            Some(Credentials::Bearer { token: "tok".into() })
        );
    }

    #[test]
    fn test_parse_credentials_rejections() {
        let code = |h: HeaderMap| parse_credentials(&h).err().map(|e| e.code);
        assert_eq!(code(headers(&[])), Some(ErrorCode::Unauthorized));
        assert_eq!(code(headers(&[("x-api-key", "")])), Some(ErrorCode::Unauthorized));
        assert_eq!(code(headers(&[("authorization", "API-KEY")])), Some(ErrorCode::Unauthorized));
        assert_eq!(code(headers(&[("authorization", "Basic abc")])), Some(ErrorCode::InvalidFormat));
        assert_eq!(code(headers(&[("authorization", "Bearer")])), Some(ErrorCode::InvalidFormat));
        assert_eq!(
            code(headers(&[("authorization", "Bearer tok"), ("x-api-key", "app-1")])),
            Some(ErrorCode::InvalidFormat)
        );
    }

    #[tokio::test]
    async fn test_api_key_resolution_is_cached() -> Result<(), String> {
        let h = harness()?;
        let tenant = test_tenant();
        h.auth
            .bindings
            .lock()
            .insert("app-1".into(), api_key_binding("app-1", tenant));

        let headers = headers(&[("x-api-key", "app-1")]);
        for _ in 0..3 {
            let ctx = resolve(&h, &headers).await.map_err(|e| e.message)?;
            assert_eq!(ctx.tenant(), tenant);
            assert_eq!(ctx.app_id(), Some("app-1"));
            assert_eq!(ctx.principal().auth_mode(), AuthMode::ApiKey);
            assert_eq!(ctx.resource().map(|r| r.engine_class), Some(EngineClass::A));
        }
        assert_eq!(h.auth.binding_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.company.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_binding_without_project_is_rejected() -> Result<(), String> {
        let h = harness()?;
        h.auth
            .bindings
            .lock()
            .insert("app-2".into(), api_key_binding_without_project("app-2"));

        let err = resolve(&h, &headers(&[("x-api-key", "app-2")])).await.err();
        let err = err.ok_or("expected an error")?;
        assert_eq!(err.code, ErrorCode::MissingField);
        assert_eq!(err.message, "project_id is missing");
        assert_eq!(h.company.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_api_key_is_invalid_token() -> Result<(), String> {
        let h = harness()?;
        let err = resolve(&h, &headers(&[("x-api-key", "ghost")])).await.err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::InvalidToken));
        Ok(())
    }

    #[tokio::test]
    async fn test_conflicting_project_header_is_a_mismatch() -> Result<(), String> {
        let h = harness()?;
        let tenant = test_tenant();
        h.auth
            .bindings
            .lock()
            .insert("app-1".into(), api_key_binding("app-1", tenant));

        let other = Uuid::now_v7().to_string();
        let err = resolve(&h, &headers(&[("x-api-key", "app-1"), ("project-id", other.as_str())]))
            .await
            .err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::TenantMismatch));
        Ok(())
    }

    #[tokio::test]
    async fn test_bearer_grant_overrides_requested_tenant() -> Result<(), String> {
        let h = harness()?;
        let granted = test_tenant();
        *h.auth.grant.lock() = Some(AccessGrant {
            user_id: "user-1".into(),
            role_id: "role-1".into(),
            client_type_id: "client-1".into(),
            row_access: vec![],
            project_id: Some(granted.project_id),
            environment_id: Some(granted.environment_id),
        });

        let requested = test_tenant();
        let ctx = resolve(
            &h,
            &headers(&[
                ("authorization", "Bearer tok"),
                ("project-id", requested.project_id.to_string().as_str()),
                ("environment-id", requested.environment_id.to_string().as_str()),
            ]),
        )
        .await
        .map_err(|e| e.message)?;

        assert_eq!(ctx.tenant(), granted);
        assert_eq!(ctx.principal().user_id(), "user-1");
        assert_eq!(ctx.app_id(), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_bearer_without_environment_is_rejected() -> Result<(), String> {
        let h = harness()?;
        *h.auth.grant.lock() = Some(AccessGrant {
            user_id: "user-1".into(),
            role_id: "role-1".into(),
            client_type_id: "client-1".into(),
            row_access: vec![],
            project_id: Some(Uuid::now_v7()),
            environment_id: None,
        });

        let err = resolve(&h, &headers(&[("authorization", "Bearer tok")])).await.err();
        assert_eq!(err.map(|e| e.message), Some("environment_id is missing".to_string()));
        assert_eq!(h.company.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() -> Result<(), String> {
        let h = harness()?;
        let err = resolve(&h, &headers(&[("authorization", "Bearer stale")])).await.err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::InvalidToken));
        assert_eq!(h.auth.access_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_resource() -> Result<(), String> {
        let h = harness()?;
        *h.company.resource.lock() = None;
        h.auth
            .bindings
            .lock()
            .insert("app-1".into(), api_key_binding("app-1", test_tenant()));

        let err = resolve(&h, &headers(&[("x-api-key", "app-1")])).await.err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::ResourceNotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_forget_api_key_forces_refetch() -> Result<(), String> {
        let h = harness()?;
        h.auth
            .bindings
            .lock()
            .insert("app-1".into(), api_key_binding("app-1", test_tenant()));
        let headers = headers(&[("x-api-key", "app-1")]);

        resolve(&h, &headers).await.map_err(|e| e.message)?;
        assert!(h.resolver.forget_api_key("app-1"));
        resolve(&h, &headers).await.map_err(|e| e.message)?;
        assert_eq!(h.auth.binding_calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
