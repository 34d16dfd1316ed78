//! Rate limiting middleware
//!
//! Two quotas. [`rate_limit_middleware`] runs before credentials are checked
//! and keys on the client address only, since anything the request claims
//! about itself is still unverified. [`tenant_rate_limit_middleware`] runs
//! after tenant resolution and keys on the resolved tenant.
//!
//! Limiters are created on first use and dropped by [`RateLimitState::purge_idle`]
//! once they have gone unused for the configured idle period.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use gatehouse_core::TenantKey;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use tokio::time::Instant;

use crate::config::ApiConfig;
use crate::context::RequestContext;
use crate::error::ApiError;

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    /// Before credentials are checked - keyed by client address
    Ip(IpAddr),
    /// After tenant resolution - keyed by the resolved tenant
    Tenant(TenantKey),
}

impl RateLimitKey {
    fn kind(&self) -> &'static str {
        match self {
            RateLimitKey::Ip(_) => "ip",
            RateLimitKey::Tenant(_) => "tenant",
        }
    }
}

/// A limiter and when it was last consulted, in milliseconds since the
/// owning state's epoch.
struct TrackedLimiter {
    limiter: DirectRateLimiter,
    last_seen: AtomicU64,
}

#[derive(Clone)]
pub struct RateLimitState {
    enabled: bool,
    trust_forwarded: bool,
    ip_quota: Quota,
    tenant_quota: Quota,
    idle: Duration,
    epoch: Instant,
    limiters: Arc<DashMap<RateLimitKey, Arc<TrackedLimiter>>>,
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("enabled", &self.enabled)
            .field("ip_quota", &self.ip_quota)
            .field("tenant_quota", &self.tenant_quota)
            .field("keys", &self.limiters.len())
            .finish()
    }
}

fn quota(per_second: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

impl RateLimitState {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            enabled: config.rate_limit_enabled,
            trust_forwarded: config.rate_limit_trust_forwarded,
            ip_quota: quota(config.rate_limit_per_second, config.rate_limit_burst),
            tenant_quota: quota(config.rate_limit_tenant_per_second, config.rate_limit_tenant_burst),
            idle: config.rate_limit_idle,
            epoch: Instant::now(),
            limiters: Arc::new(DashMap::new()),
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn limiter(&self, key: &RateLimitKey) -> Arc<TrackedLimiter> {
        let quota = match key {
            RateLimitKey::Ip(_) => self.ip_quota,
            RateLimitKey::Tenant(_) => self.tenant_quota,
        };
        let now = self.now_millis();
        let tracked = self
            .limiters
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(TrackedLimiter {
                    limiter: RateLimiter::direct(quota),
                    last_seen: AtomicU64::new(now),
                })
            })
            .clone();
        tracked.last_seen.store(now, Ordering::Relaxed);
        tracked
    }

    /// Take one unit of `key`'s quota, or report how long until one frees up.
    pub fn check(&self, key: &RateLimitKey) -> Result<(), RateLimitError> {
        self.limiter(key).limiter.check().map_err(|not_until| RateLimitError {
            retry_after: not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1),
        })
    }

    /// Drop limiters unused for longer than the idle period. Returns how many
    /// were dropped.
    pub fn purge_idle(&self) -> usize {
        let idle = u64::try_from(self.idle.as_millis()).unwrap_or(u64::MAX);
        let now = self.now_millis();
        let before = self.limiters.len();
        self.limiters
            .retain(|_, tracked| now.saturating_sub(tracked.last_seen.load(Ordering::Relaxed)) < idle);
        before.saturating_sub(self.limiters.len())
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
        let forwarded = if self.trust_forwarded {
            forwarded_ip(headers)
        } else {
            None
        };
        forwarded
            .or_else(|| peer.map(|addr| addr.ip()))
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

/// 429 with a `Retry-After` header.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut response = ApiError::too_many_requests(Some(self.retry_after)).into_response();
        response.headers_mut().insert(
            RETRY_AFTER,
            HeaderValue::from_str(&self.retry_after.to_string()).unwrap_or_else(|_| HeaderValue::from_static("1")),
        );
        response
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    header_ip(headers, "x-forwarded-for").or_else(|| header_ip(headers, "x-real-ip"))
}

fn enforce(state: &RateLimitState, key: &RateLimitKey) -> Result<(), RateLimitError> {
    state.check(key).inspect_err(|err| {
        tracing::info!(key_kind = key.kind(), retry_after = err.retry_after, "Rate limit exceeded");
    })
}

/// Per-address quota, applied before any credential is looked at.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.enabled {
        return Ok(next.run(request).await);
    }

    let ip = state.client_ip(request.headers(), connect_info.map(|ConnectInfo(addr)| addr));
    enforce(&state, &RateLimitKey::Ip(ip))?;
    Ok(next.run(request).await)
}

/// Per-tenant quota. Must sit inside the tenant middleware; requests without a
/// resolved context pass through untouched.
pub async fn tenant_rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.enabled {
        return Ok(next.run(request).await);
    }

    if let Some(tenant) = request.extensions().get::<RequestContext>().map(RequestContext::tenant) {
        enforce(&state, &RateLimitKey::Tenant(tenant))?;
    }
    Ok(next.run(request).await)
}
