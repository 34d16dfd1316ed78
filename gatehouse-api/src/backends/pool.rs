//! Backend Connection Pools
//!
//! One `deadpool` managed pool per [`Upstream`]. A pooled [`Channel`] is a
//! handle onto one backend for the duration of one logical operation; the
//! `Object` guard returned by [`BackendPool::acquire`] is the release token
//! and hands the channel back when dropped, whatever path the caller takes.
//! Acquisition failures are reported, never retried here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleResult};
use deadpool::Runtime;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::error::{BackendCode, BackendError, BackendResult};
use super::Upstream;
use crate::config::BackendConfig;
use crate::constants::REQUEST_ID_HEADER;
use crate::context::CallScope;
use crate::telemetry::with_metrics;

// ============================================================================
// CHANNEL
// ============================================================================

/// A pooled handle onto one backend deployment.
#[derive(Debug)]
pub struct Channel {
    id: u64,
    upstream: Upstream,
    base_url: String,
    client: reqwest::Client,
}

/// Error body returned by backends on failure.
#[derive(Debug, Deserialize)]
struct RejectionBody {
    code: BackendCode,
    #[serde(default)]
    message: String,
}

impl Channel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn upstream(&self) -> Upstream {
        self.upstream
    }

    /// POST `body` as JSON to `path` and decode the JSON answer.
    ///
    /// The call is raced against the scope's deadline and cancellation. The
    /// correlation id travels as `X-Request-Id`.
    pub async fn call_json<Req, Resp>(&self, path: &str, body: &Req, scope: &CallScope) -> BackendResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let started = Instant::now();
        let request = self
            .client
            .post(&url)
            .header(REQUEST_ID_HEADER, &scope.correlation_id)
            .json(body);

        let result = scope
            .run(path, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| BackendError::Unavailable(format!("{}: {}", url, e)))?;
                let status = response.status();
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| BackendError::Unavailable(format!("{}: {}", url, e)))?;
                if status.is_success() {
                    Ok(serde_json::from_slice(&bytes)?)
                } else {
                    Err(decode_rejection(status.as_u16(), &bytes))
                }
            })
            .await;

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        with_metrics(|m| {
            m.record_backend_call(
                self.upstream.service_class().as_str(),
                path,
                status,
                started.elapsed().as_secs_f64(),
            )
        });
        tracing::debug!(
            correlation_id = %scope.correlation_id,
            service = %self.upstream,
            channel = self.id,
            op = path,
            status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Backend call finished"
        );

        result
    }
}

fn decode_rejection(status: u16, bytes: &[u8]) -> BackendError {
    match serde_json::from_slice::<RejectionBody>(bytes) {
        Ok(body) => BackendError::rejected(body.code, body.message),
        Err(_) => BackendError::rejected(
            BackendCode::from_http_status(status),
            String::from_utf8_lossy(bytes).trim().to_string(),
        ),
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Creates channels for one upstream. All channels share one HTTP client.
#[derive(Debug)]
pub struct ChannelManager {
    upstream: Upstream,
    base_url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl ChannelManager {
    pub fn new(upstream: Upstream, base_url: impl Into<String>, config: &BackendConfig) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build {} client: {}", upstream, e)))?;
        Ok(Self {
            upstream,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            next_id: AtomicU64::new(0),
        })
    }
}

impl managed::Manager for ChannelManager {
    type Type = Channel;
    type Error = BackendError;

    async fn create(&self) -> Result<Channel, BackendError> {
        Ok(Channel {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            upstream: self.upstream,
            base_url: self.base_url.clone(),
            client: self.client.clone(),
        })
    }

    async fn recycle(&self, _channel: &mut Channel, _metrics: &Metrics) -> RecycleResult<BackendError> {
        Ok(())
    }
}

// ============================================================================
// POOL
// ============================================================================

/// Point-in-time view of one pool, reported by readiness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PoolStatus {
    pub upstream: String,
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
    pub closed: bool,
}

#[derive(Clone)]
pub struct BackendPool {
    upstream: Upstream,
    pool: Pool<ChannelManager>,
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool")
            .field("upstream", &self.upstream)
            .field("status", &self.status())
            .finish()
    }
}

impl BackendPool {
    pub fn new(upstream: Upstream, config: &BackendConfig) -> BackendResult<Self> {
        Self::with_url(upstream, config.url(upstream), config)
    }

    /// A pool for `upstream` reaching `base_url` rather than the configured URL.
    pub fn with_url(upstream: Upstream, base_url: impl Into<String>, config: &BackendConfig) -> BackendResult<Self> {
        let manager = ChannelManager::new(upstream, base_url, config)?;
        let pool = Pool::builder(manager)
            .max_size(config.pool_max_size.max(1))
            .wait_timeout(Some(config.pool_wait))
            .create_timeout(Some(config.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build {} pool: {}", upstream, e)))?;
        Ok(Self { upstream, pool })
    }

    pub fn upstream(&self) -> Upstream {
        self.upstream
    }

    pub fn base_url(&self) -> &str {
        &self.pool.manager().base_url
    }

    /// Borrow a channel. Dropping the returned guard releases it.
    pub async fn acquire(&self, scope: &CallScope) -> BackendResult<Object<ChannelManager>> {
        let upstream = self.upstream;
        scope
            .run("acquire", async {
                self.pool.get().await.map_err(|e| pool_error(upstream, e))
            })
            .await
    }

    /// Acquire a channel, make one call, release the channel.
    pub async fn call_json<Req, Resp>(&self, path: &str, body: &Req, scope: &CallScope) -> BackendResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let channel = self.acquire(scope).await?;
        channel.call_json(path, body, scope).await
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            upstream: self.upstream.to_string(),
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            closed: self.pool.is_closed(),
        }
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

fn pool_error(upstream: Upstream, err: PoolError<BackendError>) -> BackendError {
    match err {
        PoolError::Timeout(_) => BackendError::Exhausted(upstream.to_string()),
        PoolError::Backend(e) => e,
        PoolError::Closed => BackendError::Unavailable(format!("{} pool is closed", upstream)),
        other => BackendError::Unavailable(format!("{} pool error: {}", upstream, other)),
    }
}

// ============================================================================
// ALL POOLS
// ============================================================================

/// Every backend pool, keyed by upstream.
#[derive(Debug, Clone)]
pub struct BackendClients {
    pools: HashMap<Upstream, BackendPool>,
    config: BackendConfig,
}

impl BackendClients {
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let pools = Upstream::ALL
            .into_iter()
            .map(|upstream| Ok((upstream, BackendPool::new(upstream, config)?)))
            .collect::<BackendResult<HashMap<_, _>>>()?;
        Ok(Self {
            pools,
            config: config.clone(),
        })
    }

    /// The settings the pools were built from.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn pool(&self, upstream: Upstream) -> BackendResult<&BackendPool> {
        self.pools
            .get(&upstream)
            .ok_or_else(|| BackendError::Unavailable(format!("no pool configured for {}", upstream)))
    }

    /// Status of every pool, in a stable order.
    pub fn status(&self) -> Vec<PoolStatus> {
        let mut statuses: Vec<_> = self.pools.values().map(BackendPool::status).collect();
        statuses.sort_by(|a, b| a.upstream.cmp(&b.upstream));
        statuses
    }

    pub fn close(&self) {
        self.pools.values().for_each(BackendPool::close);
    }
}
