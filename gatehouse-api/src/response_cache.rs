//! Response Cache
//!
//! Hot reads are cached for a short TTL under
//! `base64(table_slug | fingerprint | resource_environment_id)`, where the
//! fingerprint is the request serialized with object keys sorted at every
//! depth. Fills go through the single-flight primitive, so concurrent
//! identical reads cost one backend call. Only answers the backend marked
//! cacheable are stored.

use std::future::Future;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use gatehouse_cache::{CacheConfig, CacheStats, ExpiringLru, Fill, LookupSource};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::telemetry::with_metrics;

const KEY_SEPARATOR: char = '|';

// ============================================================================
// KEYS
// ============================================================================

/// Deterministic serialization of `value`, independent of map insertion order.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> ApiResult<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> ApiResult<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(value, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        leaf => out.push_str(&serde_json::to_string(leaf)?),
    }
    Ok(())
}

pub fn cache_key(table_slug: &str, fingerprint: &str, resource_environment_id: &str) -> String {
    STANDARD.encode(format!(
        "{}{sep}{}{sep}{}",
        table_slug,
        fingerprint,
        resource_environment_id,
        sep = KEY_SEPARATOR
    ))
}

/// The raw `table|fingerprint|env` behind a key, if it is one of ours.
pub fn decode_key(key: &str) -> Option<String> {
    STANDARD
        .decode(key)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
}

// ============================================================================
// CACHE
// ============================================================================

/// A served read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: Bytes,
    /// `None` when the cache was bypassed.
    pub source: Option<LookupSource>,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: ExpiringLru<ApiError>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, ttl: Duration) -> ApiResult<Self> {
        Ok(Self {
            entries: ExpiringLru::new(config)?,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Serve `key` from cache or run `compute` once for all concurrent callers.
    ///
    /// `compute` yields the serialized answer and whether the backend marked
    /// it cacheable. With `block_cached` the cache is neither read nor written.
    pub async fn read_through<F, Fut>(&self, key: &str, block_cached: bool, compute: F) -> ApiResult<CachedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<(Bytes, bool)>>,
    {
        if block_cached {
            with_metrics(|m| m.record_cache_lookup("response", "bypass"));
            let (body, _) = compute().await?;
            return Ok(CachedResponse { body, source: None });
        }

        let lookup = self
            .entries
            .get_or_compute(key, self.ttl, || async move {
                let (body, cacheable) = compute().await?;
                Ok(if cacheable {
                    Fill::store(body)
                } else {
                    Fill::transient(body)
                })
            })
            .await?;

        with_metrics(|m| m.record_cache_lookup("response", lookup.source.as_str()));
        Ok(CachedResponse {
            body: lookup.value,
            source: Some(lookup.source),
        })
    }

    /// Drop every stored read of `table_slug` within `resource_environment_id`.
    pub fn invalidate(&self, table_slug: &str, resource_environment_id: &str) -> usize {
        let prefix = format!("{}{}", table_slug, KEY_SEPARATOR);
        let suffix = format!("{}{}", KEY_SEPARATOR, resource_environment_id);
        let removed = self.entries.remove_matching(|key| {
            decode_key(key).is_some_and(|raw| raw.starts_with(&prefix) && raw.ends_with(&suffix))
        });
        if removed > 0 {
            tracing::debug!(
                table_slug,
                resource_environment_id,
                removed,
                "Invalidated cached reads"
            );
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key)
    }

    pub fn purge_expired(&self) -> usize {
        self.entries.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }
}
