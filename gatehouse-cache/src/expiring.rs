//! Expiring LRU with single-flight fills
//!
//! Every key maps to either a stored value or an in-flight sentinel. A
//! sentinel is a `watch` receiver for the producer's outcome; callers that
//! find one wait on it for at most [`CacheConfig::wait_bound`] and then fall
//! through to computing the value themselves. The producer holds a
//! [`SentinelGuard`] so the sentinel is released on every exit path,
//! including the calling future being dropped.
//!
//! Expiry is checked on access. [`ExpiringLru::purge_expired`] is available
//! as an explicit sweep but nothing schedules it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::stats::{CacheStats, Counters};

type Outcome<E> = Result<Bytes, E>;
type OutcomeSlot<E> = Option<Outcome<E>>;

// ============================================================================
// PUBLIC TYPES
// ============================================================================

/// What a fill produced and whether it may be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    value: Bytes,
    store: bool,
}

impl Fill {
    /// A value that is stored for the requested TTL.
    pub fn store(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            store: true,
        }
    }

    /// A value handed to the current waiters but never stored.
    pub fn transient(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            store: false,
        }
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn is_stored(&self) -> bool {
        self.store
    }
}

/// How a [`Lookup`] was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupSource {
    /// A stored, unexpired value.
    Hit,
    /// This caller ran the fill.
    Computed,
    /// Another caller's fill.
    Coalesced,
    /// This caller gave up waiting and ran its own fill.
    Straggler,
}

impl LookupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupSource::Hit => "hit",
            LookupSource::Computed => "miss",
            LookupSource::Coalesced => "coalesced",
            LookupSource::Straggler => "straggler",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub value: Bytes,
    pub source: LookupSource,
}

// ============================================================================
// INTERNAL STATE
// ============================================================================

enum Entry<E> {
    Ready {
        value: Bytes,
        expires_at: Instant,
    },
    Pending {
        id: u64,
        receiver: watch::Receiver<OutcomeSlot<E>>,
    },
}

impl<E> Entry<E> {
    fn is_ready(&self) -> bool {
        matches!(self, Entry::Ready { .. })
    }

    fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending { .. })
    }

    fn pending_id(&self) -> Option<u64> {
        match self {
            Entry::Pending { id, .. } => Some(*id),
            Entry::Ready { .. } => None,
        }
    }
}

struct Inner<E> {
    entries: LruCache<String, Entry<E>>,
    /// Number of `Ready` entries; this is what capacity bounds.
    ready: usize,
    pending: usize,
    next_sentinel_id: u64,
    /// Bumped by every `remove_matching`; stragglers that started under an
    /// older generation do not store.
    generation: u64,
}

impl<E> Inner<E> {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            ready: 0,
            pending: 0,
            next_sentinel_id: 0,
            generation: 0,
        }
    }

    /// Return a live value, promoting it. Drops the entry if it has expired.
    fn lookup_ready(&mut self, key: &str, now: Instant, counters: &Counters) -> Option<Bytes> {
        match self.entries.get(key) {
            Some(Entry::Ready { value, expires_at }) if now < *expires_at => {
                return Some(value.clone())
            }
            Some(Entry::Ready { .. }) => {}
            _ => return None,
        }
        self.entries.pop(key);
        self.ready -= 1;
        Counters::bump(&counters.expirations);
        None
    }

    fn insert_ready(
        &mut self,
        key: String,
        value: Bytes,
        expires_at: Instant,
        capacity: usize,
        counters: &Counters,
    ) {
        let previous = self.entries.peek(&key).map(|e| (e.is_ready(), e.is_pending()));
        match previous {
            Some((true, _)) => {}
            other => {
                if matches!(other, Some((_, true))) {
                    self.pending -= 1;
                }
                while self.ready >= capacity && self.evict_lru_ready() {
                    Counters::bump(&counters.evictions);
                }
                self.ready += 1;
            }
        }
        self.entries.put(key, Entry::Ready { value, expires_at });
    }

    /// Evict the least-recently-used stored value. Sentinels are skipped.
    fn evict_lru_ready(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .rev()
            .find(|(_, entry)| entry.is_ready())
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                self.entries.pop(&key);
                self.ready -= 1;
                tracing::trace!(key = %key, "evicted least recently used entry");
                true
            }
            None => false,
        }
    }

    fn remove_pending(&mut self, key: &str, id: u64) -> bool {
        if self.entries.peek(key).and_then(Entry::pending_id) != Some(id) {
            return false;
        }
        self.entries.pop(key);
        self.pending -= 1;
        true
    }

    /// Drop the sentinel for `key` whoever owns it. Its producer still
    /// publishes to the waiters it already has but can no longer store.
    fn orphan_pending(&mut self, key: &str) -> bool {
        if !self.entries.peek(key).is_some_and(Entry::is_pending) {
            return false;
        }
        self.entries.pop(key);
        self.pending -= 1;
        true
    }

    fn remove_ready(&mut self, key: &str) -> bool {
        if !self.entries.peek(key).is_some_and(Entry::is_ready) {
            return false;
        }
        self.entries.pop(key);
        self.ready -= 1;
        true
    }
}

enum Plan<E> {
    Ready(Bytes),
    Wait {
        id: u64,
        receiver: watch::Receiver<OutcomeSlot<E>>,
    },
    Go {
        id: u64,
        sender: watch::Sender<OutcomeSlot<E>>,
    },
}

enum Action<E> {
    Produce {
        guard: SentinelGuard<E>,
        sender: watch::Sender<OutcomeSlot<E>>,
    },
    Straggle {
        generation: u64,
    },
}

/// Releases a sentinel when the producing future finishes or is dropped.
struct SentinelGuard<E> {
    inner: Arc<Mutex<Inner<E>>>,
    key: String,
    id: Option<u64>,
}

impl<E> SentinelGuard<E> {
    fn new(inner: Arc<Mutex<Inner<E>>>, key: &str, id: u64) -> Self {
        Self {
            inner,
            key: key.to_string(),
            id: Some(id),
        }
    }

    /// Swap the sentinel for the produced value, if the sentinel is still ours.
    fn complete(&mut self, stored: Option<(Bytes, Instant)>, capacity: usize, counters: &Counters) {
        if let Some(id) = self.id.take() {
            let mut inner = self.inner.lock();
            if inner.remove_pending(&self.key, id) {
                if let Some((value, expires_at)) = stored {
                    inner.insert_ready(self.key.clone(), value, expires_at, capacity, counters);
                }
            }
        }
    }
}

impl<E> Drop for SentinelGuard<E> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.inner.lock().remove_pending(&self.key, id);
        }
    }
}

async fn await_outcome<E: Clone>(mut receiver: watch::Receiver<OutcomeSlot<E>>) -> OutcomeSlot<E> {
    match receiver.wait_for(Option::is_some).await {
        Ok(slot) => slot.clone(),
        // Producer dropped without publishing.
        Err(_) => None,
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// In-memory, TTL-bound LRU of byte values with single-flight fills.
///
/// `E` is the error type fills can fail with; every waiter on a failed fill
/// receives a clone of the producer's error.
pub struct ExpiringLru<E> {
    inner: Arc<Mutex<Inner<E>>>,
    counters: Arc<Counters>,
    config: CacheConfig,
}

impl<E> Clone for ExpiringLru<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            counters: Arc::clone(&self.counters),
            config: self.config.clone(),
        }
    }
}

impl<E> std::fmt::Debug for ExpiringLru<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringLru")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<E> ExpiringLru<E> {
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            counters: Arc::new(Counters::default()),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fetch a live value. Sentinels and expired entries read as a miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let value = self.inner.lock().lookup_ready(key, now, &self.counters);
        if value.is_some() {
            Counters::bump(&self.counters.hits);
        } else {
            Counters::bump(&self.counters.misses);
        }
        value
    }

    /// Insert or replace a value, evicting the least-recently-used stored
    /// value first if the cache is full.
    pub fn add(&self, key: impl Into<String>, value: impl Into<Bytes>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.inner.lock().insert_ready(
            key.into(),
            value.into(),
            expires_at,
            self.config.capacity,
            &self.counters,
        );
    }

    /// Remove a stored value. In-flight sentinels are left alone.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove_ready(key)
    }

    /// Remove every entry whose key matches `predicate` and return how many
    /// stored values went.
    ///
    /// Matching fills still in flight are orphaned: their current waiters get
    /// the outcome, nothing is stored, and the next caller starts a new fill.
    pub fn remove_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let keys: Vec<(String, bool)> = inner
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, entry)| (key.clone(), entry.is_ready()))
            .collect();
        let mut removed = 0;
        for (key, ready) in keys {
            if ready {
                removed += usize::from(inner.remove_ready(&key));
            } else if inner.orphan_pending(&key) {
                tracing::trace!(key = %key, "orphaned in-flight fill");
            }
        }
        removed
    }

    /// Drop every expired value now instead of on next access.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Ready { expires_at, .. } if now >= *expires_at))
            .map(|(key, _)| key.clone())
            .collect();
        let purged = keys.iter().filter(|key| inner.remove_ready(key)).count();
        for _ in 0..purged {
            Counters::bump(&self.counters.expirations);
        }
        purged
    }

    /// Number of stored values (sentinels excluded).
    pub fn len(&self) -> usize {
        self.inner.lock().ready
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fills currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().pending
    }

    pub fn stats(&self) -> CacheStats {
        let (ready, pending) = {
            let inner = self.inner.lock();
            (inner.ready, inner.pending)
        };
        self.counters.snapshot(ready, pending)
    }

    fn plan(&self, key: &str) -> Plan<E> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if let Some(value) = inner.lookup_ready(key, now, &self.counters) {
            return Plan::Ready(value);
        }
        if let Some(Entry::Pending { id, receiver }) = inner.entries.peek(key) {
            return Plan::Wait {
                id: *id,
                receiver: receiver.clone(),
            };
        }
        let id = inner.next_sentinel_id;
        inner.next_sentinel_id += 1;
        let (sender, receiver) = watch::channel(None);
        inner
            .entries
            .put(key.to_string(), Entry::Pending { id, receiver });
        inner.pending += 1;
        Plan::Go { id, sender }
    }

    fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Store a straggler's value unless a sentinel currently owns the key or
    /// entries were removed since the straggler started.
    fn store_unless_pending(&self, key: &str, value: Bytes, ttl: Duration, generation: u64) {
        let expires_at = Instant::now() + ttl;
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.entries.peek(key).is_some_and(Entry::is_pending) {
            return;
        }
        inner.insert_ready(
            key.to_string(),
            value,
            expires_at,
            self.config.capacity,
            &self.counters,
        );
    }
}

impl<E: Clone> ExpiringLru<E> {
    /// Return the live value for `key`, or run `compute` at most once across
    /// all concurrent callers for the same key.
    ///
    /// Callers that find a fill in flight wait for its outcome, success or
    /// error, for at most the configured wait bound. A caller whose bound
    /// elapses runs `compute` itself. Dropping the returned future releases
    /// any sentinel it installed; its waiters then re-plan.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<Lookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fill, E>>,
    {
        let started = Instant::now();
        let action = loop {
            match self.plan(key) {
                Plan::Ready(value) => {
                    Counters::bump(&self.counters.hits);
                    return Ok(Lookup {
                        value,
                        source: LookupSource::Hit,
                    });
                }
                Plan::Go { id, sender } => {
                    Counters::bump(&self.counters.misses);
                    break Action::Produce {
                        guard: SentinelGuard::new(Arc::clone(&self.inner), key, id),
                        sender,
                    };
                }
                Plan::Wait { id, receiver } => {
                    let remaining = self.config.wait_bound.saturating_sub(started.elapsed());
                    match tokio::time::timeout(remaining, await_outcome(receiver)).await {
                        Ok(Some(outcome)) => {
                            Counters::bump(&self.counters.coalesced);
                            return outcome.map(|value| Lookup {
                                value,
                                source: LookupSource::Coalesced,
                            });
                        }
                        Ok(None) => {
                            self.inner.lock().remove_pending(key, id);
                            tracing::debug!(key, "in-flight fill abandoned, re-planning");
                        }
                        Err(_) => {
                            Counters::bump(&self.counters.stragglers);
                            tracing::warn!(
                                key,
                                wait_ms = self.config.wait_bound.as_millis() as u64,
                                "single-flight wait bound elapsed, computing independently"
                            );
                            break Action::Straggle {
                                generation: self.generation(),
                            };
                        }
                    }
                }
            }
        };

        let result = compute().await;

        let source = match action {
            Action::Produce { mut guard, sender } => {
                let stored = match &result {
                    Ok(fill) if fill.store => Some((fill.value.clone(), Instant::now() + ttl)),
                    _ => None,
                };
                guard.complete(stored, self.config.capacity, &self.counters);
                let outcome = match &result {
                    Ok(fill) => Ok(fill.value.clone()),
                    Err(e) => Err(e.clone()),
                };
                sender.send_replace(Some(outcome));
                LookupSource::Computed
            }
            Action::Straggle { generation } => {
                if let Ok(fill) = &result {
                    if fill.store {
                        self.store_unless_pending(key, fill.value.clone(), ttl, generation);
                    }
                }
                LookupSource::Straggler
            }
        };

        result.map(|fill| Lookup {
            value: fill.value,
            source,
        })
    }
}
