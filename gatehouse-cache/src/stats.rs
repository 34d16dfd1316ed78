use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters for one cache instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a stored, unexpired value.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Lookups that received another caller's fill.
    pub coalesced: u64,
    /// Lookups that gave up waiting and computed independently.
    pub stragglers: u64,
    /// Values removed to make room.
    pub evictions: u64,
    /// Values dropped because their TTL had passed.
    pub expirations: u64,
    /// Values currently stored.
    pub entry_count: u64,
    /// Fills currently in flight.
    pub in_flight: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Coalesced lookups count as hits.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub stragglers: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entry_count: usize, in_flight: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            stragglers: self.stragglers.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entry_count: entry_count as u64,
            in_flight: in_flight as u64,
        }
    }
}
