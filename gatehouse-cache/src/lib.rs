//! Gatehouse Cache
//!
//! An in-memory, TTL-bound LRU keyed by strings and holding opaque bytes.
//! [`ExpiringLru::get_or_compute`] coalesces concurrent misses on the same key
//! behind a single in-flight sentinel so only one caller runs the fill.

mod config;
mod error;
mod expiring;
mod stats;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use expiring::{ExpiringLru, Fill, Lookup, LookupSource};
pub use stats::CacheStats;
