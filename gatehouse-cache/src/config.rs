use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Construction-time settings for an [`ExpiringLru`](crate::ExpiringLru).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of stored values. In-flight sentinels are not counted.
    pub capacity: usize,
    /// How long a caller waits on another caller's fill before computing
    /// the value itself.
    pub wait_bound: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            wait_bound: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the single-flight wait bound.
    pub fn with_wait_bound(mut self, wait_bound: Duration) -> Self {
        self.wait_bound = wait_bound;
        self
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        Ok(())
    }
}
