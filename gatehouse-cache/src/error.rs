use thiserror::Error;

/// Errors raised by the cache itself. Fill errors are returned unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache capacity must be at least 1")]
    ZeroCapacity,
}

pub type CacheResult<T> = Result<T, CacheError>;
