//! Error types for core value parsing

use thiserror::Error;

/// Errors raised while building or parsing core values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("{field} is missing")]
    MissingField { field: &'static str },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
