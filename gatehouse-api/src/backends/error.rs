//! Backend failures and their mapping onto API errors

use gatehouse_core::EngineClass;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ApiError, ErrorCode};

/// Status code reported by a backend in its `{code, message}` error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendCode {
    InvalidArgument,
    FailedPrecondition,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    Internal,
    Unavailable,
    DeadlineExceeded,
    /// Any code this gateway does not know about.
    #[serde(other)]
    Unknown,
}

impl BackendCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendCode::InvalidArgument => "invalid-argument",
            BackendCode::FailedPrecondition => "failed-precondition",
            BackendCode::Unauthenticated => "unauthenticated",
            BackendCode::PermissionDenied => "permission-denied",
            BackendCode::NotFound => "not-found",
            BackendCode::AlreadyExists => "already-exists",
            BackendCode::ResourceExhausted => "resource-exhausted",
            BackendCode::Internal => "internal",
            BackendCode::Unavailable => "unavailable",
            BackendCode::DeadlineExceeded => "deadline-exceeded",
            BackendCode::Unknown => "unknown",
        }
    }

    /// The API error category a backend code surfaces as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BackendCode::InvalidArgument | BackendCode::FailedPrecondition => ErrorCode::InvalidInput,
            BackendCode::Unauthenticated => ErrorCode::InvalidToken,
            BackendCode::PermissionDenied => ErrorCode::Forbidden,
            BackendCode::NotFound => ErrorCode::NotFound,
            BackendCode::AlreadyExists => ErrorCode::Conflict,
            BackendCode::ResourceExhausted => ErrorCode::TooManyRequests,
            BackendCode::Internal | BackendCode::Unknown => ErrorCode::BackendError,
            BackendCode::Unavailable => ErrorCode::ServiceUnavailable,
            BackendCode::DeadlineExceeded => ErrorCode::Timeout,
        }
    }

    /// Best guess for a backend that answered with a bare HTTP status.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => BackendCode::InvalidArgument,
            401 => BackendCode::Unauthenticated,
            403 => BackendCode::PermissionDenied,
            404 => BackendCode::NotFound,
            409 => BackendCode::AlreadyExists,
            412 => BackendCode::FailedPrecondition,
            429 => BackendCode::ResourceExhausted,
            503 => BackendCode::Unavailable,
            504 => BackendCode::DeadlineExceeded,
            _ => BackendCode::Internal,
        }
    }
}

impl std::fmt::Display for BackendCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from acquiring a backend handle or calling through it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("no {0} connection became free within the pool wait timeout")]
    Exhausted(String),

    #[error("backend call '{operation}' exceeded the request deadline")]
    Timeout { operation: String },

    #[error("backend call cancelled")]
    Cancelled,

    #[error("backend rejected the call ({code}): {message}")]
    Rejected { code: BackendCode, message: String },

    #[error("backend response could not be decoded: {0}")]
    Decode(String),

    #[error("operation '{operation}' is not implemented by engine {engine}")]
    NotImplemented { operation: String, engine: EngineClass },
}

impl BackendError {
    pub fn rejected(code: BackendCode, message: impl Into<String>) -> Self {
        BackendError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Unavailable(_) => "unavailable",
            BackendError::Exhausted(_) => "exhausted",
            BackendError::Timeout { .. } => "timeout",
            BackendError::Cancelled => "cancelled",
            BackendError::Rejected { .. } => "rejected",
            BackendError::Decode(_) => "decode",
            BackendError::NotImplemented { .. } => "not_implemented",
        }
    }

    pub fn backend_code(&self) -> Option<BackendCode> {
        match self {
            BackendError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => {
                tracing::warn!(reason = %reason, "Backend unavailable");
                ApiError::service_unavailable("Backend unavailable").with_custom_message(reason)
            }
            BackendError::Exhausted(upstream) => {
                tracing::warn!(upstream = %upstream, "Backend connection pool exhausted");
                ApiError::connection_pool_exhausted()
            }
            BackendError::Timeout { operation } => ApiError::timeout(&operation),
            BackendError::Cancelled => ApiError::cancelled(),
            BackendError::Rejected { code, message } => {
                let error_code = code.error_code();
                if error_code == ErrorCode::BackendError {
                    tracing::error!(backend_code = %code, message = %message, "Backend internal error");
                }
                ApiError::from_code(error_code).with_custom_message(message)
            }
            BackendError::Decode(detail) => {
                tracing::error!(detail = %detail, "Undecodable backend response");
                ApiError::backend_error("Backend returned an unreadable response")
                    .with_custom_message(detail)
            }
            BackendError::NotImplemented { operation, engine } => {
                ApiError::not_implemented(operation, engine)
            }
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
