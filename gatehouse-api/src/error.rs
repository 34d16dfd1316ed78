//! Error Types for the Gatehouse API
//!
//! This module defines error handling for the gateway, including:
//! - ErrorCode enum for categorizing errors
//! - ApiError struct carried through every layer
//! - Envelope, the `{code, message, data, custom_message}` body shared by
//!   successful and failed responses
//!
//! Backend failures keep the backend's own message in `custom_message`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gatehouse_cache::CacheError;
use gatehouse_core::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401, 403)
    // ========================================================================
    /// No credentials were presented
    Unauthorized,

    /// Authenticated but not allowed
    Forbidden,

    /// Credentials were presented but rejected
    InvalidToken,

    /// The credentials name a different tenant than the request
    TenantMismatch,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field format is incorrect
    InvalidFormat,

    /// A before-hook or blocking after-hook failed
    HookFailed,

    // ========================================================================
    // Resolution Errors (404, 409)
    // ========================================================================
    /// Requested entity does not exist
    NotFound,

    /// No backend resource is registered for the tenant and service
    ResourceNotFound,

    /// Entity already exists
    Conflict,

    // ========================================================================
    // Server Errors (5xx)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Backend reported an internal failure
    BackendError,

    /// The resource's backend variant does not implement the operation
    NotImplemented,

    /// Backend is temporarily unavailable
    ServiceUnavailable,

    /// No backend connection could be acquired in time
    ConnectionPoolExhausted,

    /// The request was cancelled before the backend answered
    Cancelled,

    /// Operation timed out
    Timeout,

    /// Request rate limit exceeded
    TooManyRequests,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,

            ErrorCode::Forbidden | ErrorCode::TenantMismatch => StatusCode::FORBIDDEN,

            ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidFormat
            | ErrorCode::HookFailed => StatusCode::BAD_REQUEST,

            ErrorCode::NotFound | ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,

            ErrorCode::Conflict => StatusCode::CONFLICT,

            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::InternalError | ErrorCode::BackendError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            ErrorCode::NotImplemented => StatusCode::NOT_IMPLEMENTED,

            ErrorCode::ServiceUnavailable
            | ErrorCode::ConnectionPoolExhausted
            | ErrorCode::Cancelled => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::InvalidToken => "Invalid credentials",
            ErrorCode::TenantMismatch => "Credentials belong to a different tenant",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::HookFailed => "Custom event failed",
            ErrorCode::NotFound => "Entity not found",
            ErrorCode::ResourceNotFound => "Resource not found",
            ErrorCode::Conflict => "Entity already exists",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::BackendError => "Backend operation failed",
            ErrorCode::NotImplemented => "Operation not implemented for this resource",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConnectionPoolExhausted => "Backend connection pool exhausted",
            ErrorCode::Cancelled => "Request cancelled",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::TooManyRequests => "Rate limit exceeded",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error carried from any layer to the HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional payload returned as the envelope's `data`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,

    /// Message reported by the backend, preserved verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            custom_message: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach the backend's own message.
    pub fn with_custom_message(mut self, message: impl Into<String>) -> Self {
        self.custom_message = Some(message.into());
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn tenant_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TenantMismatch, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a MissingField error reading `"<field> is missing"`.
    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("{} is missing", field))
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    /// A hook failure. The message always ends with `in <hook name>`.
    pub fn hook_failed(hook_name: &str, message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::HookFailed, format!("{} in {}", message, hook_name))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn resource_not_found(service: impl fmt::Display, tenant: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("No {} resource registered for tenant {}", service, tenant),
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BackendError, message)
    }

    pub fn not_implemented(operation: impl fmt::Display, engine: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotImplemented,
            format!("Operation '{}' is not implemented by engine {}", operation, engine),
        )
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }

    pub fn cancelled() -> Self {
        Self::from_code(ErrorCode::Cancelled)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }

    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!("Rate limit exceeded. Retry after {} seconds", secs),
            None => "Rate limit exceeded".to_string(),
        };
        Self::new(ErrorCode::TooManyRequests, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// RESPONSE ENVELOPE
// ============================================================================

/// Body of every response produced by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Envelope {
    /// HTTP status code
    pub code: u16,
    /// Status description, or the error message
    pub message: String,
    /// Raw backend payload
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
    /// Error category, present only on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl Envelope {
    pub fn with_status(status: StatusCode, data: serde_json::Value) -> Self {
        Self {
            code: status.as_u16(),
            message: status.canonical_reason().unwrap_or("OK").to_string(),
            data,
            custom_message: None,
            error: None,
        }
    }

    pub fn ok(data: serde_json::Value) -> Self {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created(data: serde_json::Value) -> Self {
        Self::with_status(StatusCode::CREATED, data)
    }

    pub fn from_error(err: &ApiError) -> Self {
        Self {
            code: err.status_code().as_u16(),
            message: err.message.clone(),
            data: err.details.clone().unwrap_or(serde_json::Value::Null),
            custom_message: err.custom_message.clone(),
            error: Some(err.code),
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        Envelope::from_error(&self).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// Client bodies are rejected by the `Json` extractor before reaching this,
/// so a `serde_json` error here is the gateway failing on its own data.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(error = %err, "JSON encoding failed");
        ApiError::internal_error(format!("Failed to encode or decode JSON: {}", err))
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingField { field } => ApiError::missing_field(field),
            CoreError::InvalidValue { field, reason } => {
                ApiError::invalid_format(field, &format!("a valid value ({})", reason))
            }
            CoreError::UnknownVariant { .. } => ApiError::invalid_input(err.to_string()),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::error!(error = %err, "Cache misconfigured");
        ApiError::internal_error(err.to_string())
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
