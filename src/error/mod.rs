//! Error handling for the key-pool proxy.
//!
//! Every failure the service can surface is a variant of [`AppError`], which
//! carries enough context for structured logging and maps onto an HTTP status
//! plus an RFC 7807-style JSON body when returned from a handler.

pub mod types;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Standard error response body, loosely following RFC 7807 Problem Details.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable category of the problem.
    #[serde(rename = "type")]
    pub error_type: String,

    /// The HTTP status code.
    pub status: u16,

    /// A human-readable explanation specific to this occurrence.
    pub detail: String,

    /// Request ID for correlating with logs.
    pub request_id: Option<String>,
}

/// Main application error type.
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    ConfigValidation {
        message: String,
        field: Option<String>,
    },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {message}")]
    ConfigParse {
        message: String,
        line: Option<usize>,
    },

    // Key pool errors
    /// No eligible key at selection time. Recoverable by the caller retrying
    /// later; not a defect.
    #[error("Key pool exhausted: no eligible key available")]
    PoolExhausted,

    /// Dispatcher-level wrapper for `PoolExhausted`, surfaced to the request
    /// originator as a transient service-unavailable condition.
    #[error("No available API key to serve the request")]
    NoAvailableKey,

    #[error("Unknown key id: {id}")]
    KeyNotFound { id: String },

    // Upstream errors
    /// `timeout_secs` is the configured budget when known; upstream-reported
    /// timeouts (504/408 passthrough) carry `None`.
    #[error("Upstream request timed out{}", timeout_secs.map(|s| format!(" after {s}s")).unwrap_or_default())]
    UpstreamTimeout { timeout_secs: Option<u64> },

    #[error("Upstream server error: status {status}")]
    UpstreamServerError { status: u16 },

    #[error("Upstream rejected credential: status {status}")]
    UpstreamAuthError { status: u16 },

    #[error("Upstream quota exhausted for key")]
    UpstreamQuotaExceeded,

    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    // Request errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // System errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a new configuration validation error.
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigParse { .. }
            | Self::InvalidRequest { .. }
            | Self::Serialization { .. } => StatusCode::BAD_REQUEST,

            Self::ConfigNotFound { .. } | Self::KeyNotFound { .. } => StatusCode::NOT_FOUND,

            Self::ConfigValidation { .. } | Self::Internal { .. } | Self::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            Self::UpstreamServerError { .. }
            | Self::UpstreamAuthError { .. }
            | Self::UpstreamQuotaExceeded
            | Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,

            Self::PoolExhausted | Self::NoAvailableKey => StatusCode::SERVICE_UNAVAILABLE,

            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get a short category for the error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. } | Self::ConfigNotFound { .. } | Self::ConfigParse { .. } => {
                "configuration"
            }
            Self::PoolExhausted | Self::NoAvailableKey | Self::KeyNotFound { .. } => "key-pool",
            Self::UpstreamTimeout { .. }
            | Self::UpstreamServerError { .. }
            | Self::UpstreamAuthError { .. }
            | Self::UpstreamQuotaExceeded
            | Self::UpstreamUnavailable { .. } => "upstream",
            Self::InvalidRequest { .. } => "validation",
            _ => "internal",
        }
    }

    /// Log the error with the appropriate level.
    ///
    /// Pool exhaustion is a transient signalling condition, not a defect, so
    /// it is logged at `warn` like other client-visible conditions.
    pub fn log(&self, request_id: &str) {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY => {
                error!(
                    error = %self,
                    request_id = request_id,
                    error_type = self.error_type(),
                    "Application error occurred"
                );
            }
            _ => {
                warn!(
                    error = %self,
                    request_id = request_id,
                    error_type = self.error_type(),
                    "Request failed"
                );
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        self.log(&request_id);

        let status = self.status_code();
        let body = ErrorResponse {
            error_type: self.error_type().to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
            request_id: Some(request_id),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T, E = AppError> = std::result::Result<T, E>;
