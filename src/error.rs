//! Error types for toybox.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Upstream API error: {0}")]
    Api(#[from] ApiError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures reported by the upstream subscription API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Upstream rejected {endpoint} with status {status}: {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Expired or invalid access token. Callers drop the session.
    #[error("Not authorized for {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Inline field errors raised while a step's form is checked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Resend available in {remaining_secs}s")]
    ResendLocked { remaining_secs: u64 },
}

impl ValidationError {
    /// Name of the form field the error belongs to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Required { field } | Self::Invalid { field, .. } => Some(field),
            Self::ResendLocked { .. } => None,
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Validation(ValidationError::ResendLocked { remaining_secs }) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({"error": self.to_string(), "remaining_secs": remaining_secs}),
            ),
            Self::Validation(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": e.to_string(), "field": e.field()}),
            ),
            Self::Api(e) => {
                tracing::warn!(error = %e, "Upstream call failed");
                (StatusCode::BAD_GATEWAY, json!({"error": e.to_string()}))
            }
            Self::Database(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal error"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
