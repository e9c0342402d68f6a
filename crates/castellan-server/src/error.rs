//! Server error types and the JSON error body returned by handlers.

use std::net::SocketAddr;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use castellan_registry::{AdminError, FieldError, ManifestError, RefreshError, SourceError};
use serde::Serialize;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while assembling or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be used.
    #[error("configuration error: {0}")]
    Config(#[from] castellan_config::ConfigError),

    /// A configured name is not a valid identifier.
    #[error("invalid service name: {0}")]
    InvalidService(#[from] castellan_types::TypeError),

    /// Policy registry could not be built.
    #[error("policy registry error: {0}")]
    Policy(#[from] castellan_policy::RegistryError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Authentication failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// JSON error body: `{code, message, fields?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

/// Structured API error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                fields: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn api_not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn api_unauthorized(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// A denial never says which policy matched or why.
pub fn api_forbidden() -> ApiError {
    ApiError::new(StatusCode::FORBIDDEN, "forbidden", "not permitted")
}

pub fn api_validation_error(fields: Vec<FieldError>) -> ApiError {
    let mut error = ApiError::new(
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_error",
        "request failed validation",
    );
    error.body.fields = Some(fields);
    error
}

/// Generic 503; callers log the cause.
pub fn api_unavailable(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(what) => api_not_found(format!("{what} not found")),
            SourceError::Unavailable(cause) => {
                // The cause stays in the log.
                tracing::error!(error = %cause, "source of record unavailable");
                api_unavailable("source of record unavailable")
            }
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Validation(fields) => api_validation_error(fields),
            AdminError::NotFound(what) => api_not_found(format!("{what} not found")),
            AdminError::Source(source) => source.into(),
        }
    }
}

impl From<ManifestError> for ApiError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Invalid(fields) => api_validation_error(fields),
            ManifestError::Source(source) => source.into(),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::UnknownService(service) => {
                api_not_found(format!("service '{service}' not found or inactive"))
            }
            RefreshError::Source(source) => source.into(),
        }
    }
}
