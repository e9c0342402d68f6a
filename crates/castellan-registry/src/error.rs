//! Error types for the source of record and administrative operations.

use castellan_types::ServiceName;
use serde::Serialize;
use thiserror::Error;

/// A validation failure tied to one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Path of the offending field, e.g. `roles[2].name`.
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by a [`SourceOfRecord`](crate::SourceOfRecord).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("source of record unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while recomputing an attribute set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The service does not exist or is deactivated.
    #[error("service '{0}' is not registered or inactive")]
    UnknownService(ServiceName),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Errors raised by manifest registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("invalid manifest: {} field error(s)", .0.len())]
    Invalid(Vec<FieldError>),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Errors raised by administrative mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    #[error("invalid request: {} field error(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Source(SourceError),
}

impl AdminError {
    pub(crate) fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        AdminError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<SourceError> for AdminError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::NotFound(what) => AdminError::NotFound(what),
            other @ SourceError::Unavailable(_) => AdminError::Source(other),
        }
    }
}
