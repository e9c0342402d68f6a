//! Error types for cache operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while talking to the attribute cache.
///
/// Every variant is transient from the caller's point of view. Identity
/// lookups degrade to "no attributes" rather than propagating these.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store could not be reached.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the configured timeout.
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// An attribute set could not be encoded for storage.
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    /// Recomputing an attribute set from the source of record failed.
    #[error("attribute refresh failed: {0}")]
    Refresh(#[from] LoadError),
}

impl CacheError {
    /// Returns true when the store itself is unreachable or slow.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CacheError::Unavailable(_) | CacheError::Timeout(_))
    }
}

/// Errors raised by an [`AttributeLoader`](crate::AttributeLoader).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The service is unknown or inactive; there is nothing to compute.
    #[error("service '{0}' is not registered or inactive")]
    UnknownService(String),

    /// The source of record failed or timed out on every attempt.
    #[error("source of record unavailable: {0}")]
    SourceUnavailable(String),
}
