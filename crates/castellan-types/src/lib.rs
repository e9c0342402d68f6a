//! # castellan-types: Core types for `Castellan`
//!
//! This crate contains shared types used across the `Castellan` authorization core:
//! - Entity IDs ([`SubjectId`], [`RoleId`], [`ServiceName`])
//! - Typed attribute values ([`AttributeType`], [`AttributeValue`])
//! - Resolved per-service bundles ([`AttributeSet`], [`AttributeSetWire`])
//! - Protectable resources ([`Resource`], [`ResourceAttributes`])

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod attributes;
mod resource;

pub use attributes::{AttributeSet, AttributeSetWire, AttributeType, AttributeValue};
pub use resource::{Resource, ResourceAttributes};

// ============================================================================
// Errors
// ============================================================================

/// Errors raised when constructing or converting core types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// A service name does not match the restricted identifier pattern.
    #[error("invalid service name {name:?}: {reason}")]
    InvalidServiceName { name: String, reason: &'static str },

    /// An attribute type tag is not one of the supported tags.
    #[error("unsupported attribute type {0:?}")]
    UnsupportedType(String),

    /// A raw value does not match its declared type tag.
    #[error("value does not match declared type {expected}")]
    TypeMismatch { expected: AttributeType },
}

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Verified identifier of the subject (user or service account) making a request.
///
/// Only ever produced from a verified token or an administrative call; the
/// authorization core never authenticates on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(u64);

impl SubjectId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubjectId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SubjectId> for u64 {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

/// Identifier of a role row in the source of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(u64);

impl RoleId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RoleId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<RoleId> for u64 {
    fn from(id: RoleId) -> Self {
        id.0
    }
}

// ============================================================================
// Service Name
// ============================================================================

/// Maximum length of a service name.
pub const SERVICE_NAME_MAX_LEN: usize = 64;

/// Unique, validated name of a service that registers a manifest.
///
/// Service names are restricted identifiers: a lowercase ASCII letter followed
/// by lowercase letters, digits, `_` or `-`, at most [`SERVICE_NAME_MAX_LEN`]
/// characters. They are embedded in cache keys, so the restriction keeps keys
/// unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Validates and wraps a service name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        validate_service_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_service_name(name: &str) -> Result<(), TypeError> {
    let invalid = |reason| TypeError::InvalidServiceName {
        name: name.to_string(),
        reason,
    };

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(invalid("must not be empty"));
    };
    if name.len() > SERVICE_NAME_MAX_LEN {
        return Err(invalid("must be at most 64 characters"));
    }
    if !first.is_ascii_lowercase() {
        return Err(invalid("must start with a lowercase letter"));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(invalid(
            "may only contain lowercase letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("billing_api" ; "snake case")]
    #[test_case("crm-web" ; "kebab case")]
    #[test_case("a" ; "single letter")]
    #[test_case("svc2" ; "trailing digit")]
    fn test_service_name_accepts(name: &str) {
        assert_eq!(ServiceName::new(name).unwrap().as_str(), name);
    }

    #[test_case("" ; "empty")]
    #[test_case("Billing" ; "uppercase")]
    #[test_case("2fa" ; "leading digit")]
    #[test_case("billing api" ; "whitespace")]
    #[test_case("billing:api" ; "key separator")]
    fn test_service_name_rejects(name: &str) {
        assert!(matches!(
            ServiceName::new(name),
            Err(TypeError::InvalidServiceName { .. })
        ));
    }

    #[test]
    fn test_service_name_too_long() {
        let name = "a".repeat(SERVICE_NAME_MAX_LEN + 1);
        assert!(ServiceName::new(name).is_err());
        assert!(ServiceName::new("a".repeat(SERVICE_NAME_MAX_LEN)).is_ok());
    }

    #[test]
    fn test_service_name_serde_validates() {
        let ok: ServiceName = serde_json::from_str("\"billing_api\"").unwrap();
        assert_eq!(ok.as_str(), "billing_api");

        let bad = serde_json::from_str::<ServiceName>("\"Not Valid\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_subject_id_is_transparent() {
        let id = SubjectId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(u64::from(id), 42);
        assert_eq!(id.to_string(), "42");
    }

    proptest! {
        #[test]
        fn prop_service_name_never_contains_separator(name in "\\PC{0,80}") {
            if let Ok(service) = ServiceName::new(name) {
                prop_assert!(!service.as_str().contains(':'));
                prop_assert!(service.as_str().len() <= SERVICE_NAME_MAX_LEN);
            }
        }
    }
}
