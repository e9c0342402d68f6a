//! Cache key layout.
//!
//! Entries are namespaced per (subject, service):
//!
//! ```text
//! {prefix}:attrs:{subject_id}:{service}
//! ```
//!
//! Service names cannot contain `:`, so the subject prefix
//! `{prefix}:attrs:{subject_id}:` selects exactly that subject's entries.

use castellan_types::{ServiceName, SubjectId};

/// Builds store keys under a configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key of one attribute set entry.
    pub fn attribute_set(&self, subject_id: SubjectId, service: &ServiceName) -> String {
        format!("{}:attrs:{subject_id}:{service}", self.prefix)
    }

    /// Prefix shared by every entry of one subject.
    pub fn subject_prefix(&self, subject_id: SubjectId) -> String {
        format!("{}:attrs:{subject_id}:", self.prefix)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("authz")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = CacheKeys::default();
        let service = ServiceName::new("billing_api").unwrap();

        assert_eq!(
            keys.attribute_set(SubjectId::new(42), &service),
            "authz:attrs:42:billing_api"
        );
        assert!(
            keys.attribute_set(SubjectId::new(42), &service)
                .starts_with(&keys.subject_prefix(SubjectId::new(42)))
        );
    }

    #[test]
    fn test_subject_prefix_does_not_match_other_subjects() {
        let keys = CacheKeys::new("t");
        let service = ServiceName::new("svc").unwrap();

        assert!(
            !keys
                .attribute_set(SubjectId::new(420), &service)
                .starts_with(&keys.subject_prefix(SubjectId::new(42)))
        );
    }
}
