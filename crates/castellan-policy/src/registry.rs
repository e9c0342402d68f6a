//! Process-wide policy registry.
//!
//! Policies are registered on a [`PolicyRegistryBuilder`] during startup and
//! frozen into an immutable [`PolicyRegistry`] before the host service begins
//! serving. There is no late or concurrent mutation after `build()`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use castellan_types::{AttributeSet, Resource};
use thiserror::Error;

use crate::predicate::StoragePredicate;

/// Error raised by a policy function during evaluation.
///
/// Any `PolicyError` resolves to deny at the evaluator boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The policy needs a resource attribute the resource does not expose.
    #[error("resource attribute '{0}' is missing")]
    MissingResourceAttribute(String),

    /// Evaluation failed for another reason.
    #[error("policy evaluation failed: {0}")]
    Failed(String),
}

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A policy with this name was already registered.
    #[error("policy '{0}' is already registered")]
    Duplicate(String),

    /// No policy with this name is registered.
    #[error("policy '{0}' is not registered")]
    NotFound(String),
}

/// Signature of a pure decision function: (attribute set, resource, action) → allow?
///
/// Policy functions must not perform I/O.
pub type PolicyFn =
    dyn Fn(&AttributeSet, &dyn Resource, &str) -> Result<bool, PolicyError> + Send + Sync;

/// Translates a policy into a storage-level predicate for a given subject.
///
/// Returns `None` when the policy cannot be expressed as a predicate.
pub type PredicateFn = dyn Fn(&AttributeSet) -> Option<StoragePredicate> + Send + Sync;

/// A named, pure, stateless decision function.
#[derive(Clone)]
pub struct Policy {
    check: Arc<PolicyFn>,
    predicate: Option<Arc<PredicateFn>>,
}

impl Policy {
    /// Wraps a decision function.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&AttributeSet, &dyn Resource, &str) -> Result<bool, PolicyError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            check: Arc::new(check),
            predicate: None,
        }
    }

    /// Attaches a storage-predicate translation used by bulk filtering.
    #[must_use]
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&AttributeSet) -> Option<StoragePredicate> + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Invokes the decision function.
    pub fn evaluate(
        &self,
        attrs: &AttributeSet,
        resource: &dyn Resource,
        action: &str,
    ) -> Result<bool, PolicyError> {
        (self.check)(attrs, resource, action)
    }

    /// Translates this policy into a storage predicate, if it supports translation.
    pub fn predicate(&self, attrs: &AttributeSet) -> Option<StoragePredicate> {
        self.predicate.as_ref().and_then(|p| p(attrs))
    }

    pub fn is_translatable(&self) -> bool {
        self.predicate.is_some()
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("translatable", &self.is_translatable())
            .finish_non_exhaustive()
    }
}

/// Collects policy registrations before the registry is frozen.
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    policies: HashMap<String, Policy>,
}

impl PolicyRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a policy under `name`.
    ///
    /// Registering the same name twice fails deterministically; the first
    /// registration is kept.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        policy: Policy,
    ) -> Result<&mut Self, RegistryError> {
        let name = name.into();
        if self.policies.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!(policy = %name, "policy registered");
        self.policies.insert(name, policy);
        Ok(self)
    }

    /// Freezes the registrations into an immutable registry.
    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            policies: Arc::new(self.policies),
        }
    }
}

/// Immutable map of policy names to decision functions.
///
/// Cheap to clone; all clones share the same frozen map.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: Arc<HashMap<String, Policy>>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::new()
    }

    /// Looks up a policy by name.
    pub fn get(&self, name: &str) -> Result<&Policy, RegistryError> {
        self.policies
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Returns all registered policy names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
