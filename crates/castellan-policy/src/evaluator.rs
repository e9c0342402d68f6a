//! Decision evaluator.
//!
//! Applies the policy mapped to an (entity type, action) pair. Every path that
//! is not an explicit allow from a registered policy resolves to deny:
//! unmapped actions, unknown policy names, missing attribute sets, policy
//! errors and policy panics.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use castellan_types::{AttributeSet, Resource};
use tracing::{debug, error, warn};

use crate::metrics::METRICS;
use crate::predicate::StoragePredicate;
use crate::registry::PolicyRegistry;

// ============================================================================
// Policy Table
// ============================================================================

/// Mapping from action name to policy name for one protectable entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    entity_type: String,
    actions: BTreeMap<String, String>,
}

impl PolicyTable {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            actions: BTreeMap::new(),
        }
    }

    /// Maps `action` to the registered policy `policy`.
    #[must_use]
    pub fn action(mut self, action: impl Into<String>, policy: impl Into<String>) -> Self {
        self.actions.insert(action.into(), policy.into());
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the policy name mapped to `action`.
    pub fn policy_for(&self, action: &str) -> Option<&str> {
        self.actions.get(action).map(String::as_str)
    }

    /// Iterates over all mapped actions.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

/// An entity type that declares which policy guards each of its actions.
///
/// Implemented explicitly per entity type; nothing is discovered implicitly.
///
/// ```
/// use std::sync::LazyLock;
/// use castellan_policy::{PolicyTable, Protectable};
/// use castellan_types::{AttributeValue, Resource};
///
/// struct Invoice { id: u64, customer_id: i64 }
///
/// static INVOICE_POLICIES: LazyLock<PolicyTable> = LazyLock::new(|| {
///     PolicyTable::new("invoice")
///         .action("view", "customer_match")
///         .action("void", "billing_admin")
/// });
///
/// impl Resource for Invoice {
///     fn resource_id(&self) -> Option<String> { Some(self.id.to_string()) }
///     fn attribute(&self, name: &str) -> Option<AttributeValue> {
///         (name == "customerId").then(|| AttributeValue::Integer(self.customer_id))
///     }
/// }
///
/// impl Protectable for Invoice {
///     fn policy_table() -> &'static PolicyTable { &INVOICE_POLICIES }
/// }
/// ```
pub trait Protectable: Resource {
    fn policy_table() -> &'static PolicyTable
    where
        Self: Sized;
}

// ============================================================================
// Outcome
// ============================================================================

/// Internal outcome of a single evaluation.
///
/// Callers only ever see the boolean from [`Outcome::is_allowed`]; the
/// distinct deny reasons exist for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Denied,
    Unmapped,
    UnknownPolicy,
    NoAttributes,
    PolicyFailed,
}

impl Outcome {
    pub fn is_allowed(self) -> bool {
        matches!(self, Outcome::Allowed)
    }
}

/// How a list view should restrict a collection for one action.
#[derive(Debug, Clone, PartialEq)]
pub enum ListScope {
    /// Apply this predicate at the storage layer.
    Predicate(StoragePredicate),
    /// The policy cannot be translated; evaluate each item.
    PerItem,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates access requests against the frozen policy registry.
#[derive(Debug, Clone)]
pub struct DecisionEvaluator {
    registry: PolicyRegistry,
}

impl DecisionEvaluator {
    pub fn new(registry: PolicyRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Returns whether `action` on `resource` is allowed.
    ///
    /// `attrs` is `None` when the caller is anonymous or the attribute lookup
    /// failed; such checks are denied.
    pub fn check_access<R: Protectable>(
        &self,
        attrs: Option<&AttributeSet>,
        resource: &R,
        action: &str,
    ) -> bool {
        self.evaluate(R::policy_table(), attrs, resource, action)
            .is_allowed()
    }

    /// Same as [`check_access`](Self::check_access) for entity types described at runtime.
    pub fn check_with_table(
        &self,
        table: &PolicyTable,
        attrs: Option<&AttributeSet>,
        resource: &dyn Resource,
        action: &str,
    ) -> bool {
        self.evaluate(table, attrs, resource, action).is_allowed()
    }

    /// Returns the subset of mapped actions currently allowed on `resource`.
    ///
    /// For UI affordances only. The protected operation must re-check at
    /// execution time.
    pub fn allowed_actions<R: Protectable>(
        &self,
        attrs: Option<&AttributeSet>,
        resource: &R,
    ) -> Vec<String> {
        self.allowed_actions_with_table(R::policy_table(), attrs, resource)
    }

    pub fn allowed_actions_with_table(
        &self,
        table: &PolicyTable,
        attrs: Option<&AttributeSet>,
        resource: &dyn Resource,
    ) -> Vec<String> {
        table
            .actions()
            .filter(|action| self.evaluate(table, attrs, resource, action).is_allowed())
            .map(str::to_string)
            .collect()
    }

    /// Evaluates one request and returns the internal outcome.
    pub fn evaluate(
        &self,
        table: &PolicyTable,
        attrs: Option<&AttributeSet>,
        resource: &dyn Resource,
        action: &str,
    ) -> Outcome {
        let outcome = self.evaluate_inner(table, attrs, resource, action);
        METRICS.record(outcome);
        outcome
    }

    fn evaluate_inner(
        &self,
        table: &PolicyTable,
        attrs: Option<&AttributeSet>,
        resource: &dyn Resource,
        action: &str,
    ) -> Outcome {
        let entity_type = table.entity_type();

        let Some(policy_name) = table.policy_for(action) else {
            debug!(entity_type, action, "no policy mapped for action");
            return Outcome::Unmapped;
        };

        let policy = match self.registry.get(policy_name) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(entity_type, action, policy = policy_name, error = %e, "unknown policy");
                return Outcome::UnknownPolicy;
            }
        };

        let Some(attrs) = attrs else {
            debug!(entity_type, action, policy = policy_name, "no attribute set");
            return Outcome::NoAttributes;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            policy.evaluate(attrs, resource, action)
        }));

        match result {
            Ok(Ok(true)) => {
                debug!(
                    subject_id = %attrs.subject_id,
                    entity_type,
                    action,
                    policy = policy_name,
                    "access allowed"
                );
                Outcome::Allowed
            }
            Ok(Ok(false)) => {
                debug!(
                    subject_id = %attrs.subject_id,
                    entity_type,
                    action,
                    policy = policy_name,
                    "access denied"
                );
                Outcome::Denied
            }
            Ok(Err(e)) => {
                error!(
                    policy = policy_name,
                    entity_type,
                    resource_id = ?resource.resource_id(),
                    action,
                    error = %e,
                    "policy evaluation failed"
                );
                Outcome::PolicyFailed
            }
            Err(_) => {
                error!(
                    policy = policy_name,
                    entity_type,
                    resource_id = ?resource.resource_id(),
                    action,
                    "policy panicked during evaluation"
                );
                Outcome::PolicyFailed
            }
        }
    }

    /// Determines how a list view should restrict a collection for `action`.
    pub fn list_scope(
        &self,
        table: &PolicyTable,
        attrs: Option<&AttributeSet>,
        action: &str,
    ) -> ListScope {
        let Some(policy) = table
            .policy_for(action)
            .and_then(|name| self.registry.get(name).ok())
        else {
            return ListScope::Predicate(StoragePredicate::Nothing);
        };
        let Some(attrs) = attrs else {
            return ListScope::Predicate(StoragePredicate::Nothing);
        };
        if !policy.is_translatable() {
            return ListScope::PerItem;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| policy.predicate(attrs))) {
            Ok(Some(predicate)) => ListScope::Predicate(predicate),
            Ok(None) => ListScope::PerItem,
            Err(_) => {
                error!(
                    entity_type = table.entity_type(),
                    action, "policy predicate panicked"
                );
                ListScope::Predicate(StoragePredicate::Nothing)
            }
        }
    }

    /// Filters a collection down to the items on which `action` is allowed.
    ///
    /// Uses the policy's storage predicate when it has one, otherwise falls
    /// back to evaluating each item.
    pub fn filter_collection<R: Protectable>(
        &self,
        attrs: Option<&AttributeSet>,
        items: Vec<R>,
        action: &str,
    ) -> Vec<R> {
        let table = R::policy_table();
        match self.list_scope(table, attrs, action) {
            ListScope::Predicate(predicate) => items
                .into_iter()
                .filter(|item| predicate.matches(item))
                .collect(),
            ListScope::PerItem => items
                .into_iter()
                .filter(|item| self.evaluate(table, attrs, item, action).is_allowed())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Policy, PolicyError};
    use crate::standard::StandardPolicies;
    use castellan_types::{AttributeValue, ServiceName, SubjectId};
    use chrono::Utc;
    use std::sync::LazyLock;

    struct Document {
        id: u64,
        owner_id: i64,
    }

    static DOCUMENT_POLICIES: LazyLock<PolicyTable> = LazyLock::new(|| {
        PolicyTable::new("document")
            .action("view", "owner")
            .action("publish", "editor")
            .action("archive", "owner_or_editor")
            .action("purge", "not_registered")
            .action("explode", "panics")
            .action("fail", "errors")
    });

    impl Resource for Document {
        fn resource_id(&self) -> Option<String> {
            Some(self.id.to_string())
        }

        fn attribute(&self, name: &str) -> Option<AttributeValue> {
            (name == "owner_id").then_some(AttributeValue::Integer(self.owner_id))
        }
    }

    impl Protectable for Document {
        fn policy_table() -> &'static PolicyTable {
            &DOCUMENT_POLICIES
        }
    }

    fn evaluator() -> DecisionEvaluator {
        let mut builder = PolicyRegistry::builder();
        builder
            .register("owner", StandardPolicies::owner("owner_id"))
            .unwrap()
            .register("editor", StandardPolicies::require_role("editor"))
            .unwrap()
            .register(
                "owner_or_editor",
                StandardPolicies::any_of(vec![
                    StandardPolicies::owner("owner_id"),
                    StandardPolicies::require_role("editor"),
                ]),
            )
            .unwrap()
            .register("panics", Policy::new(|_, _, _| panic!("policy bug")))
            .unwrap()
            .register(
                "errors",
                Policy::new(|_, _, _| Err(PolicyError::Failed("boom".to_string()))),
            )
            .unwrap();
        DecisionEvaluator::new(builder.build())
    }

    fn subject(id: u64) -> AttributeSet {
        AttributeSet::new(
            SubjectId::new(id),
            ServiceName::new("docs").unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_check_access_owner() {
        let evaluator = evaluator();
        let doc = Document { id: 1, owner_id: 7 };

        assert!(evaluator.check_access(Some(&subject(7)), &doc, "view"));
        assert!(!evaluator.check_access(Some(&subject(8)), &doc, "view"));
    }

    #[test]
    fn test_unmapped_action_denies() {
        let evaluator = evaluator();
        let doc = Document { id: 1, owner_id: 7 };
        let table = Document::policy_table();

        assert_eq!(
            evaluator.evaluate(table, Some(&subject(7)), &doc, "delete"),
            Outcome::Unmapped
        );
        assert!(!evaluator.check_access(Some(&subject(7)), &doc, "delete"));
    }

    #[test]
    fn test_unknown_policy_denies() {
        let evaluator = evaluator();
        let doc = Document { id: 1, owner_id: 7 };

        assert_eq!(
            evaluator.evaluate(Document::policy_table(), Some(&subject(7)), &doc, "purge"),
            Outcome::UnknownPolicy
        );
    }

    #[test]
    fn test_missing_attributes_denies() {
        let evaluator = evaluator();
        let doc = Document { id: 1, owner_id: 7 };

        assert_eq!(
            evaluator.evaluate(Document::policy_table(), None, &doc, "view"),
            Outcome::NoAttributes
        );
        assert!(!evaluator.check_access(None, &doc, "view"));
    }

    #[test]
    fn test_policy_panic_and_error_deny() {
        let evaluator = evaluator();
        let doc = Document { id: 1, owner_id: 7 };
        let editor = subject(1).with_role("editor");

        assert_eq!(
            evaluator.evaluate(Document::policy_table(), Some(&editor), &doc, "explode"),
            Outcome::PolicyFailed
        );
        assert_eq!(
            evaluator.evaluate(Document::policy_table(), Some(&editor), &doc, "fail"),
            Outcome::PolicyFailed
        );
        assert!(!evaluator.check_access(Some(&editor), &doc, "explode"));
    }

    #[test]
    fn test_policy_failures_are_counted_separately() {
        let evaluator = evaluator();
        let doc = Document { id: 1, owner_id: 7 };
        let before = METRICS.snapshot().policy_errors_total;

        assert!(!evaluator.check_access(Some(&subject(1)), &doc, "fail"));

        assert!(METRICS.snapshot().policy_errors_total > before);
    }

    #[test]
    fn test_allowed_actions() {
        let evaluator = evaluator();
        let doc = Document { id: 1, owner_id: 7 };

        let owner_actions = evaluator.allowed_actions(Some(&subject(7)), &doc);
        assert_eq!(owner_actions, vec!["archive".to_string(), "view".to_string()]);

        let editor_actions = evaluator.allowed_actions(Some(&subject(9).with_role("editor")), &doc);
        assert_eq!(
            editor_actions,
            vec!["archive".to_string(), "publish".to_string()]
        );

        assert!(evaluator.allowed_actions(None, &doc).is_empty());
    }

    #[test]
    fn test_filter_collection_with_predicate() {
        let evaluator = evaluator();
        let docs = vec![
            Document { id: 1, owner_id: 7 },
            Document { id: 2, owner_id: 8 },
            Document { id: 3, owner_id: 7 },
        ];

        assert_eq!(
            evaluator.list_scope(Document::policy_table(), Some(&subject(7)), "view"),
            ListScope::Predicate(
                StandardPolicies::owner("owner_id")
                    .predicate(&subject(7))
                    .unwrap()
            )
        );

        let visible = evaluator.filter_collection(Some(&subject(7)), docs, "view");
        let ids: Vec<u64> = visible.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_filter_collection_falls_back_per_item() {
        let evaluator = evaluator();
        let docs = vec![
            Document { id: 1, owner_id: 7 },
            Document { id: 2, owner_id: 8 },
        ];

        assert_eq!(
            evaluator.list_scope(Document::policy_table(), Some(&subject(7)), "archive"),
            ListScope::PerItem
        );

        let visible = evaluator.filter_collection(Some(&subject(7)), docs, "archive");
        let ids: Vec<u64> = visible.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_filter_collection_without_attributes_is_empty() {
        let evaluator = evaluator();
        let docs = vec![Document { id: 1, owner_id: 7 }];

        assert!(evaluator.filter_collection(None, docs, "view").is_empty());
    }
}
