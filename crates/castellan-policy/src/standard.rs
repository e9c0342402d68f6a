//! Standard policy constructors.
//!
//! These cover the policies most services need. Each one is pure and, where
//! possible, carries a storage-predicate translation so list endpoints can
//! filter at the storage layer.

use castellan_types::{AttributeSet, AttributeValue};

use crate::predicate::{FilterOperator, RowFilter, StoragePredicate};
use crate::registry::{Policy, PolicyError};

/// Standard policies.
pub struct StandardPolicies;

impl StandardPolicies {
    /// Allows every subject that has an attribute set.
    pub fn allow_all() -> Policy {
        Policy::new(|_, _, _| Ok(true)).with_predicate(|_| Some(StoragePredicate::All))
    }

    /// Denies everything.
    pub fn deny_all() -> Policy {
        Policy::new(|_, _, _| Ok(false)).with_predicate(|_| Some(StoragePredicate::Nothing))
    }

    /// Allows subjects holding `role` in the evaluated service.
    pub fn require_role(role: impl Into<String>) -> Policy {
        let role = role.into();
        let check_role = role.clone();
        Policy::new(move |attrs, _, _| Ok(attrs.has_role(&check_role))).with_predicate(
            move |attrs| {
                Some(if attrs.has_role(&role) {
                    StoragePredicate::All
                } else {
                    StoragePredicate::Nothing
                })
            },
        )
    }

    /// Allows subjects holding `role` globally, or scoped to the evaluated resource.
    ///
    /// Resources without an id only match a global grant. In list views a
    /// global grant allows everything; scoped grants alone fall back to
    /// per-item evaluation.
    pub fn require_role_on_resource(role: impl Into<String>) -> Policy {
        let role = role.into();
        let check_role = role.clone();
        Policy::new(move |attrs, resource, _| {
            Ok(match resource.resource_id() {
                Some(id) => attrs.has_role_on(&check_role, &id),
                None => attrs.has_role(&check_role),
            })
        })
        .with_predicate(move |attrs| {
            if attrs.has_role(&role) {
                Some(StoragePredicate::All)
            } else if attrs.scoped_resources(&role).is_some() {
                None
            } else {
                Some(StoragePredicate::Nothing)
            }
        })
    }

    /// Allows subjects holding any of `roles`.
    pub fn require_any_role<I, S>(roles: I) -> Policy
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        let check_roles = roles.clone();
        Policy::new(move |attrs, _, _| Ok(check_roles.iter().any(|r| attrs.has_role(r))))
            .with_predicate(move |attrs| {
                Some(if roles.iter().any(|r| attrs.has_role(r)) {
                    StoragePredicate::All
                } else {
                    StoragePredicate::Nothing
                })
            })
    }

    /// Allows subjects that own the resource.
    ///
    /// The resource exposes its owner's subject id as the integer attribute
    /// `owner_field`. A resource without that attribute is an evaluation error.
    /// Subject ids outside the integer attribute range own nothing.
    pub fn owner(owner_field: impl Into<String>) -> Policy {
        let field = owner_field.into();
        let check_field = field.clone();
        Policy::new(move |attrs, resource, _| {
            let owner = resource
                .attribute(&check_field)
                .ok_or_else(|| PolicyError::MissingResourceAttribute(check_field.clone()))?;
            Ok(subject_value(attrs).is_some_and(|me| owner == me))
        })
        .with_predicate(move |attrs| {
            Some(match subject_value(attrs) {
                Some(me) => {
                    StoragePredicate::filter(RowFilter::new(field.clone(), FilterOperator::Eq, me))
                }
                None => StoragePredicate::Nothing,
            })
        })
    }

    /// Allows subjects whose attribute `subject_attribute` matches the
    /// resource attribute `resource_attribute`.
    ///
    /// A list-valued subject attribute matches when it contains the resource
    /// value. A subject without the attribute is denied; a resource without
    /// the attribute is an evaluation error.
    pub fn attribute_matches(
        subject_attribute: impl Into<String>,
        resource_attribute: impl Into<String>,
    ) -> Policy {
        let subject_attribute = subject_attribute.into();
        let resource_attribute = resource_attribute.into();
        let (check_subject, check_resource) = (subject_attribute.clone(), resource_attribute.clone());

        Policy::new(move |attrs, resource, _| {
            let Some(expected) = attrs.attribute(&check_subject) else {
                return Ok(false);
            };
            let actual = resource
                .attribute(&check_resource)
                .ok_or_else(|| PolicyError::MissingResourceAttribute(check_resource.clone()))?;
            Ok(expected.matches(&actual))
        })
        .with_predicate(move |attrs| {
            let Some(expected) = attrs.attribute(&subject_attribute) else {
                return Some(StoragePredicate::Nothing);
            };
            let operator = match expected {
                AttributeValue::IntegerList(_) | AttributeValue::StringList(_)
                    if expected.literals().is_empty() =>
                {
                    return Some(StoragePredicate::Nothing);
                }
                AttributeValue::IntegerList(_) | AttributeValue::StringList(_) => {
                    FilterOperator::In
                }
                _ => FilterOperator::Eq,
            };
            Some(StoragePredicate::filter(RowFilter::new(
                resource_attribute.clone(),
                operator,
                expected.clone(),
            )))
        })
    }

    /// Allows subjects whose `customer_ids` attribute contains the resource's `customerId`.
    pub fn customer_match() -> Policy {
        Self::attribute_matches("customer_ids", "customerId")
    }

    /// Allows when any of `policies` allows.
    ///
    /// A failing member counts as a deny for that member only. Combinations
    /// are not translatable and fall back to per-item evaluation in list views.
    pub fn any_of(policies: Vec<Policy>) -> Policy {
        Policy::new(move |attrs, resource, action| {
            Ok(policies
                .iter()
                .any(|p| p.evaluate(attrs, resource, action).unwrap_or(false)))
        })
    }

    /// Allows when all of `policies` allow. Any member error is an error.
    pub fn all_of(policies: Vec<Policy>) -> Policy {
        Policy::new(move |attrs, resource, action| {
            for p in &policies {
                if !p.evaluate(attrs, resource, action)? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

fn subject_value(attrs: &AttributeSet) -> Option<AttributeValue> {
    i64::try_from(u64::from(attrs.subject_id))
        .ok()
        .map(AttributeValue::Integer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::{ResourceAttributes, ServiceName, SubjectId};
    use chrono::Utc;

    fn subject(id: u64) -> AttributeSet {
        AttributeSet::new(
            SubjectId::new(id),
            ServiceName::new("billing_api").unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_require_role() {
        let policy = StandardPolicies::require_role("billing_admin");
        let resource = ResourceAttributes::new();

        assert_eq!(
            policy.evaluate(&subject(42).with_role("billing_admin"), &resource, "edit"),
            Ok(true)
        );
        assert_eq!(policy.evaluate(&subject(42), &resource, "edit"), Ok(false));
        assert_eq!(
            policy.predicate(&subject(42)),
            Some(StoragePredicate::Nothing)
        );
    }

    #[test]
    fn test_owner_policy() {
        let policy = StandardPolicies::owner("owner_id");
        let owned = ResourceAttributes::new().with_attribute("owner_id", AttributeValue::Integer(7));

        assert_eq!(policy.evaluate(&subject(7), &owned, "edit"), Ok(true));
        assert_eq!(policy.evaluate(&subject(8), &owned, "edit"), Ok(false));
        assert_eq!(
            policy.evaluate(&subject(7), &ResourceAttributes::new(), "edit"),
            Err(PolicyError::MissingResourceAttribute("owner_id".to_string()))
        );
        assert_eq!(
            policy.predicate(&subject(7)).unwrap().to_where_clause().unwrap(),
            "owner_id = 7"
        );
    }

    #[test]
    fn test_owner_rejects_subject_ids_beyond_integer_range() {
        let policy = StandardPolicies::owner("owner_id");
        let max_owned =
            ResourceAttributes::new().with_attribute("owner_id", AttributeValue::Integer(i64::MAX));

        assert_eq!(policy.evaluate(&subject(u64::MAX), &max_owned, "edit"), Ok(false));
        assert_eq!(
            policy.evaluate(&subject(i64::MAX.unsigned_abs() + 1), &max_owned, "edit"),
            Ok(false)
        );
        assert_eq!(policy.evaluate(&subject(i64::MAX.unsigned_abs()), &max_owned, "edit"), Ok(true));
        assert_eq!(
            policy.predicate(&subject(u64::MAX)),
            Some(StoragePredicate::Nothing)
        );
    }

    #[test]
    fn test_require_role_on_resource() {
        let policy = StandardPolicies::require_role_on_resource("editor");
        let scoped = subject(42).with_scoped_role("editor", "doc-5");
        let doc = |id: &str| ResourceAttributes::new().with_id(id);

        assert_eq!(policy.evaluate(&scoped, &doc("doc-5"), "edit"), Ok(true));
        assert_eq!(policy.evaluate(&scoped, &doc("doc-999"), "edit"), Ok(false));
        assert_eq!(policy.evaluate(&scoped, &ResourceAttributes::new(), "edit"), Ok(false));
        assert_eq!(policy.predicate(&scoped), None);

        let global = subject(42).with_role("editor");
        assert_eq!(policy.evaluate(&global, &doc("doc-999"), "edit"), Ok(true));
        assert_eq!(policy.predicate(&global), Some(StoragePredicate::All));
        assert_eq!(policy.predicate(&subject(42)), Some(StoragePredicate::Nothing));
    }

    #[test]
    fn test_require_role_ignores_scoped_grants() {
        let policy = StandardPolicies::require_role("editor");
        let scoped = subject(42).with_scoped_role("editor", "doc-5");
        let doc = ResourceAttributes::new().with_id("doc-5");

        assert_eq!(policy.evaluate(&scoped, &doc, "edit"), Ok(false));
    }

    #[test]
    fn test_customer_match_with_no_customers_lists_nothing() {
        let policy = StandardPolicies::customer_match();
        let attrs = subject(42).with_attribute("customer_ids", AttributeValue::IntegerList(vec![]));

        let predicate = policy.predicate(&attrs).unwrap();
        assert_eq!(predicate, StoragePredicate::Nothing);
        assert_eq!(predicate.to_where_clause().unwrap(), "FALSE");
    }

    #[test]
    fn test_customer_match() {
        let policy = StandardPolicies::customer_match();
        let attrs =
            subject(42).with_attribute("customer_ids", AttributeValue::IntegerList(vec![100, 200]));
        let other =
            ResourceAttributes::new().with_attribute("customerId", AttributeValue::Integer(300));
        let mine =
            ResourceAttributes::new().with_attribute("customerId", AttributeValue::Integer(100));

        assert_eq!(policy.evaluate(&attrs, &other, "view"), Ok(false));
        assert_eq!(policy.evaluate(&attrs, &mine, "view"), Ok(true));
        assert_eq!(policy.evaluate(&subject(42), &mine, "view"), Ok(false));
        assert_eq!(
            policy.predicate(&attrs).unwrap().to_where_clause().unwrap(),
            "customerId IN (100, 200)"
        );
    }

    #[test]
    fn test_any_of_and_all_of() {
        let role_or_owner = StandardPolicies::any_of(vec![
            StandardPolicies::require_role("support"),
            StandardPolicies::owner("owner_id"),
        ]);
        let resource = ResourceAttributes::new().with_attribute("owner_id", AttributeValue::Integer(1));

        assert_eq!(role_or_owner.evaluate(&subject(1), &resource, "v"), Ok(true));
        assert_eq!(
            role_or_owner.evaluate(&subject(2).with_role("support"), &resource, "v"),
            Ok(true)
        );
        assert_eq!(role_or_owner.evaluate(&subject(2), &resource, "v"), Ok(false));
        assert!(!role_or_owner.is_translatable());

        let both = StandardPolicies::all_of(vec![
            StandardPolicies::require_role("support"),
            StandardPolicies::owner("owner_id"),
        ]);
        assert_eq!(both.evaluate(&subject(1), &resource, "v"), Ok(false));
        assert_eq!(
            both.evaluate(&subject(1).with_role("support"), &resource, "v"),
            Ok(true)
        );
    }
}
