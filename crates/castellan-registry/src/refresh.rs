//! Attribute refresh.
//!
//! Recomputes a subject's attribute set for one service from the source of
//! record:
//!
//! 1. active roles: unrevoked, unexpired assignments of roles belonging to
//!    the service, provided the service is active. Global roles land in
//!    `roles`, resource-scoped grants in `scoped_roles`, and the earliest
//!    assignment expiry bounds the lifetime of the whole set
//! 2. attributes: stored values of the service and global scopes, checked
//!    against their definitions, with declared defaults substituted for
//!    missing required attributes
//!
//! The cache client writes the result through. Recomputation is idempotent,
//! so concurrent refreshes of the same key need no coordination.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use castellan_cache::{AttributeLoader, LoadError};
use castellan_types::{AttributeSet, ServiceName, SubjectId};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::RefreshError;
use crate::model::AttributeDefinition;
use crate::source::SourceOfRecord;

/// Default timeout of one source-of-record attempt.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on attempts per refresh.
pub const MAX_ATTEMPTS: u32 = 2;

/// Computes attribute sets from the source of record.
#[derive(Clone)]
pub struct AttributeRefresher {
    source: Arc<dyn SourceOfRecord>,
    timeout: Duration,
    max_attempts: u32,
}

impl std::fmt::Debug for AttributeRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeRefresher")
            .field("backend", &self.source.backend_name())
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl AttributeRefresher {
    pub fn new(source: Arc<dyn SourceOfRecord>) -> Self {
        Self {
            source,
            timeout: DEFAULT_SOURCE_TIMEOUT,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the attempt budget, clamped to `1..=MAX_ATTEMPTS`.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.clamp(1, MAX_ATTEMPTS);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Computes the attribute set of `subject_id` in `service` as of `now`.
    pub async fn compute(
        &self,
        subject_id: SubjectId,
        service: &ServiceName,
        now: DateTime<Utc>,
    ) -> Result<AttributeSet, RefreshError> {
        let active_service = self
            .source
            .get_service(service)
            .await?
            .filter(|s| s.active);
        if active_service.is_none() {
            return Err(RefreshError::UnknownService(service.clone()));
        }

        let mut attrs = AttributeSet::new(subject_id, service.clone(), now);

        let roles: HashMap<_, _> = self
            .source
            .roles_for_service(service)
            .await?
            .into_iter()
            .map(|r| (r.id, (r.name, r.is_global)))
            .collect();
        for assignment in self.source.assignments_for_subject(subject_id).await? {
            if !assignment.is_active(now) {
                continue;
            }
            let Some((name, is_global)) = roles.get(&assignment.role_id) else {
                continue;
            };
            match (*is_global, assignment.resource_id.as_deref()) {
                (true, None) => {
                    attrs.roles.insert(name.clone());
                }
                (false, Some(resource_id)) => {
                    attrs
                        .scoped_roles
                        .entry(name.clone())
                        .or_default()
                        .insert(resource_id.to_string());
                }
                _ => {
                    warn!(
                        %subject_id,
                        %service,
                        role = %name,
                        assignment = %assignment.id,
                        "assignment scope does not match its role, ignored"
                    );
                    continue;
                }
            }
            if let Some(expires_at) = assignment.expires_at {
                attrs.bound_expiry(expires_at);
            }
        }

        let definitions = self.source.attribute_definitions(service).await?;
        let values = self.source.attribute_values(subject_id, service).await?;

        // Global values first so service-scoped values of the same name win.
        let mut ordered = values;
        ordered.sort_by_key(|v| v.service.is_some());
        for row in ordered {
            let Some(definition) = find_definition(&definitions, row.service.as_ref(), &row.name)
            else {
                debug!(%subject_id, %service, attribute = %row.name, "value without definition ignored");
                continue;
            };
            if row.value.attribute_type() != definition.attr_type {
                warn!(
                    %subject_id,
                    %service,
                    attribute = %row.name,
                    expected = %definition.attr_type,
                    found = %row.value.attribute_type(),
                    "stored attribute value does not match its definition"
                );
                continue;
            }
            attrs.attributes.insert(row.name, row.value);
        }

        for definition in &definitions {
            if !definition.required || attrs.attributes.contains_key(&definition.name) {
                continue;
            }
            if let Some(default) = &definition.default {
                attrs
                    .attributes
                    .insert(definition.name.clone(), default.clone());
            }
        }

        Ok(attrs)
    }
}

fn find_definition<'a>(
    definitions: &'a [AttributeDefinition],
    scope: Option<&ServiceName>,
    name: &str,
) -> Option<&'a AttributeDefinition> {
    definitions
        .iter()
        .find(|d| d.name == name && d.service.as_ref() == scope)
}

#[async_trait]
impl AttributeLoader for AttributeRefresher {
    /// Runs [`compute`](AttributeRefresher::compute) with a per-attempt
    /// timeout and the configured attempt budget.
    async fn load(
        &self,
        subject_id: SubjectId,
        service: &ServiceName,
    ) -> Result<AttributeSet, LoadError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.timeout, self.compute(subject_id, service, Utc::now()))
                .await
            {
                Ok(Ok(attrs)) => return Ok(attrs),
                Ok(Err(RefreshError::UnknownService(name))) => {
                    return Err(LoadError::UnknownService(name.to_string()));
                }
                Ok(Err(RefreshError::Source(e))) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", self.timeout),
            }
            warn!(%subject_id, %service, attempt, error = %last_error, "source of record attempt failed");
        }
        Err(LoadError::SourceUnavailable(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySource;
    use crate::model::{AttributeValueRow, NewAssignment};
    use castellan_types::{AttributeType, AttributeValue};
    use chrono::Duration as ChronoDuration;

    fn billing() -> ServiceName {
        ServiceName::new("billing_api").unwrap()
    }

    async fn seeded() -> Arc<InMemorySource> {
        let source = Arc::new(InMemorySource::new());
        let now = Utc::now();
        source.upsert_service(&billing(), "Billing", now).await.unwrap();
        source
            .upsert_attribute_definition(AttributeDefinition {
                service: Some(billing()),
                name: "tier".to_string(),
                attr_type: AttributeType::String,
                required: true,
                default: Some(AttributeValue::String("free".to_string())),
            })
            .await
            .unwrap();
        source
            .upsert_attribute_definition(AttributeDefinition {
                service: None,
                name: "region".to_string(),
                attr_type: AttributeType::String,
                required: false,
                default: None,
            })
            .await
            .unwrap();
        source
    }

    async fn grant(source: &InMemorySource, role: &str, expires_at: Option<DateTime<Utc>>) {
        grant_scoped(source, role, None, expires_at).await;
    }

    async fn grant_scoped(
        source: &InMemorySource,
        role: &str,
        resource_id: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let (role, _) = source
            .upsert_role(&billing(), role, role, resource_id.is_none())
            .await
            .unwrap();
        source
            .insert_assignment(NewAssignment {
                subject_id: SubjectId::new(42),
                role_id: role.id,
                resource_id: resource_id.map(str::to_string),
                granted_by: None,
                granted_at: Utc::now(),
                expires_at,
                reason: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_compute_roles_and_defaults() {
        let source = seeded().await;
        grant(&source, "billing_admin", None).await;
        grant(&source, "auditor", Some(Utc::now() - ChronoDuration::hours(1))).await;

        let attrs = AttributeRefresher::new(source)
            .compute(SubjectId::new(42), &billing(), Utc::now())
            .await
            .unwrap();

        assert_eq!(
            attrs.roles.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["billing_admin"]
        );
        assert_eq!(
            attrs.attribute("tier"),
            Some(&AttributeValue::String("free".to_string()))
        );
        assert_eq!(attrs.attribute("region"), None);
    }

    #[tokio::test]
    async fn test_earliest_expiry_bounds_the_set() {
        let source = seeded().await;
        let now = Utc::now();
        grant(&source, "billing_admin", Some(now + ChronoDuration::hours(2))).await;
        grant(&source, "auditor", Some(now + ChronoDuration::minutes(5))).await;
        grant(&source, "viewer", None).await;
        grant(&source, "former", Some(now - ChronoDuration::minutes(1))).await;

        let attrs = AttributeRefresher::new(source)
            .compute(SubjectId::new(42), &billing(), now)
            .await
            .unwrap();

        assert_eq!(attrs.roles.len(), 3);
        assert_eq!(attrs.expires_at, Some(now + ChronoDuration::minutes(5)));
    }

    #[tokio::test]
    async fn test_unbounded_set_without_expiring_assignments() {
        let source = seeded().await;
        grant(&source, "billing_admin", None).await;

        let attrs = AttributeRefresher::new(source)
            .compute(SubjectId::new(42), &billing(), Utc::now())
            .await
            .unwrap();
        assert_eq!(attrs.expires_at, None);
    }

    #[tokio::test]
    async fn test_scoped_grants_stay_out_of_global_roles() {
        let source = seeded().await;
        grant_scoped(&source, "editor", Some("doc-5"), None).await;

        let attrs = AttributeRefresher::new(source)
            .compute(SubjectId::new(42), &billing(), Utc::now())
            .await
            .unwrap();

        assert!(!attrs.has_role("editor"));
        assert!(attrs.has_role_on("editor", "doc-5"));
        assert!(!attrs.has_role_on("editor", "doc-999"));
    }

    #[tokio::test]
    async fn test_stored_values_and_global_scope() {
        let source = seeded().await;
        let now = Utc::now();
        for (scope, name, value) in [
            (Some(billing()), "tier", AttributeValue::String("gold".to_string())),
            (None, "region", AttributeValue::String("eu".to_string())),
            (Some(billing()), "undeclared", AttributeValue::Integer(1)),
        ] {
            source
                .put_attribute_value(AttributeValueRow {
                    subject_id: SubjectId::new(42),
                    service: scope,
                    name: name.to_string(),
                    value,
                    updated_at: now,
                })
                .await
                .unwrap();
        }

        let attrs = AttributeRefresher::new(source)
            .compute(SubjectId::new(42), &billing(), now)
            .await
            .unwrap();

        assert_eq!(
            attrs.attribute("tier"),
            Some(&AttributeValue::String("gold".to_string()))
        );
        assert_eq!(
            attrs.attribute("region"),
            Some(&AttributeValue::String("eu".to_string()))
        );
        assert_eq!(attrs.attribute("undeclared"), None);
    }

    #[tokio::test]
    async fn test_mistyped_value_is_dropped_and_default_used() {
        let source = seeded().await;
        source
            .put_attribute_value(AttributeValueRow {
                subject_id: SubjectId::new(42),
                service: Some(billing()),
                name: "tier".to_string(),
                value: AttributeValue::Integer(3),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let attrs = AttributeRefresher::new(source)
            .compute(SubjectId::new(42), &billing(), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            attrs.attribute("tier"),
            Some(&AttributeValue::String("free".to_string()))
        );
    }

    #[tokio::test]
    async fn test_inactive_service_excludes_everything() {
        let source = seeded().await;
        grant(&source, "billing_admin", None).await;
        source.set_service_active(&billing(), false).await.unwrap();

        let err = AttributeRefresher::new(source)
            .compute(SubjectId::new(42), &billing(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, RefreshError::UnknownService(billing()));
    }

    #[tokio::test]
    async fn test_load_retries_then_fails() {
        let source = seeded().await;
        source.set_available(false);
        let before = source.operation_count();

        let refresher = AttributeRefresher::new(source.clone()).with_max_attempts(5);
        assert_eq!(refresher.max_attempts(), 2);

        let err = refresher
            .load(SubjectId::new(42), &billing())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable(_)));
        assert_eq!(source.operation_count() - before, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_times_out_slow_source() {
        let source = seeded().await;
        source.set_latency(Duration::from_secs(30));

        let err = AttributeRefresher::new(source)
            .with_timeout(Duration::from_millis(100))
            .with_max_attempts(1)
            .load(SubjectId::new(42), &billing())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable(msg) if msg.contains("timed out")));
    }
}
