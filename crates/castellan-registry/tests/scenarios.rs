//! End-to-end authorization scenarios: manifest registration, administrative
//! mutations, cache refresh and policy decisions wired together the way a
//! host service wires them.

use std::sync::{Arc, LazyLock};

use castellan_cache::{AttributeCacheClient, CacheSettings, InMemoryStore};
use castellan_policy::{DecisionEvaluator, PolicyRegistry, PolicyTable, Protectable, StandardPolicies};
use castellan_registry::{
    Admin, AdminError, AttributeRefresher, ChangePropagator, ExpirySweeper, GrantRequest,
    InMemorySource, Manifest, RevokeRequest, SetAttributeRequest, SourceOfRecord,
};
use castellan_types::{
    AttributeSet, AttributeValue, Resource, ResourceAttributes, ServiceName, SubjectId,
};
use chrono::{Duration, Utc};
use serde_json::json;

const SUBJECT: SubjectId = SubjectId::new(42);

struct Invoice {
    customer_id: i64,
}

static INVOICE_POLICIES: LazyLock<PolicyTable> = LazyLock::new(|| {
    PolicyTable::new("invoice")
        .action("view", "customer_match")
        .action("edit", "billing_admin")
        .action("annotate", "invoice_editor")
});

impl Resource for Invoice {
    fn resource_id(&self) -> Option<String> {
        None
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        (name == "customerId").then_some(AttributeValue::Integer(self.customer_id))
    }
}

impl Protectable for Invoice {
    fn policy_table() -> &'static PolicyTable {
        &INVOICE_POLICIES
    }
}

struct Harness {
    source: Arc<InMemorySource>,
    store: Arc<InMemoryStore>,
    cache: AttributeCacheClient,
    admin: Admin,
    evaluator: DecisionEvaluator,
}

impl Harness {
    async fn new(eager_refresh: bool) -> Self {
        let source = Arc::new(InMemorySource::new());
        let store = Arc::new(InMemoryStore::new());
        let cache = AttributeCacheClient::new(
            store.clone(),
            Arc::new(AttributeRefresher::new(source.clone())),
            CacheSettings::default(),
        );
        let propagator =
            ChangePropagator::new(cache.clone(), source.clone()).with_eager_refresh(eager_refresh);
        let admin = Admin::new(source.clone(), propagator);

        let mut registry = PolicyRegistry::builder();
        registry
            .register("customer_match", StandardPolicies::customer_match())
            .unwrap()
            .register("billing_admin", StandardPolicies::require_role("billing_admin"))
            .unwrap()
            .register(
                "invoice_editor",
                StandardPolicies::require_role_on_resource("invoice_editor"),
            )
            .unwrap();

        let harness = Self {
            source,
            store,
            cache,
            admin,
            evaluator: DecisionEvaluator::new(registry.build()),
        };
        harness
            .admin
            .register_manifest(&billing_manifest(), Utc::now())
            .await
            .unwrap();
        harness
    }

    async fn attrs(&self) -> Option<AttributeSet> {
        self.cache.get(SUBJECT, &billing(), true).await.unwrap()
    }

    async fn grant(&self, role: &str, expires_in: Option<Duration>) {
        self.admin
            .grant(
                GrantRequest {
                    subject_id: SUBJECT,
                    service_name: "billing_api".to_string(),
                    role_name: role.to_string(),
                    resource_id: None,
                    expires_at: expires_in.map(|d| Utc::now() + d),
                    reason: Some("test".to_string()),
                },
                None,
                Utc::now(),
            )
            .await
            .unwrap();
    }

    async fn can(&self, action: &str, invoice: &Invoice) -> bool {
        self.evaluator
            .check_access(self.attrs().await.as_ref(), invoice, action)
    }
}

fn billing() -> ServiceName {
    ServiceName::new("billing_api").unwrap()
}

fn billing_manifest() -> Manifest {
    serde_json::from_value(json!({
        "serviceName": "billing_api",
        "displayName": "Billing",
        "roles": [
            {"name": "billing_admin", "displayName": "Billing administrator"},
            {"name": "auditor"},
            {"name": "invoice_editor", "isGlobal": false}
        ],
        "attributes": [
            {"name": "customer_ids", "type": "integer_list", "required": true, "default": []}
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn scenario_a_granted_role_allows_mapped_action() {
    let h = Harness::new(false).await;
    h.grant("billing_admin", None).await;

    assert!(h.can("edit", &Invoice { customer_id: 1 }).await);
}

#[tokio::test]
async fn scenario_b_expired_grant_denies() {
    let h = Harness::new(false).await;
    h.grant("billing_admin", Some(Duration::hours(-1))).await;

    assert!(!h.can("edit", &Invoice { customer_id: 1 }).await);
}

#[tokio::test]
async fn cached_grant_lapses_at_its_expiry() {
    let h = Harness::new(false).await;
    h.grant("billing_admin", Some(Duration::milliseconds(500))).await;

    // The grant invalidated the entry; this read recomputes and caches it.
    assert!(h.attrs().await.unwrap().has_role("billing_admin"));
    assert_eq!(h.store.len(), 1);
    assert!(h.can("edit", &Invoice { customer_id: 1 }).await);

    tokio::time::sleep(std::time::Duration::from_millis(900)).await;

    assert!(!h.attrs().await.unwrap().has_role("billing_admin"));
    assert!(!h.can("edit", &Invoice { customer_id: 1 }).await);
}

#[tokio::test]
async fn resource_scoped_grant_only_covers_its_resource() {
    let h = Harness::new(false).await;
    h.admin
        .grant(
            GrantRequest {
                subject_id: SUBJECT,
                service_name: "billing_api".to_string(),
                role_name: "invoice_editor".to_string(),
                resource_id: Some("inv-5".to_string()),
                expires_at: None,
                reason: None,
            },
            None,
            Utc::now(),
        )
        .await
        .unwrap();

    let attrs = h.attrs().await.unwrap();
    assert!(!attrs.has_role("invoice_editor"));

    let invoice = |id: &str| ResourceAttributes::new().with_id(id);
    assert!(h.evaluator.check_with_table(
        &INVOICE_POLICIES,
        Some(&attrs),
        &invoice("inv-5"),
        "annotate"
    ));
    assert!(!h.evaluator.check_with_table(
        &INVOICE_POLICIES,
        Some(&attrs),
        &invoice("inv-999"),
        "annotate"
    ));
}

#[tokio::test]
async fn scenario_c_customer_match() {
    let h = Harness::new(false).await;
    h.admin
        .set_attribute(
            SetAttributeRequest {
                subject_id: SUBJECT,
                service_name: Some("billing_api".to_string()),
                name: "customer_ids".to_string(),
                value: json!([100, 200]),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    assert!(!h.can("view", &Invoice { customer_id: 300 }).await);
    assert!(h.can("view", &Invoice { customer_id: 100 }).await);
}

#[tokio::test]
async fn scenario_d_store_and_source_down_denies_without_error() {
    let h = Harness::new(false).await;
    h.grant("billing_admin", None).await;

    h.store.set_available(false);
    h.source.set_available(false);

    let attrs = h.cache.get(SUBJECT, &billing(), true).await;
    assert!(matches!(attrs, Ok(None)));
    assert!(!h.can("edit", &Invoice { customer_id: 1 }).await);
}

#[tokio::test]
async fn scenario_e_later_manifest_never_drops_definitions() {
    let h = Harness::new(false).await;
    let v1: Manifest = serde_json::from_value(json!({
        "serviceName": "crm",
        "roles": [{"name": "agent"}],
        "attributes": [
            {"name": "team", "type": "string"},
            {"name": "seniority", "type": "integer"}
        ]
    }))
    .unwrap();
    let v2: Manifest = serde_json::from_value(json!({
        "serviceName": "crm",
        "attributes": [
            {"name": "seniority", "type": "integer"},
            {"name": "languages", "type": "string_list"}
        ]
    }))
    .unwrap();

    h.admin.register_manifest(&v1, Utc::now()).await.unwrap();
    let report = h.admin.register_manifest(&v2, Utc::now()).await.unwrap();
    assert_eq!(report.attributes.created, 1);
    assert_eq!(report.attributes.unchanged, 1);

    let crm = ServiceName::new("crm").unwrap();
    let mut names: Vec<String> = h
        .source
        .attribute_definitions(&crm)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["languages", "seniority", "team"]);

    // The role declared only by the first manifest is still there.
    assert!(h.source.find_role(&crm, "agent").await.unwrap().is_some());
}

#[tokio::test]
async fn refresh_then_get_matches_active_assignments() {
    let h = Harness::new(false).await;
    h.grant("billing_admin", None).await;
    h.grant("auditor", Some(Duration::hours(-1))).await;

    let refreshed = h.cache.refresh(SUBJECT, &billing()).await.unwrap();
    let cached = h.cache.get(SUBJECT, &billing(), false).await.unwrap().unwrap();

    assert_eq!(refreshed.roles, cached.roles);
    assert_eq!(
        cached.roles.into_iter().collect::<Vec<_>>(),
        vec!["billing_admin".to_string()]
    );
}

#[tokio::test]
async fn revoke_removes_role_from_unexpired_cache_entry() {
    let h = Harness::new(false).await;
    h.grant("billing_admin", None).await;
    assert!(h.attrs().await.unwrap().has_role("billing_admin"));

    let role = h
        .source
        .find_role(&billing(), "billing_admin")
        .await
        .unwrap()
        .unwrap();
    let outcome = h
        .admin
        .revoke(
            RevokeRequest {
                subject_id: SUBJECT,
                role_id: role.id,
                reason: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.revoked.len(), 1);
    assert_eq!(outcome.propagation.invalidated, 1);

    assert!(!h.attrs().await.unwrap().has_role("billing_admin"));
}

#[tokio::test]
async fn global_attribute_change_invalidates_every_service() {
    let h = Harness::new(false).await;
    let global: Manifest = serde_json::from_value(json!({
        "serviceName": "directory",
        "attributes": [{"name": "region", "type": "string", "global": true}]
    }))
    .unwrap();
    h.admin.register_manifest(&global, Utc::now()).await.unwrap();
    assert!(h.attrs().await.unwrap().attribute("region").is_none());

    let outcome = h
        .admin
        .set_attribute(
            SetAttributeRequest {
                subject_id: SUBJECT,
                service_name: None,
                name: "region".to_string(),
                value: json!("eu"),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.propagation.invalidated, 1);
    assert_eq!(
        h.attrs().await.unwrap().attribute("region"),
        Some(&AttributeValue::String("eu".to_string()))
    );
}

#[tokio::test]
async fn invalid_attribute_value_is_a_field_error() {
    let h = Harness::new(false).await;
    let err = h
        .admin
        .set_attribute(
            SetAttributeRequest {
                subject_id: SUBJECT,
                service_name: Some("billing_api".to_string()),
                name: "customer_ids".to_string(),
                value: json!("not a list"),
            },
            Utc::now(),
        )
        .await
        .unwrap_err();

    let AdminError::Validation(fields) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert_eq!(fields[0].field, "value");
}

#[tokio::test]
async fn grant_of_undeclared_role_is_rejected() {
    let h = Harness::new(false).await;
    let err = h
        .admin
        .grant(
            GrantRequest {
                subject_id: SUBJECT,
                service_name: "billing_api".to_string(),
                role_name: "superuser".to_string(),
                resource_id: None,
                expires_at: None,
                reason: None,
            },
            None,
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::Validation(_)));
}

#[tokio::test]
async fn deactivation_invalidates_all_subjects_in_one_batch() {
    let h = Harness::new(false).await;
    let role = h
        .source
        .find_role(&billing(), "billing_admin")
        .await
        .unwrap()
        .unwrap();
    for id in 1..=5 {
        h.admin
            .grant(
                GrantRequest {
                    subject_id: SubjectId::new(id),
                    service_name: "billing_api".to_string(),
                    role_name: role.name.clone(),
                    resource_id: None,
                    expires_at: None,
                    reason: None,
                },
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        h.cache
            .get(SubjectId::new(id), &billing(), true)
            .await
            .unwrap();
    }
    assert_eq!(h.store.len(), 5);

    let mut events = h.cache.subscribe_invalidations().await.unwrap();
    let outcome = h
        .admin
        .set_service_active("billing_api", false)
        .await
        .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.propagation.invalidated, 5);
    assert_eq!(events.next().await.unwrap().targets.len(), 5);
    assert!(h.store.is_empty());

    // Inactive service: no attribute set, so every check is denied.
    assert!(h.cache.get(SubjectId::new(1), &billing(), true).await.unwrap().is_none());

    let again = h
        .admin
        .set_service_active("billing_api", false)
        .await
        .unwrap();
    assert!(!again.changed);
}

#[tokio::test]
async fn eager_refresh_repopulates_after_grant() {
    let h = Harness::new(true).await;
    h.grant("billing_admin", None).await;

    assert_eq!(h.store.len(), 1);
    let cached = h.cache.get(SUBJECT, &billing(), false).await.unwrap().unwrap();
    assert!(cached.has_role("billing_admin"));
}

#[tokio::test]
async fn sweep_invalidates_newly_expired_entries() {
    let h = Harness::new(false).await;
    let start = Utc::now();
    h.grant("billing_admin", Some(Duration::seconds(30))).await;
    assert!(h.attrs().await.unwrap().has_role("billing_admin"));
    assert_eq!(h.store.len(), 1);

    let sweeper = ExpirySweeper::new(
        h.source.clone(),
        h.admin.propagator().clone(),
        std::time::Duration::from_secs(60),
    );
    let swept = sweeper
        .sweep(start, start + Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(swept, 1);
    assert!(h.store.is_empty());
}
