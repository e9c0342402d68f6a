//! Runtime policy registry and entity tables built from configuration.

use std::collections::BTreeMap;

use castellan_config::{CastellanConfig, PolicySpec};
use castellan_policy::{Policy, PolicyRegistry, PolicyTable, StandardPolicies};
use tracing::{info, warn};

use crate::error::ServerResult;

/// Policy guarding the administrative endpoints when `auth.admin_role` is set.
pub const ADMIN_POLICY: &str = "castellan_admin";

/// Policies registered in every deployment.
pub const BUILTIN_POLICIES: [&str; 3] = ["allow_all", "customer_match", "deny_all"];

/// Builds a policy from its declarative description.
pub fn policy_from_spec(spec: &PolicySpec) -> Policy {
    match spec {
        PolicySpec::AllowAll => StandardPolicies::allow_all(),
        PolicySpec::DenyAll => StandardPolicies::deny_all(),
        PolicySpec::RequireRole { role } => StandardPolicies::require_role(role.clone()),
        PolicySpec::RequireRoleOnResource { role } => {
            StandardPolicies::require_role_on_resource(role.clone())
        }
        PolicySpec::RequireAnyRole { roles } => StandardPolicies::require_any_role(roles.clone()),
        PolicySpec::Owner { field } => StandardPolicies::owner(field.clone()),
        PolicySpec::AttributeMatch { subject, resource } => {
            StandardPolicies::attribute_matches(subject.clone(), resource.clone())
        }
    }
}

/// Registers the built-in policies, the admin policy when `auth.admin_role`
/// is set, then the configured ones.
///
/// A configured policy reusing a reserved name is rejected.
pub fn build_registry(config: &CastellanConfig) -> ServerResult<PolicyRegistry> {
    let mut builder = PolicyRegistry::builder();
    builder
        .register("allow_all", StandardPolicies::allow_all())?
        .register("customer_match", StandardPolicies::customer_match())?
        .register("deny_all", StandardPolicies::deny_all())?;
    if let Some(role) = &config.auth.admin_role {
        builder.register(ADMIN_POLICY, StandardPolicies::require_role(role.clone()))?;
    }

    for (name, spec) in &config.policies {
        builder.register(name.clone(), policy_from_spec(spec))?;
    }

    let registry = builder.build();
    info!(policies = registry.len(), "policy registry built");
    Ok(registry)
}

/// Policy tables of entity types checked over HTTP.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    tables: BTreeMap<String, PolicyTable>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds tables from `[entities]`, warning about unregistered policies.
    pub fn from_config(config: &CastellanConfig, registry: &PolicyRegistry) -> Self {
        let mut catalog = Self::new();
        for (entity, actions) in &config.entities {
            let mut table = PolicyTable::new(entity.clone());
            for (action, policy) in actions {
                if registry.get(policy).is_err() {
                    warn!(entity = %entity, action = %action, policy = %policy, "entity action maps to an unregistered policy; it will deny");
                }
                table = table.action(action.clone(), policy.clone());
            }
            catalog = catalog.with_table(table);
        }
        catalog
    }

    #[must_use]
    pub fn with_table(mut self, table: PolicyTable) -> Self {
        self.tables.insert(table.entity_type().to_string(), table);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&PolicyTable> {
        self.tables.get(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
