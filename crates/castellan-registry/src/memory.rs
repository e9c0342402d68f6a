//! In-memory implementation of [`SourceOfRecord`].
//!
//! All state sits behind one `tokio::sync::RwLock`: writes are serialized,
//! reads run concurrently. Not durable; intended for tests, local
//! development and single-node deployments that reload manifests on start.
//!
//! Like the cache store it can be switched unavailable or slowed down to
//! exercise refresh timeouts and retries.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use castellan_types::{RoleId, ServiceName, SubjectId};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::SourceError;
use crate::model::{
    AssignmentId, AttributeDefinition, AttributeValueRow, NewAssignment, Role, RoleAssignment,
    Service, Upsert,
};
use crate::source::{SourceOfRecord, SourceResult};

type ScopedKey = (Option<ServiceName>, String);

#[derive(Debug, Default)]
struct State {
    services: BTreeMap<ServiceName, Service>,
    roles: BTreeMap<RoleId, Role>,
    role_index: HashMap<(ServiceName, String), RoleId>,
    assignments: Vec<RoleAssignment>,
    definitions: BTreeMap<ScopedKey, AttributeDefinition>,
    values: HashMap<(SubjectId, Option<ServiceName>, String), AttributeValueRow>,
    next_role_id: u64,
    next_assignment_id: u64,
}

/// Process-local source of record.
#[derive(Debug, Default)]
pub struct InMemorySource {
    state: RwLock<State>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    reads: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Adds artificial latency to every operation.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of operations served so far.
    pub fn operation_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Row counts: (services, roles, attribute definitions).
    pub async fn row_counts(&self) -> (usize, usize, usize) {
        let state = self.state.read().await;
        (
            state.services.len(),
            state.roles.len(),
            state.definitions.len(),
        )
    }

    async fn guard(&self) -> SourceResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(
                "in-memory source is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceOfRecord for InMemorySource {
    async fn upsert_service(
        &self,
        name: &ServiceName,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> SourceResult<Upsert> {
        self.guard().await?;
        let mut state = self.state.write().await;
        match state.services.get_mut(name) {
            Some(existing) if existing.display_name == display_name => Ok(Upsert::Unchanged),
            Some(existing) => {
                existing.display_name = display_name.to_string();
                Ok(Upsert::Updated)
            }
            None => {
                state.services.insert(
                    name.clone(),
                    Service {
                        name: name.clone(),
                        display_name: display_name.to_string(),
                        active: true,
                        registered_at: now,
                    },
                );
                Ok(Upsert::Created)
            }
        }
    }

    async fn get_service(&self, name: &ServiceName) -> SourceResult<Option<Service>> {
        self.guard().await?;
        Ok(self.state.read().await.services.get(name).cloned())
    }

    async fn set_service_active(&self, name: &ServiceName, active: bool) -> SourceResult<bool> {
        self.guard().await?;
        let mut state = self.state.write().await;
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| SourceError::NotFound(format!("service '{name}'")))?;
        let changed = service.active != active;
        service.active = active;
        Ok(changed)
    }

    async fn upsert_role(
        &self,
        service: &ServiceName,
        name: &str,
        display_name: &str,
        is_global: bool,
    ) -> SourceResult<(Role, Upsert)> {
        self.guard().await?;
        let mut state = self.state.write().await;
        if !state.services.contains_key(service) {
            return Err(SourceError::NotFound(format!("service '{service}'")));
        }

        let key = (service.clone(), name.to_string());
        if let Some(id) = state.role_index.get(&key).copied() {
            let role = state
                .roles
                .get_mut(&id)
                .ok_or_else(|| SourceError::NotFound(format!("role {id}")))?;
            if role.display_name == display_name && role.is_global == is_global {
                return Ok((role.clone(), Upsert::Unchanged));
            }
            role.display_name = display_name.to_string();
            role.is_global = is_global;
            return Ok((role.clone(), Upsert::Updated));
        }

        state.next_role_id += 1;
        let role = Role {
            id: RoleId::new(state.next_role_id),
            service: service.clone(),
            name: name.to_string(),
            display_name: display_name.to_string(),
            is_global,
        };
        state.role_index.insert(key, role.id);
        state.roles.insert(role.id, role.clone());
        Ok((role, Upsert::Created))
    }

    async fn get_role(&self, id: RoleId) -> SourceResult<Option<Role>> {
        self.guard().await?;
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn find_role(&self, service: &ServiceName, name: &str) -> SourceResult<Option<Role>> {
        self.guard().await?;
        let state = self.state.read().await;
        Ok(state
            .role_index
            .get(&(service.clone(), name.to_string()))
            .and_then(|id| state.roles.get(id))
            .cloned())
    }

    async fn roles_for_service(&self, service: &ServiceName) -> SourceResult<Vec<Role>> {
        self.guard().await?;
        Ok(self
            .state
            .read()
            .await
            .roles
            .values()
            .filter(|r| &r.service == service)
            .cloned()
            .collect())
    }

    async fn insert_assignment(&self, assignment: NewAssignment) -> SourceResult<RoleAssignment> {
        self.guard().await?;
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&assignment.role_id) {
            return Err(SourceError::NotFound(format!("role {}", assignment.role_id)));
        }
        state.next_assignment_id += 1;
        let row = RoleAssignment {
            id: AssignmentId::new(state.next_assignment_id),
            subject_id: assignment.subject_id,
            role_id: assignment.role_id,
            resource_id: assignment.resource_id,
            granted_by: assignment.granted_by,
            granted_at: assignment.granted_at,
            expires_at: assignment.expires_at,
            revoked_at: None,
            reason: assignment.reason,
        };
        state.assignments.push(row.clone());
        Ok(row)
    }

    async fn revoke_assignments(
        &self,
        subject_id: SubjectId,
        role_id: RoleId,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> SourceResult<Vec<RoleAssignment>> {
        self.guard().await?;
        let mut state = self.state.write().await;
        let mut revoked = Vec::new();
        for a in state
            .assignments
            .iter_mut()
            .filter(|a| a.subject_id == subject_id && a.role_id == role_id && a.revoked_at.is_none())
        {
            a.revoked_at = Some(at);
            if reason.is_some() {
                a.reason.clone_from(&reason);
            }
            revoked.push(a.clone());
        }
        Ok(revoked)
    }

    async fn assignments_for_subject(
        &self,
        subject_id: SubjectId,
    ) -> SourceResult<Vec<RoleAssignment>> {
        self.guard().await?;
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|a| a.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn subjects_in_service(&self, service: &ServiceName) -> SourceResult<Vec<SubjectId>> {
        self.guard().await?;
        let state = self.state.read().await;
        let mut subjects: Vec<SubjectId> = state
            .assignments
            .iter()
            .filter(|a| a.revoked_at.is_none())
            .filter(|a| state.roles.get(&a.role_id).is_some_and(|r| &r.service == service))
            .map(|a| a.subject_id)
            .collect();
        subjects.sort_unstable();
        subjects.dedup();
        Ok(subjects)
    }

    async fn assignments_expiring(
        &self,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> SourceResult<Vec<RoleAssignment>> {
        self.guard().await?;
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|a| a.revoked_at.is_none())
            .filter(|a| a.expires_at.is_some_and(|e| e > after && e <= up_to))
            .cloned()
            .collect())
    }

    async fn upsert_attribute_definition(
        &self,
        definition: AttributeDefinition,
    ) -> SourceResult<Upsert> {
        self.guard().await?;
        let mut state = self.state.write().await;
        if let Some(service) = &definition.service {
            if !state.services.contains_key(service) {
                return Err(SourceError::NotFound(format!("service '{service}'")));
            }
        }

        let key = (definition.service.clone(), definition.name.clone());
        match state.definitions.get_mut(&key) {
            Some(existing) if *existing == definition => Ok(Upsert::Unchanged),
            Some(existing) => {
                *existing = definition;
                Ok(Upsert::Updated)
            }
            None => {
                state.definitions.insert(key, definition);
                Ok(Upsert::Created)
            }
        }
    }

    async fn find_attribute_definition(
        &self,
        service: Option<&ServiceName>,
        name: &str,
    ) -> SourceResult<Option<AttributeDefinition>> {
        self.guard().await?;
        Ok(self
            .state
            .read()
            .await
            .definitions
            .get(&(service.cloned(), name.to_string()))
            .cloned())
    }

    async fn attribute_definitions(
        &self,
        service: &ServiceName,
    ) -> SourceResult<Vec<AttributeDefinition>> {
        self.guard().await?;
        Ok(self
            .state
            .read()
            .await
            .definitions
            .values()
            .filter(|d| d.service.as_ref().is_none_or(|s| s == service))
            .cloned()
            .collect())
    }

    async fn put_attribute_value(&self, row: AttributeValueRow) -> SourceResult<()> {
        self.guard().await?;
        let mut state = self.state.write().await;
        let key = (row.subject_id, row.service.clone(), row.name.clone());
        state.values.insert(key, row);
        Ok(())
    }

    async fn attribute_values(
        &self,
        subject_id: SubjectId,
        service: &ServiceName,
    ) -> SourceResult<Vec<AttributeValueRow>> {
        self.guard().await?;
        Ok(self
            .state
            .read()
            .await
            .values
            .values()
            .filter(|v| v.subject_id == subject_id)
            .filter(|v| v.service.as_ref().is_none_or(|s| s == service))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> SourceResult<()> {
        self.guard().await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
