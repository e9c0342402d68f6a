//! Source-of-record abstraction.
//!
//! The durable store behind services, roles, assignments and attribute
//! values. Every cached attribute set is reconstructable from it.

use async_trait::async_trait;
use castellan_types::{RoleId, ServiceName, SubjectId};
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::model::{
    AttributeDefinition, AttributeValueRow, NewAssignment, Role, RoleAssignment, Service, Upsert,
};

pub type SourceResult<T> = Result<T, SourceError>;

/// Durable store of authorization data.
#[async_trait]
pub trait SourceOfRecord: Send + Sync {
    // --- services ---

    /// Creates the service, or updates its display name. Never changes the
    /// active flag of an existing service.
    async fn upsert_service(
        &self,
        name: &ServiceName,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> SourceResult<Upsert>;

    async fn get_service(&self, name: &ServiceName) -> SourceResult<Option<Service>>;

    /// Sets the active flag. Returns whether it changed.
    async fn set_service_active(&self, name: &ServiceName, active: bool) -> SourceResult<bool>;

    // --- roles ---

    /// Creates or updates the role keyed by (service, name).
    async fn upsert_role(
        &self,
        service: &ServiceName,
        name: &str,
        display_name: &str,
        is_global: bool,
    ) -> SourceResult<(Role, Upsert)>;

    async fn get_role(&self, id: RoleId) -> SourceResult<Option<Role>>;

    async fn find_role(&self, service: &ServiceName, name: &str) -> SourceResult<Option<Role>>;

    async fn roles_for_service(&self, service: &ServiceName) -> SourceResult<Vec<Role>>;

    // --- assignments ---

    async fn insert_assignment(&self, assignment: NewAssignment) -> SourceResult<RoleAssignment>;

    /// Revokes every unrevoked assignment of `role_id` held by `subject_id`.
    /// Returns the assignments that were revoked.
    async fn revoke_assignments(
        &self,
        subject_id: SubjectId,
        role_id: RoleId,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> SourceResult<Vec<RoleAssignment>>;

    /// All assignments of a subject, including revoked and expired ones.
    async fn assignments_for_subject(&self, subject_id: SubjectId)
    -> SourceResult<Vec<RoleAssignment>>;

    /// Subjects holding any unrevoked assignment of a role in `service`.
    async fn subjects_in_service(&self, service: &ServiceName) -> SourceResult<Vec<SubjectId>>;

    /// Unrevoked assignments whose expiry falls in `(after, up_to]`.
    async fn assignments_expiring(
        &self,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> SourceResult<Vec<RoleAssignment>>;

    // --- attributes ---

    /// Creates or updates the definition keyed by (service scope, name).
    async fn upsert_attribute_definition(
        &self,
        definition: AttributeDefinition,
    ) -> SourceResult<Upsert>;

    async fn find_attribute_definition(
        &self,
        service: Option<&ServiceName>,
        name: &str,
    ) -> SourceResult<Option<AttributeDefinition>>;

    /// Definitions of `service` plus all global definitions.
    async fn attribute_definitions(
        &self,
        service: &ServiceName,
    ) -> SourceResult<Vec<AttributeDefinition>>;

    /// Writes one value, replacing any previous value for the same
    /// (subject, scope, name).
    async fn put_attribute_value(&self, row: AttributeValueRow) -> SourceResult<()>;

    /// Values of `subject_id` scoped to `service` plus its global values.
    async fn attribute_values(
        &self,
        subject_id: SubjectId,
        service: &ServiceName,
    ) -> SourceResult<Vec<AttributeValueRow>>;

    // --- health ---

    async fn ping(&self) -> SourceResult<()>;

    fn backend_name(&self) -> &'static str;
}
