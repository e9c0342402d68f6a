//! Source-of-record data model.

use castellan_types::{AttributeType, AttributeValue, RoleId, ServiceName, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a role assignment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(u64);

impl AssignmentId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered service. Deactivation soft-disables all of its roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: ServiceName,
    pub display_name: String,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

/// A role declared by a service. Unique per (service, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub service: ServiceName,
    pub name: String,
    pub display_name: String,
    /// Global roles apply without a resource id; the others are resource-scoped.
    pub is_global: bool,
}

/// A grant of a role to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub id: AssignmentId,
    pub subject_id: SubjectId,
    pub role_id: RoleId,
    pub resource_id: Option<String>,
    pub granted_by: Option<SubjectId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl RoleAssignment {
    /// Active iff not revoked and not expired. An assignment expiring exactly
    /// at `now` is already inactive.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// Fields of a new role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub subject_id: SubjectId,
    pub role_id: RoleId,
    pub resource_id: Option<String>,
    pub granted_by: Option<SubjectId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Declared schema of one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    /// `None` for global attributes that apply in every service.
    pub service: Option<ServiceName>,
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub default: Option<AttributeValue>,
}

/// A stored attribute value of one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValueRow {
    pub subject_id: SubjectId,
    /// Matches the scope of the governing definition.
    pub service: Option<ServiceName>,
    pub name: String,
    pub value: AttributeValue,
    pub updated_at: DateTime<Utc>,
}

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Unchanged,
}
