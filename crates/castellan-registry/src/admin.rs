//! Administrative mutations against the source of record.
//!
//! Each operation writes to the source of record and then calls the
//! [`ChangePropagator`] for exactly the (subject, service) pairs it touched.

use std::sync::Arc;

use castellan_types::{AttributeValue, RoleId, ServiceName, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AdminError, FieldError, ManifestError};
use crate::manifest::{self, Manifest, RegistrationReport};
use crate::model::{AttributeValueRow, NewAssignment, Role, RoleAssignment, Service};
use crate::propagation::{ChangePropagator, Propagation};
use crate::source::SourceOfRecord;

/// Grant a role to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub subject_id: SubjectId,
    pub service_name: String,
    pub role_name: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Revoke every active grant of a role from a subject.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub subject_id: SubjectId,
    pub role_id: RoleId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Set one attribute value. Without `service_name` the global definition is used.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAttributeRequest {
    pub subject_id: SubjectId,
    #[serde(default)]
    pub service_name: Option<String>,
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantOutcome {
    pub assignment: RoleAssignment,
    pub propagation: Propagation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeOutcome {
    pub revoked: Vec<RoleAssignment>,
    pub propagation: Propagation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAttributeOutcome {
    pub value: serde_json::Value,
    pub propagation: Propagation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationOutcome {
    pub service: Service,
    pub changed: bool,
    pub propagation: Propagation,
}

/// An assignment joined with its role, as listed for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: RoleAssignment,
    pub service_name: ServiceName,
    pub role_name: String,
    pub active: bool,
}

/// Administrative entry point used by the HTTP layer.
#[derive(Clone)]
pub struct Admin {
    source: Arc<dyn SourceOfRecord>,
    propagator: ChangePropagator,
}

impl std::fmt::Debug for Admin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admin")
            .field("backend", &self.source.backend_name())
            .field("propagator", &self.propagator)
            .finish()
    }
}

impl Admin {
    pub fn new(source: Arc<dyn SourceOfRecord>, propagator: ChangePropagator) -> Self {
        Self { source, propagator }
    }

    pub fn source(&self) -> &Arc<dyn SourceOfRecord> {
        &self.source
    }

    pub fn propagator(&self) -> &ChangePropagator {
        &self.propagator
    }

    /// Registers a service manifest.
    pub async fn register_manifest(
        &self,
        manifest: &Manifest,
        now: DateTime<Utc>,
    ) -> Result<RegistrationReport, ManifestError> {
        manifest::register(self.source.as_ref(), manifest, now).await
    }

    /// Grants a role. A past `expires_at` is accepted and yields an
    /// assignment that is never active.
    pub async fn grant(
        &self,
        request: GrantRequest,
        granted_by: Option<SubjectId>,
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome, AdminError> {
        let service = parse_service("serviceName", &request.service_name)?;
        self.require_service(&service).await?;

        let role = self
            .source
            .find_role(&service, &request.role_name)
            .await?
            .ok_or_else(|| {
                AdminError::field(
                    "roleName",
                    format!("role '{}' is not declared by '{service}'", request.role_name),
                )
            })?;

        match (role.is_global, &request.resource_id) {
            (true, Some(_)) => {
                return Err(AdminError::field(
                    "resourceId",
                    "global roles cannot be scoped to a resource",
                ));
            }
            (false, None) => {
                return Err(AdminError::field(
                    "resourceId",
                    "resource-scoped roles require a resource id",
                ));
            }
            _ => {}
        }

        let assignment = self
            .source
            .insert_assignment(NewAssignment {
                subject_id: request.subject_id,
                role_id: role.id,
                resource_id: request.resource_id,
                granted_by,
                granted_at: now,
                expires_at: request.expires_at,
                reason: request.reason,
            })
            .await?;

        info!(
            subject_id = %assignment.subject_id,
            service = %service,
            role = %role.name,
            expires_at = ?assignment.expires_at,
            "role granted"
        );

        let propagation = self
            .propagator
            .subject_changed(assignment.subject_id, Some(&service))
            .await;
        Ok(GrantOutcome {
            assignment,
            propagation,
        })
    }

    /// Revokes all active grants of a role. Revoking nothing is not an error.
    pub async fn revoke(
        &self,
        request: RevokeRequest,
        now: DateTime<Utc>,
    ) -> Result<RevokeOutcome, AdminError> {
        let role = self
            .source
            .get_role(request.role_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("role {}", request.role_id)))?;

        let revoked = self
            .source
            .revoke_assignments(request.subject_id, role.id, now, request.reason)
            .await?;

        info!(
            subject_id = %request.subject_id,
            service = %role.service,
            role = %role.name,
            revoked = revoked.len(),
            "role revoked"
        );

        // Invalidate even when nothing was revoked: an expired grant may still
        // sit in a cached set.
        let propagation = self
            .propagator
            .subject_changed(request.subject_id, Some(&role.service))
            .await;
        Ok(RevokeOutcome {
            revoked,
            propagation,
        })
    }

    /// Writes an attribute value after validating it against its definition.
    pub async fn set_attribute(
        &self,
        request: SetAttributeRequest,
        now: DateTime<Utc>,
    ) -> Result<SetAttributeOutcome, AdminError> {
        let service = match &request.service_name {
            Some(name) => {
                let service = parse_service("serviceName", name)?;
                self.require_service(&service).await?;
                Some(service)
            }
            None => None,
        };

        let definition = self
            .source
            .find_attribute_definition(service.as_ref(), &request.name)
            .await?
            .ok_or_else(|| {
                AdminError::field(
                    "name",
                    format!("attribute '{}' is not declared in this scope", request.name),
                )
            })?;

        let value = AttributeValue::from_json(definition.attr_type, &request.value)
            .map_err(|e| AdminError::field("value", e.to_string()))?;

        self.source
            .put_attribute_value(AttributeValueRow {
                subject_id: request.subject_id,
                service: service.clone(),
                name: request.name.clone(),
                value: value.clone(),
                updated_at: now,
            })
            .await?;

        info!(
            subject_id = %request.subject_id,
            service = ?service.as_ref().map(ServiceName::as_str),
            attribute = %request.name,
            "attribute value set"
        );

        let propagation = self
            .propagator
            .subject_changed(request.subject_id, service.as_ref())
            .await;
        Ok(SetAttributeOutcome {
            value: value.to_json(),
            propagation,
        })
    }

    /// Soft-toggles a service. Every subject holding one of its roles is
    /// invalidated in one batch.
    pub async fn set_service_active(
        &self,
        name: &str,
        active: bool,
    ) -> Result<ActivationOutcome, AdminError> {
        let service_name = parse_service("name", name)?;
        let changed = self
            .source
            .set_service_active(&service_name, active)
            .await?;
        let service = self.require_service_row(&service_name).await?;

        let propagation = if changed {
            info!(service = %service_name, active, "service activation changed");
            self.propagator.service_changed(&service_name).await
        } else {
            Propagation::default()
        };

        Ok(ActivationOutcome {
            service,
            changed,
            propagation,
        })
    }

    pub async fn list_roles(&self, service: &str) -> Result<Vec<Role>, AdminError> {
        let service = parse_service("name", service)?;
        self.require_service_row(&service).await?;
        let mut roles = self.source.roles_for_service(&service).await?;
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    /// Lists a subject's assignments, newest first, with their current state.
    pub async fn list_assignments(
        &self,
        subject_id: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AssignmentView>, AdminError> {
        let mut views = Vec::new();
        for assignment in self.source.assignments_for_subject(subject_id).await? {
            let Some(role) = self.source.get_role(assignment.role_id).await? else {
                continue;
            };
            let service_active = self
                .source
                .get_service(&role.service)
                .await?
                .is_some_and(|s| s.active);
            views.push(AssignmentView {
                active: service_active && assignment.is_active(now),
                assignment,
                service_name: role.service,
                role_name: role.name,
            });
        }
        views.sort_by(|a, b| b.assignment.granted_at.cmp(&a.assignment.granted_at));
        Ok(views)
    }

    async fn require_service(&self, service: &ServiceName) -> Result<(), AdminError> {
        let row = self.require_service_row(service).await?;
        if row.active {
            Ok(())
        } else {
            Err(AdminError::field(
                "serviceName",
                format!("service '{service}' is deactivated"),
            ))
        }
    }

    async fn require_service_row(&self, service: &ServiceName) -> Result<Service, AdminError> {
        self.source
            .get_service(service)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("service '{service}'")))
    }
}

fn parse_service(field: &str, name: &str) -> Result<ServiceName, AdminError> {
    ServiceName::new(name)
        .map_err(|e| AdminError::Validation(vec![FieldError::new(field, e.to_string())]))
}
