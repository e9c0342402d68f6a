//! Manifest registration.
//!
//! A service declares its roles and attribute schema in a manifest and
//! registers it on every start. Registration is a pure upsert: nothing absent
//! from a manifest is ever deleted, so repeated or partial registrations
//! cannot orphan existing assignments.

use std::collections::HashSet;
use std::str::FromStr;

use castellan_types::{AttributeType, AttributeValue, ServiceName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FieldError, ManifestError};
use crate::model::{AttributeDefinition, Upsert};
use crate::source::SourceOfRecord;

/// Maximum length of a role or attribute name.
pub const NAME_MAX_LEN: usize = 128;

/// A service's self-declaration, as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub service_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<ManifestRole>,
    #[serde(default)]
    pub attributes: Vec<ManifestAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRole {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub is_global: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Global attributes apply to the subject in every service.
    #[serde(default)]
    pub global: bool,
}

fn default_true() -> bool {
    true
}

/// Created/updated counts returned to the registering service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertCounts {
    fn record(&mut self, outcome: Upsert) {
        match outcome {
            Upsert::Created => self.created += 1,
            Upsert::Updated => self.updated += 1,
            Upsert::Unchanged => self.unchanged += 1,
        }
    }
}

/// Outcome of one registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReport {
    pub service_name: ServiceName,
    pub service_created: bool,
    pub roles: UpsertCounts,
    pub attributes: UpsertCounts,
}

/// A manifest that passed validation, with typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedManifest {
    pub service_name: ServiceName,
    pub display_name: String,
    pub roles: Vec<ManifestRole>,
    pub attributes: Vec<AttributeDefinition>,
}

impl Manifest {
    /// Validates the manifest, collecting every field error.
    pub fn validate(&self) -> Result<ValidatedManifest, ManifestError> {
        let mut errors = Vec::new();

        let service_name = match ServiceName::new(self.service_name.clone()) {
            Ok(name) => Some(name),
            Err(e) => {
                errors.push(FieldError::new("serviceName", e.to_string()));
                None
            }
        };

        let mut role_names = HashSet::new();
        for (i, role) in self.roles.iter().enumerate() {
            if let Some(message) = name_problem(&role.name) {
                errors.push(FieldError::new(format!("roles[{i}].name"), message));
            } else if !role_names.insert(role.name.as_str()) {
                errors.push(FieldError::new(
                    format!("roles[{i}].name"),
                    format!("duplicate role '{}'", role.name),
                ));
            }
        }

        let mut attribute_names = HashSet::new();
        let mut attributes = Vec::with_capacity(self.attributes.len());
        for (i, attr) in self.attributes.iter().enumerate() {
            if let Some(message) = name_problem(&attr.name) {
                errors.push(FieldError::new(format!("attributes[{i}].name"), message));
            } else if !attribute_names.insert(attr.name.as_str()) {
                errors.push(FieldError::new(
                    format!("attributes[{i}].name"),
                    format!("duplicate attribute '{}'", attr.name),
                ));
            }

            let attr_type = match AttributeType::from_str(&attr.attr_type) {
                Ok(t) => t,
                Err(_) => {
                    let supported: Vec<&str> =
                        AttributeType::ALL.iter().map(AttributeType::as_str).collect();
                    errors.push(FieldError::new(
                        format!("attributes[{i}].type"),
                        format!(
                            "unsupported type '{}', expected one of: {}",
                            attr.attr_type,
                            supported.join(", ")
                        ),
                    ));
                    continue;
                }
            };

            let default = match attr.default.as_ref().filter(|v| !v.is_null()) {
                None => None,
                Some(raw) => match AttributeValue::from_json(attr_type, raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        errors.push(FieldError::new(
                            format!("attributes[{i}].default"),
                            e.to_string(),
                        ));
                        continue;
                    }
                },
            };

            attributes.push(AttributeDefinition {
                service: if attr.global {
                    None
                } else {
                    service_name.clone()
                },
                name: attr.name.clone(),
                attr_type,
                required: attr.required,
                default,
            });
        }

        match service_name {
            Some(service_name) if errors.is_empty() => {
                let display_name = if self.display_name.trim().is_empty() {
                    service_name.to_string()
                } else {
                    self.display_name.clone()
                };
                let roles = self
                    .roles
                    .iter()
                    .map(|r| ManifestRole {
                        display_name: if r.display_name.trim().is_empty() {
                            r.name.clone()
                        } else {
                            r.display_name.clone()
                        },
                        ..r.clone()
                    })
                    .collect();
                Ok(ValidatedManifest {
                    service_name,
                    display_name,
                    roles,
                    attributes,
                })
            }
            _ => Err(ManifestError::Invalid(errors)),
        }
    }
}

fn name_problem(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        Some("must not be empty".to_string())
    } else if name.len() > NAME_MAX_LEN {
        Some(format!("must be at most {NAME_MAX_LEN} characters"))
    } else if name.chars().any(char::is_whitespace) {
        Some("must not contain whitespace".to_string())
    } else {
        None
    }
}

/// Validates and registers a manifest.
///
/// Safe to call on every start of every service: the service, each role and
/// each attribute definition are upserted by key; nothing is removed.
pub async fn register(
    source: &dyn SourceOfRecord,
    manifest: &Manifest,
    now: DateTime<Utc>,
) -> Result<RegistrationReport, ManifestError> {
    let manifest = manifest.validate()?;
    let service = &manifest.service_name;

    let service_outcome = source
        .upsert_service(service, &manifest.display_name, now)
        .await?;

    let mut roles = UpsertCounts::default();
    for role in &manifest.roles {
        let (_, outcome) = source
            .upsert_role(service, &role.name, &role.display_name, role.is_global)
            .await?;
        roles.record(outcome);
    }

    let mut attributes = UpsertCounts::default();
    for definition in manifest.attributes {
        attributes.record(source.upsert_attribute_definition(definition).await?);
    }

    info!(
        service = %service,
        roles_created = roles.created,
        roles_updated = roles.updated,
        attributes_created = attributes.created,
        attributes_updated = attributes.updated,
        "manifest registered"
    );

    Ok(RegistrationReport {
        service_name: manifest.service_name,
        service_created: service_outcome == Upsert::Created,
        roles,
        attributes,
    })
}
