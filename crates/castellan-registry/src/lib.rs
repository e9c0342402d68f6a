//! # castellan-registry: Source of record and change propagation
//!
//! Owns the durable authorization data (services, roles, assignments,
//! attribute definitions and values) and everything that mutates it.
//!
//! ```text
//!  manifest ──► manifest::register ──┐
//!                                    ▼
//!  grant / revoke / set ──► Admin ──► SourceOfRecord
//!                             │             ▲
//!                             ▼             │ compute
//!                     ChangePropagator   AttributeRefresher
//!                             │             ▲
//!                             ▼             │ load on miss
//!                     AttributeCacheClient ─┘
//! ```
//!
//! Every mutation calls the propagator explicitly; there are no implicit
//! write hooks.

pub mod admin;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod model;
pub mod propagation;
pub mod refresh;
pub mod source;

pub use admin::{
    ActivationOutcome, Admin, AssignmentView, GrantOutcome, GrantRequest, RevokeOutcome,
    RevokeRequest, SetAttributeOutcome, SetAttributeRequest,
};
pub use error::{AdminError, FieldError, ManifestError, RefreshError, SourceError};
pub use manifest::{Manifest, ManifestAttribute, ManifestRole, RegistrationReport, UpsertCounts};
pub use memory::InMemorySource;
pub use model::{
    AssignmentId, AttributeDefinition, AttributeValueRow, NewAssignment, Role, RoleAssignment,
    Service, Upsert,
};
pub use propagation::{ChangePropagator, ExpirySweeper, Propagation, refresh_on_invalidation};
pub use refresh::{AttributeRefresher, DEFAULT_SOURCE_TIMEOUT, MAX_ATTEMPTS};
pub use source::{SourceOfRecord, SourceResult};
