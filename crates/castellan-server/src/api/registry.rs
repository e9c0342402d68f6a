//! Manifest registration and attribute refresh.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use castellan_cache::{CacheError, LoadError};
use castellan_registry::{FieldError, Manifest, RegistrationReport};
use castellan_types::{AttributeSetWire, ServiceName, SubjectId};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use super::{authorize_admin, json_body};
use crate::app::AppState;
use crate::error::{ApiError, api_not_found, api_unavailable, api_validation_error};
use crate::identity::IdentityContext;

/// Registers or re-registers a service manifest.
pub async fn register_manifest(
    State(state): State<AppState>,
    identity: IdentityContext,
    payload: Result<Json<Manifest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegistrationReport>), ApiError> {
    authorize_admin(&state, &identity, "register_manifest")?;
    let manifest = json_body(payload)?;
    let report = state.admin.register_manifest(&manifest, Utc::now()).await?;
    let status = if report.service_created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub subject_id: SubjectId,
    pub service_name: String,
}

/// Recomputes a subject's attribute set and writes it through the cache.
pub async fn refresh(
    State(state): State<AppState>,
    identity: IdentityContext,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<AttributeSetWire>, ApiError> {
    authorize_admin(&state, &identity, "refresh")?;
    let request = json_body(payload)?;
    let service = ServiceName::new(request.service_name.clone()).map_err(|e| {
        api_validation_error(vec![FieldError::new("serviceName", e.to_string())])
    })?;

    match state.cache.refresh(request.subject_id, &service).await {
        Ok(attrs) => Ok(Json(attrs.to_wire())),
        Err(CacheError::Refresh(LoadError::UnknownService(_))) => Err(api_not_found(format!(
            "service '{service}' not found or inactive"
        ))),
        Err(e) => {
            warn!(subject_id = %request.subject_id, service = %service, error = %e, "refresh failed");
            Err(api_unavailable("attribute refresh failed"))
        }
    }
}
