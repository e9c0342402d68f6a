//! Role grants, revocations and attribute writes.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use castellan_registry::{
    AssignmentView, GrantOutcome, GrantRequest, RevokeOutcome, RevokeRequest, SetAttributeOutcome,
    SetAttributeRequest,
};
use castellan_types::SubjectId;
use chrono::Utc;

use super::{authorize_admin, json_body};
use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::IdentityContext;

/// Grants a role. The caller's subject id is recorded as the grantor.
pub async fn grant(
    State(state): State<AppState>,
    identity: IdentityContext,
    payload: Result<Json<GrantRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GrantOutcome>), ApiError> {
    authorize_admin(&state, &identity, "grant")?;
    let request = json_body(payload)?;
    let outcome = state
        .admin
        .grant(request, identity.subject_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn revoke(
    State(state): State<AppState>,
    identity: IdentityContext,
    payload: Result<Json<RevokeRequest>, JsonRejection>,
) -> Result<Json<RevokeOutcome>, ApiError> {
    authorize_admin(&state, &identity, "revoke")?;
    let request = json_body(payload)?;
    Ok(Json(state.admin.revoke(request, Utc::now()).await?))
}

pub async fn set_attribute(
    State(state): State<AppState>,
    identity: IdentityContext,
    payload: Result<Json<SetAttributeRequest>, JsonRejection>,
) -> Result<Json<SetAttributeOutcome>, ApiError> {
    authorize_admin(&state, &identity, "set_attribute")?;
    let request = json_body(payload)?;
    Ok(Json(state.admin.set_attribute(request, Utc::now()).await?))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    identity: IdentityContext,
    Path(subject_id): Path<u64>,
) -> Result<Json<Vec<AssignmentView>>, ApiError> {
    authorize_admin(&state, &identity, "inspect")?;
    let views = state
        .admin
        .list_assignments(SubjectId::new(subject_id), Utc::now())
        .await?;
    Ok(Json(views))
}
