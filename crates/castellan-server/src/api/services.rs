//! Service activation and role listing.

use axum::Json;
use axum::extract::{Path, State};
use castellan_registry::{ActivationOutcome, Role};

use super::authorize_admin;
use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::IdentityContext;

pub async fn activate(
    State(state): State<AppState>,
    identity: IdentityContext,
    Path(name): Path<String>,
) -> Result<Json<ActivationOutcome>, ApiError> {
    set_active(&state, &identity, &name, true).await
}

pub async fn deactivate(
    State(state): State<AppState>,
    identity: IdentityContext,
    Path(name): Path<String>,
) -> Result<Json<ActivationOutcome>, ApiError> {
    set_active(&state, &identity, &name, false).await
}

async fn set_active(
    state: &AppState,
    identity: &IdentityContext,
    name: &str,
    active: bool,
) -> Result<Json<ActivationOutcome>, ApiError> {
    authorize_admin(state, identity, "set_service_active")?;
    Ok(Json(state.admin.set_service_active(name, active).await?))
}

pub async fn list_roles(
    State(state): State<AppState>,
    identity: IdentityContext,
    Path(name): Path<String>,
) -> Result<Json<Vec<Role>>, ApiError> {
    authorize_admin(&state, &identity, "inspect")?;
    Ok(Json(state.admin.list_roles(&name).await?))
}
