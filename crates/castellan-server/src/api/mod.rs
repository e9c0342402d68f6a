//! HTTP handlers.

pub mod assignments;
pub mod decisions;
pub mod registry;
pub mod services;
pub mod system;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use castellan_registry::FieldError;
use castellan_types::ResourceAttributes;
use tracing::warn;

use crate::app::AppState;
use crate::error::{ApiError, api_forbidden, api_validation_error};
use crate::identity::IdentityContext;

/// Checks `action` on the administrative entity when gating is enabled.
pub(crate) fn authorize_admin(
    state: &AppState,
    identity: &IdentityContext,
    action: &str,
) -> Result<(), ApiError> {
    let Some(table) = &state.admin_table else {
        return Ok(());
    };
    let allowed = state.evaluator.check_with_table(
        table,
        identity.attributes(),
        &ResourceAttributes::new(),
        action,
    );
    if allowed {
        Ok(())
    } else {
        warn!(subject_id = ?identity.subject_id, action, "administrative request denied");
        Err(api_forbidden())
    }
}

/// Turns a body rejection into a field error on `body`.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| api_validation_error(vec![FieldError::new("body", rejection.body_text())]))
}
