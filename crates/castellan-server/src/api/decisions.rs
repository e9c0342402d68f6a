//! Access checks and caller introspection.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use castellan_registry::FieldError;
use castellan_types::{AttributeValue, ResourceAttributes, SubjectId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::json_body;
use crate::app::AppState;
use crate::error::{ApiError, api_not_found, api_validation_error};
use crate::identity::IdentityContext;

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub action: String,
    pub entity: String,
    #[serde(default)]
    pub resource: Map<String, Value>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub allowed: bool,
    pub allowed_actions: Vec<String>,
}

/// Evaluates one action for the caller and lists every allowed action.
///
/// The listing is for UI affordances; the protected operation re-checks.
pub async fn check(
    State(state): State<AppState>,
    identity: IdentityContext,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError> {
    let request = json_body(payload)?;
    let table = state
        .entities
        .get(&request.entity)
        .ok_or_else(|| api_not_found(format!("entity type '{}' not found", request.entity)))?;
    let resource = resource_from_json(request.resource)?;

    let attrs = identity.attributes();
    let allowed = state
        .evaluator
        .check_with_table(table, attrs, &resource, &request.action);
    let allowed_actions = state
        .evaluator
        .allowed_actions_with_table(table, attrs, &resource);

    Ok(Json(CheckResponse {
        allowed,
        allowed_actions,
    }))
}

/// Builds a resource from an untyped object. `id` names the resource; the
/// other members become typed attributes.
pub(crate) fn resource_from_json(object: Map<String, Value>) -> Result<ResourceAttributes, ApiError> {
    let mut resource = ResourceAttributes::new();
    let mut errors = Vec::new();

    for (name, value) in object {
        if name == "id" {
            match value {
                Value::String(id) => resource = resource.with_id(id),
                Value::Number(n) => resource = resource.with_id(n.to_string()),
                _ => errors.push(FieldError::new("resource.id", "must be a string or number")),
            }
            continue;
        }
        match infer_value(&value) {
            Some(typed) => resource = resource.with_attribute(name, typed),
            None => errors.push(FieldError::new(
                format!("resource.{name}"),
                "unsupported attribute value",
            )),
        }
    }

    if errors.is_empty() {
        Ok(resource)
    } else {
        Err(api_validation_error(errors))
    }
}

/// Infers the attribute type of an untyped JSON value. Empty or mixed lists,
/// nulls and objects have no attribute type.
fn infer_value(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::String(s) => Some(AttributeValue::String(s.clone())),
        Value::Bool(b) => Some(AttributeValue::Boolean(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(AttributeValue::Integer)
            .or_else(|| n.as_f64().map(AttributeValue::Float)),
        Value::Array(items) if !items.is_empty() => {
            if items.iter().all(Value::is_string) {
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .map(AttributeValue::StringList)
            } else {
                items
                    .iter()
                    .map(Value::as_i64)
                    .collect::<Option<Vec<_>>>()
                    .map(AttributeValue::IntegerList)
            }
        }
        _ => None,
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmI {
    pub subject_id: Option<SubjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub scoped_roles: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, Value>>,
}

/// The caller's attached attribute set. Anonymous callers get `{"subjectId": null}`.
pub async fn whoami(identity: IdentityContext) -> Json<WhoAmI> {
    let wire = identity.attributes().map(castellan_types::AttributeSet::to_wire);
    Json(WhoAmI {
        subject_id: identity.subject_id,
        roles: wire.as_ref().map(|w| w.roles.clone()),
        scoped_roles: wire
            .as_ref()
            .map(|w| w.scoped_roles.clone())
            .unwrap_or_default(),
        attributes: wire.map(|w| w.attributes),
    })
}

pub async fn list_policies(State(state): State<AppState>) -> Json<Vec<String>> {
    let mut names: Vec<String> = state
        .evaluator
        .registry()
        .list()
        .into_iter()
        .map(str::to_string)
        .collect();
    names.sort();
    Json(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::Resource;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!("gold"), Some(AttributeValue::String("gold".into())) ; "string")]
    #[test_case(json!(7), Some(AttributeValue::Integer(7)) ; "integer")]
    #[test_case(json!(2.5), Some(AttributeValue::Float(2.5)) ; "float")]
    #[test_case(json!(true), Some(AttributeValue::Boolean(true)) ; "boolean")]
    #[test_case(json!(["a", "b"]), Some(AttributeValue::StringList(vec!["a".into(), "b".into()])) ; "string list")]
    #[test_case(json!([1, 2]), Some(AttributeValue::IntegerList(vec![1, 2])) ; "integer list")]
    #[test_case(json!([]), None ; "empty list")]
    #[test_case(json!([1, "a"]), None ; "mixed list")]
    #[test_case(json!(null), None ; "null")]
    #[test_case(json!({"a": 1}), None ; "object")]
    fn test_infer_value(raw: Value, expected: Option<AttributeValue>) {
        assert_eq!(infer_value(&raw), expected);
    }

    #[test]
    fn test_resource_from_json() {
        let Value::Object(object) = json!({"id": 17, "customerId": 100, "status": "open"}) else {
            unreachable!()
        };
        let resource = resource_from_json(object).unwrap();
        assert_eq!(resource.resource_id().as_deref(), Some("17"));
        assert_eq!(resource.attribute("customerId"), Some(AttributeValue::Integer(100)));
        assert_eq!(resource.attribute("id"), None);
    }

    #[test]
    fn test_resource_errors_name_every_field() {
        let Value::Object(object) = json!({"id": [1], "tags": [], "customerId": 1}) else {
            unreachable!()
        };
        let err = resource_from_json(object).unwrap_err();
        let fields: Vec<String> = err
            .body
            .fields
            .unwrap()
            .into_iter()
            .map(|f| f.field)
            .collect();
        assert_eq!(fields, vec!["resource.id", "resource.tags"]);
    }
}
