//! Typed attribute values and resolved attribute sets.
//!
//! Attribute values are a tagged union keyed by the type tag declared in a
//! service manifest. Raw JSON is only accepted through [`AttributeValue::from_json`],
//! which checks the value against its tag, so an untyped value never travels
//! past the deserialization boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ServiceName, SubjectId, TypeError};

// ============================================================================
// Attribute Type
// ============================================================================

/// Type tag declared for an attribute in a service manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    StringList,
    IntegerList,
}

impl AttributeType {
    /// All supported tags, in declaration order.
    pub const ALL: [AttributeType; 6] = [
        AttributeType::String,
        AttributeType::Integer,
        AttributeType::Float,
        AttributeType::Boolean,
        AttributeType::StringList,
        AttributeType::IntegerList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::Boolean => "boolean",
            AttributeType::StringList => "string_list",
            AttributeType::IntegerList => "integer_list",
        }
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypeError::UnsupportedType(s.to_string()))
    }
}

// ============================================================================
// Attribute Value
// ============================================================================

/// A typed attribute value.
///
/// Serialized adjacently tagged (`{"type": "integer_list", "value": [1, 2]}`)
/// so cached entries are self-describing and re-validated on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    StringList(Vec<String>),
    IntegerList(Vec<i64>),
}

impl AttributeValue {
    /// Returns the type tag of this value.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Integer(_) => AttributeType::Integer,
            AttributeValue::Float(_) => AttributeType::Float,
            AttributeValue::Boolean(_) => AttributeType::Boolean,
            AttributeValue::StringList(_) => AttributeType::StringList,
            AttributeValue::IntegerList(_) => AttributeType::IntegerList,
        }
    }

    /// Parses an untyped JSON value against a declared type tag.
    ///
    /// Integers must be exact (`1.5` is not an integer); floats accept any
    /// JSON number; list elements must all match the element type.
    pub fn from_json(expected: AttributeType, raw: &serde_json::Value) -> Result<Self, TypeError> {
        use serde_json::Value;

        let mismatch = || TypeError::TypeMismatch { expected };

        match (expected, raw) {
            (AttributeType::String, Value::String(s)) => Ok(AttributeValue::String(s.clone())),
            (AttributeType::Integer, Value::Number(n)) => {
                n.as_i64().map(AttributeValue::Integer).ok_or_else(mismatch)
            }
            (AttributeType::Float, Value::Number(n)) => {
                n.as_f64().map(AttributeValue::Float).ok_or_else(mismatch)
            }
            (AttributeType::Boolean, Value::Bool(b)) => Ok(AttributeValue::Boolean(*b)),
            (AttributeType::StringList, Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(AttributeValue::StringList)
                .ok_or_else(mismatch),
            (AttributeType::IntegerList, Value::Array(items)) => items
                .iter()
                .map(serde_json::Value::as_i64)
                .collect::<Option<Vec<_>>>()
                .map(AttributeValue::IntegerList)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    /// Returns the untagged JSON representation used on the wire.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::String(s) => serde_json::Value::from(s.as_str()),
            AttributeValue::Integer(i) => serde_json::Value::from(*i),
            AttributeValue::Float(f) => serde_json::Value::from(*f),
            AttributeValue::Boolean(b) => serde_json::Value::from(*b),
            AttributeValue::StringList(items) => serde_json::Value::from(items.clone()),
            AttributeValue::IntegerList(items) => serde_json::Value::from(items.clone()),
        }
    }

    /// Returns whether `other` equals this value or, for list values, is one of its elements.
    ///
    /// This is the comparison behind attribute-equality policies: a subject
    /// carrying `customer_ids = [100, 200]` matches a resource `customerId = 100`.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::IntegerList(items), AttributeValue::Integer(i)) => items.contains(i),
            (AttributeValue::StringList(items), AttributeValue::String(s)) => items.contains(s),
            (a, b) => a == b,
        }
    }

    /// Renders the scalar members of this value as literals usable in a storage predicate.
    pub fn literals(&self) -> Vec<String> {
        match self {
            AttributeValue::String(s) => vec![quote(s)],
            AttributeValue::Integer(i) => vec![i.to_string()],
            AttributeValue::Float(f) => vec![f.to_string()],
            AttributeValue::Boolean(b) => vec![b.to_string()],
            AttributeValue::StringList(items) => items.iter().map(|s| quote(s)).collect(),
            AttributeValue::IntegerList(items) => items.iter().map(ToString::to_string).collect(),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{s}'")
}

// ============================================================================
// Attribute Set
// ============================================================================

/// The resolved bundle of a subject's active roles and attribute values for one service.
///
/// Always reconstructable from the source of record; never authoritative on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub subject_id: SubjectId,
    pub service: ServiceName,
    /// Global roles, held regardless of the resource.
    pub roles: BTreeSet<String>,
    /// Resource-scoped roles: role name to the resource ids it was granted on.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scoped_roles: BTreeMap<String, BTreeSet<String>>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub computed_at: DateTime<Utc>,
    /// Earliest expiry among the assignments this set was computed from.
    /// From that instant on the set is stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AttributeSet {
    /// Creates an empty attribute set computed at `computed_at`.
    pub fn new(subject_id: SubjectId, service: ServiceName, computed_at: DateTime<Utc>) -> Self {
        Self {
            subject_id,
            service,
            roles: BTreeSet::new(),
            scoped_roles: BTreeMap::new(),
            attributes: BTreeMap::new(),
            computed_at,
            expires_at: None,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_scoped_role(mut self, role: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.scoped_roles
            .entry(role.into())
            .or_default()
            .insert(resource_id.into());
        self
    }

    /// Returns whether `role` is held globally. Resource-scoped grants do not count.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns whether `role` is held globally or scoped to `resource_id`.
    pub fn has_role_on(&self, role: &str, resource_id: &str) -> bool {
        self.has_role(role)
            || self
                .scoped_roles
                .get(role)
                .is_some_and(|ids| ids.contains(resource_id))
    }

    /// Resource ids `role` is scoped to.
    pub fn scoped_resources(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.scoped_roles.get(role).filter(|ids| !ids.is_empty())
    }

    /// Lowers the expiry bound to `at` if it is earlier than the current one.
    pub fn bound_expiry(&mut self, at: DateTime<Utc>) {
        self.expires_at = Some(self.expires_at.map_or(at, |current| current.min(at)));
    }

    /// Returns whether an assignment behind this set has expired by `now`.
    ///
    /// The boundary is exclusive: a set bounded at `now` is already stale.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Converts to the external wire shape.
    pub fn to_wire(&self) -> AttributeSetWire {
        AttributeSetWire {
            subject_id: self.subject_id,
            roles: self.roles.iter().cloned().collect(),
            scoped_roles: self
                .scoped_roles
                .iter()
                .map(|(role, ids)| (role.clone(), ids.iter().cloned().collect()))
                .collect(),
            attributes: self
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        }
    }
}

/// External wire shape of an attribute set: `{subjectId, roles, attributes}`,
/// plus `scopedRoles` when the subject holds resource-scoped grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSetWire {
    pub subject_id: SubjectId,
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scoped_roles: BTreeMap<String, Vec<String>>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}
