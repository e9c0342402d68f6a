//! Resources that policies are evaluated against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::AttributeValue;

/// Read-only view of a resource passed to policy functions.
///
/// Implemented explicitly by every protectable entity type; policies only see
/// the identifier and the attributes the entity chooses to expose.
pub trait Resource {
    /// Identifier used in logs; `None` for collection-level or global checks.
    fn resource_id(&self) -> Option<String>;

    /// Looks up a named resource attribute (for example `customerId` or `owner_id`).
    fn attribute(&self, name: &str) -> Option<AttributeValue>;
}

/// A generic resource described by an attribute map.
///
/// Used for checks arriving over the wire and for resources that have no
/// dedicated Rust type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl ResourceAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

impl Resource for ResourceAttributes {
    fn resource_id(&self) -> Option<String> {
        self.id.clone()
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.get(name).cloned()
    }
}
