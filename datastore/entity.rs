//! Entities and their dynamically typed property values.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single property value stored on an entity.
///
/// Values form a tree: scalars, arrays and string-keyed maps. The wire form
/// is plain JSON; timestamps travel as RFC 3339 strings and are recognized
/// before falling back to `String`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Array(PropertyArray),
    Map(PropertyMap),
}

pub type PropertyArray = Vec<PropertyValue>;
pub type PropertyMap = IndexMap<String, PropertyValue>;

impl PropertyValue {
    pub fn kind_str(&self) -> &str {
        match self {
            Self::Null => "Null",
            Self::Boolean(_) => "Boolean",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Timestamp(_) => "Timestamp",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
            Self::Map(_) => "Map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The textual form used by filter equality and join keys. Scalars render
    /// the way they would print; arrays and maps render as compact JSON.
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Boolean(v) => v.to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Timestamp(v) => v.to_rfc3339(),
            Self::String(v) => v.clone(),
            Self::Array(_) | Self::Map(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

/// A stored domain entity. The property map is dynamically shaped; the schema
/// named by `schema_id` governed it at write time.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub schema_id: Uuid,
    pub entity_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub properties: PropertyMap,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// A copy keeping only the named properties. Identity and metadata are
    /// preserved; property order follows the original declaration order.
    pub fn projected(&self, fields: &[String]) -> Entity {
        let mut entity = self.clone();
        entity.properties = self
            .properties
            .iter()
            .filter(|(key, _)| fields.iter().any(|f| f == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entity
    }

    /// Metadata addressed by the special field tokens understood by
    /// materialize mappings. Zero values (nil ids, empty strings, version 0)
    /// yield `None` so the caller falls through to the property map.
    pub fn metadata_value(&self, token: &str) -> Option<PropertyValue> {
        match token {
            "id" | "ID" if !self.id.is_nil() => Some(PropertyValue::String(self.id.to_string())),
            "organizationId" | "organization_id" if !self.organization_id.is_nil() => {
                Some(PropertyValue::String(self.organization_id.to_string()))
            }
            "schemaId" | "schema_id" if !self.schema_id.is_nil() => {
                Some(PropertyValue::String(self.schema_id.to_string()))
            }
            "entityType" | "entity_type" if !self.entity_type.is_empty() => {
                Some(PropertyValue::String(self.entity_type.clone()))
            }
            "path" if !self.path.is_empty() => Some(PropertyValue::String(self.path.clone())),
            "version" if self.version != 0 => Some(PropertyValue::Integer(self.version)),
            "createdAt" | "created_at" => Some(PropertyValue::Timestamp(self.created_at)),
            "updatedAt" | "updated_at" => Some(PropertyValue::Timestamp(self.updated_at)),
            _ => None,
        }
    }
}
