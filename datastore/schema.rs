// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! Organization-scoped, versioned entity schemas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
    FileReference,
    Geometry,
    Timeseries,
    /// Textual cross-entity reference, matched through the target schema's
    /// canonical reference field.
    Reference,
    /// A single target entity UUID.
    EntityReference,
    /// Many target entity UUIDs.
    EntityReferenceArray,
    EntityId,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_entity_type: Option<String>,
}

/// An ordered sequence of field definitions. Field order is significant: the
/// first REFERENCE field is the schema's canonical reference.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub version: i64,
    pub fields: Vec<FieldDefinition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The first REFERENCE field in declaration order, if any.
    pub fn canonical_reference(&self) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.field_type == FieldType::Reference)
    }
}
