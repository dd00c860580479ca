// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! Materialize: rebuild each record around a new set of output entities whose
//! properties are gathered from field mappings across the input aliases.

use std::collections::BTreeMap;

use chrono::Utc;
use uuid::Uuid;

use crate::entity::{Entity, PropertyMap, PropertyValue};

use super::exec::{NodeOutput, Record};
use super::plan::{PageLimiter, PageRequest};
use super::{FieldMapping, MaterializeConfig, MaterializeOutput};

/// Source alias sentinel: consider every alias of the record, in sorted
/// order. An empty source alias behaves the same.
pub const ANY_SOURCE_ALIAS: &str = "__ANY_ALIAS__";

pub(crate) fn execute(
    input: &NodeOutput,
    cfg: &MaterializeConfig,
    request: PageRequest,
) -> NodeOutput {
    let mut limiter = PageLimiter::new(request);
    let mut records = Vec::new();
    for record in &input.records {
        let mut entities = BTreeMap::new();
        for output in &cfg.outputs {
            entities.insert(output.alias.clone(), Some(build_output(record, output)));
        }
        if limiter.include() {
            records.push(Record { entities });
        }
    }
    // One output record per input record; the input's total stays
    // authoritative.
    NodeOutput {
        records,
        total: input.total,
    }
}

fn build_output(record: &Record, output: &MaterializeOutput) -> Entity {
    let mut entity = seed_entity(record, output);
    let mut adopted = false;
    for mapping in &output.fields {
        if mapping.output_field.is_empty() {
            continue;
        }
        let Some((source, value)) = extract_mapping(record, mapping) else {
            continue;
        };
        // The first mapping that actually produced a value decides the
        // output's identity.
        if !adopted {
            adopt_metadata(&mut entity, source);
            adopted = true;
        }
        entity
            .properties
            .insert(mapping.output_field.clone(), value);
    }
    entity
}

/// Seeds the output entity from the first mapping whose source alias holds a
/// non-null entity; without one, a synthetic entity with a fresh id.
fn seed_entity(record: &Record, output: &MaterializeOutput) -> Entity {
    for mapping in &output.fields {
        for alias in source_aliases(record, &mapping.source_alias) {
            if let Some(source) = record.entity(&alias) {
                let mut entity = source.clone();
                entity.properties = PropertyMap::new();
                return entity;
            }
        }
    }
    synthetic_entity()
}

// The synthetic identity only exists for the duration of this execution; it
// must never be persisted.
fn synthetic_entity() -> Entity {
    let now = Utc::now();
    Entity {
        id: Uuid::new_v4(),
        organization_id: Uuid::nil(),
        schema_id: Uuid::nil(),
        entity_type: String::new(),
        path: String::new(),
        properties: PropertyMap::new(),
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

fn source_aliases(record: &Record, source_alias: &str) -> Vec<String> {
    if source_alias.is_empty() || source_alias == ANY_SOURCE_ALIAS {
        record.entities.keys().cloned().collect()
    } else {
        vec![source_alias.to_owned()]
    }
}

/// The first candidate alias whose entity yields a value for the mapping,
/// together with that value.
fn extract_mapping<'r>(
    record: &'r Record,
    mapping: &FieldMapping,
) -> Option<(&'r Entity, PropertyValue)> {
    for alias in source_aliases(record, &mapping.source_alias) {
        let Some(entity) = record.entity(&alias) else {
            continue;
        };
        if let Some(value) = extract_value(entity, &mapping.source_field) {
            return Some((entity, value));
        }
    }
    None
}

fn extract_value(entity: &Entity, source_field: &str) -> Option<PropertyValue> {
    if let Some(value) = entity.metadata_value(source_field) {
        return Some(value);
    }
    entity.property(source_field).cloned()
}

fn adopt_metadata(entity: &mut Entity, source: &Entity) {
    entity.id = source.id;
    entity.organization_id = source.organization_id;
    entity.schema_id = source.schema_id;
    entity.entity_type = source.entity_type.clone();
    entity.path = source.path.clone();
    entity.version = source.version;
    entity.created_at = source.created_at;
    entity.updated_at = source.updated_at;
}
