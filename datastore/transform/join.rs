// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! The join family: JOIN, LEFT_JOIN and ANTI_JOIN, plus the indexes they
//! probe. The right input is indexed once per node; reference joins add a
//! lazily built index over the right schemas' canonical reference fields.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use itertools::Itertools;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::entity::{Entity, PropertyValue};
use crate::schema::{FieldDefinition, FieldType, Schema};
use crate::store::SchemaProvider;

use super::exec::{Cancelled, NodeOutput, Record};
use super::plan::{PageLimiter, PageRequest};
use super::JoinConfig;

/// Per-execution schema lookups, keyed by entity type. Negative results are
/// cached too, so an absent schema costs one provider call per execution.
pub(crate) struct SchemaCache {
    provider: Arc<dyn SchemaProvider>,
    cached: HashMap<String, Option<Schema>>,
}

impl SchemaCache {
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self {
            provider,
            cached: HashMap::new(),
        }
    }

    pub async fn get(
        &mut self,
        organization_id: Uuid,
        entity_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Schema>> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        if let Some(cached) = self.cached.get(entity_type) {
            return Ok(cached.clone());
        }
        let schema = self
            .provider
            .schema_by_name(organization_id, entity_type)
            .await
            .with_context(|| format!("look up schema for entity type {entity_type:?}"))?;
        self.cached.insert(entity_type.to_owned(), schema.clone());
        Ok(schema)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JoinKind {
    Inner,
    Left,
    Anti,
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn execute(
    kind: JoinKind,
    cfg: &JoinConfig,
    left: &NodeOutput,
    right: &NodeOutput,
    organization_id: Uuid,
    request: PageRequest,
    schemas: &mut SchemaCache,
    cancel: &CancellationToken,
) -> Result<NodeOutput> {
    let index = RightIndex::build(&cfg.right_alias, &right.records, &cfg.on_field);
    let mut reference_index: Option<ReferenceIndex> = None;
    // The on_field definition per left entity type; one schema walk each.
    let mut left_fields: HashMap<String, Option<FieldDefinition>> = HashMap::new();

    let mut limiter = PageLimiter::new(request);
    let mut records = Vec::new();
    for left_record in &left.records {
        let matches = match left_record.entity(&cfg.left_alias) {
            None => Vec::new(),
            Some(left_entity) => {
                let field = match left_fields.get(&left_entity.entity_type) {
                    Some(cached) => cached.clone(),
                    None => {
                        let schema = schemas
                            .get(organization_id, &left_entity.entity_type, cancel)
                            .await?;
                        let field = schema
                            .as_ref()
                            .and_then(|s| s.field(&cfg.on_field))
                            .cloned();
                        left_fields.insert(left_entity.entity_type.clone(), field.clone());
                        field
                    }
                };

                match field {
                    Some(field)
                        if matches!(
                            field.field_type,
                            FieldType::EntityReference | FieldType::EntityReferenceArray
                        ) =>
                    {
                        entity_id_matches(left_entity, cfg, &index)
                    }
                    Some(field) if field.field_type == FieldType::Reference => {
                        if reference_index.is_none() {
                            reference_index = Some(
                                ReferenceIndex::build(
                                    &cfg.right_alias,
                                    &right.records,
                                    organization_id,
                                    schemas,
                                    cancel,
                                )
                                .await?,
                            );
                        }
                        match reference_index.as_ref() {
                            Some(ref_index) if ref_index.available() => {
                                reference_matches(left_entity, &field, cfg, ref_index, right)
                            }
                            _ => index.literal_matches(left_entity, &cfg.on_field),
                        }
                    }
                    _ => index.literal_matches(left_entity, &cfg.on_field),
                }
            }
        };
        let matches: Vec<usize> = matches.into_iter().unique().collect();

        match kind {
            JoinKind::Inner => {
                for idx in matches {
                    if limiter.include() {
                        records.push(merge(left_record, &right.records[idx]));
                    }
                }
            }
            JoinKind::Left => {
                if matches.is_empty() {
                    if limiter.include() {
                        let mut out = left_record.clone();
                        out.entities.insert(cfg.right_alias.clone(), None);
                        records.push(out);
                    }
                } else {
                    for idx in matches {
                        if limiter.include() {
                            records.push(merge(left_record, &right.records[idx]));
                        }
                    }
                }
            }
            JoinKind::Anti => {
                if matches.is_empty() && limiter.include() {
                    records.push(left_record.clone());
                }
            }
        }
    }

    Ok(NodeOutput {
        records,
        total: limiter.total(),
    })
}

/// ENTITY_REFERENCE[_ARRAY] matching: the left property holds target entity
/// UUIDs. Unparsable values are skipped; an empty id set falls back to the
/// literal strategy.
fn entity_id_matches(left_entity: &Entity, cfg: &JoinConfig, index: &RightIndex) -> Vec<usize> {
    let ids: Vec<String> = candidate_strings(left_entity.property(&cfg.on_field))
        .iter()
        .filter_map(|v| Uuid::parse_str(v).ok())
        .map(|u| u.to_string())
        .collect();
    if ids.is_empty() {
        return index.literal_matches(left_entity, &cfg.on_field);
    }
    let mut matched = Vec::new();
    for id in &ids {
        if let Some(hits) = index.by_id.get(id) {
            matched.extend(hits.iter().copied());
        }
    }
    matched
}

/// REFERENCE matching via the canonical index, optionally restricted to the
/// entity type the left field references.
fn reference_matches(
    left_entity: &Entity,
    field: &FieldDefinition,
    cfg: &JoinConfig,
    ref_index: &ReferenceIndex,
    right: &NodeOutput,
) -> Vec<usize> {
    let mut matched = Vec::new();
    for value in candidate_strings(left_entity.property(&cfg.on_field)) {
        for idx in ref_index.get(&value) {
            if let Some(expected) = &field.reference_entity_type {
                let right_type = right.records[*idx]
                    .entity(&cfg.right_alias)
                    .map(|e| e.entity_type.as_str());
                if right_type != Some(expected.as_str()) {
                    continue;
                }
            }
            matched.push(*idx);
        }
    }
    matched
}

fn merge(left: &Record, right: &Record) -> Record {
    let mut merged = left.clone();
    for (alias, entity) in &right.entities {
        // Left wins on alias collision; join participants use distinct
        // aliases, so this only matters for degenerate configs.
        merged
            .entities
            .entry(alias.clone())
            .or_insert_with(|| entity.clone());
    }
    merged
}

/// The candidate strings one property value contributes to matching: array
/// members individually, scalars as their rendering, nulls nothing.
fn candidate_strings(value: Option<&PropertyValue>) -> Vec<String> {
    match value {
        Some(PropertyValue::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(PropertyValue::render)
            .collect(),
        Some(v) if !v.is_null() => vec![v.render()],
        _ => Vec::new(),
    }
}

/// Right-input indexes probed by every strategy: the on_field's textual value
/// and the right entity id.
struct RightIndex {
    literal: HashMap<String, Vec<usize>>,
    by_id: HashMap<String, Vec<usize>>,
}

impl RightIndex {
    fn build(right_alias: &str, records: &[Record], on_field: &str) -> Self {
        let mut literal: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let Some(entity) = record.entity(right_alias) else {
                continue;
            };
            if let Some(value) = entity.property(on_field).filter(|v| !v.is_null()) {
                literal.entry(value.render()).or_default().push(idx);
            }
            by_id.entry(entity.id.to_string()).or_default().push(idx);
        }
        Self { literal, by_id }
    }

    fn literal_matches(&self, entity: &Entity, on_field: &str) -> Vec<usize> {
        match entity.property(on_field).filter(|v| !v.is_null()) {
            Some(value) => self.literal.get(&value.render()).cloned().unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

/// Index over the right records keyed by each right entity's canonical
/// REFERENCE field value. Available only when at least one right entity
/// contributed an entry; callers fall back to literal matching otherwise.
pub(crate) struct ReferenceIndex {
    entries: HashMap<String, Vec<usize>>,
}

impl ReferenceIndex {
    async fn build(
        right_alias: &str,
        records: &[Record],
        organization_id: Uuid,
        schemas: &mut SchemaCache,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut entries: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let Some(entity) = record.entity(right_alias) else {
                continue;
            };
            let Some(schema) = schemas
                .get(organization_id, &entity.entity_type, cancel)
                .await?
            else {
                continue;
            };
            let Some(canonical) = schema.canonical_reference() else {
                continue;
            };
            for value in candidate_strings(entity.property(&canonical.name)) {
                entries.entry(value).or_default().push(idx);
            }
        }
        Ok(Self { entries })
    }

    fn available(&self) -> bool {
        !self.entries.is_empty()
    }

    fn get(&self, value: &str) -> &[usize] {
        self.entries.get(value).map(Vec::as_slice).unwrap_or(&[])
    }
}
