// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! Execution driver and the row-level operators.
//!
//! A single execution owns everything it touches: the per-node result cache,
//! the schema cache and the join indexes. Operators clone records before any
//! write, so cached node outputs can never be mutated through a consumer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::entity::{Entity, PropertyValue};
use crate::filter;
use crate::store::{EntityFilter, EntityRepository, SchemaProvider};

use super::join::{self, SchemaCache};
use super::materialize;
use super::plan::{plan_requests, PageLimiter, PageRequest};
use super::{
    dag, FilterConfig, LoadConfig, Node, NodeType, Operator, PaginateConfig, ProjectConfig,
    SortConfig, SortDirection, Transformation, UnionConfig,
};

/// Rows fetched from the repository per round trip.
const LOAD_BATCH_SIZE: u64 = 1000;

/// Window requested by the caller. A zero limit returns all records.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecuteOptions {
    pub limit: u64,
    pub offset: u64,
}

/// One unit of data flowing through the DAG: entities keyed by alias. A
/// `None` entity marks an outer-join miss.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Record {
    pub entities: BTreeMap<String, Option<Entity>>,
}

impl Record {
    pub fn single(alias: impl Into<String>, entity: Entity) -> Self {
        Self {
            entities: BTreeMap::from([(alias.into(), Some(entity))]),
        }
    }

    /// The entity under `alias`, when present and non-null.
    pub fn entity(&self, alias: &str) -> Option<&Entity> {
        self.entities.get(alias).and_then(|e| e.as_ref())
    }
}

/// Output of one full execution.
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    pub records: Vec<Record>,
    pub total_count: u64,
}

/// Distinct, non-retryable cancellation signal; surfaced through
/// `anyhow::Error` and recoverable via `downcast_ref`.
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("execution cancelled")]
pub struct Cancelled;

/// Cached output of one node: its records plus the operator-reported total.
#[derive(Clone, Debug, Default)]
pub(crate) struct NodeOutput {
    pub records: Vec<Record>,
    pub total: u64,
}

/// Executes stored transformations against an entity repository and a schema
/// provider.
pub struct TransformExecutor {
    repository: Arc<dyn EntityRepository>,
    schemas: Arc<dyn SchemaProvider>,
}

impl TransformExecutor {
    pub fn new(repository: Arc<dyn EntityRepository>, schemas: Arc<dyn SchemaProvider>) -> Self {
        Self {
            repository,
            schemas,
        }
    }

    /// Runs `transformation` and returns the final node's records, windowed
    /// by `options`, plus the total count before windowing. Any operator
    /// failure aborts the whole execution.
    pub async fn execute(
        &self,
        transformation: &Transformation,
        options: ExecuteOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        transformation.validate()?;

        let order = dag::topological_order(transformation)?;
        let by_id: HashMap<&str, &Node> = transformation
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n))
            .collect();
        let sorted: Vec<&Node> = order
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();
        let Some(final_node) = sorted.last().copied() else {
            return Ok(ExecutionResult::default());
        };

        let requests = plan_requests(&sorted, PageRequest::new(options.limit, options.offset));

        let mut outputs: HashMap<String, NodeOutput> = HashMap::new();
        let mut schemas = SchemaCache::new(self.schemas.clone());
        for node in &sorted {
            let request = requests.get(&node.id).copied().unwrap_or_default();
            debug!(
                "execute node {} ({}) window limit={} offset={}",
                node.id,
                node.op.name(),
                request.limit,
                request.offset
            );
            let output = self
                .execute_node(transformation, node, request, &outputs, &mut schemas, cancel)
                .await
                .with_context(|| format!("execute node {}", node.id))?;
            debug!(
                "node {} produced {} record(s), total {}",
                node.id,
                output.records.len(),
                output.total
            );
            outputs.insert(node.id.clone(), output);
        }

        let final_output = outputs
            .get(&final_node.id)
            .with_context(|| format!("missing result for final node {}", final_node.id))?;
        let mut records = final_output.records.clone();
        if (options.limit > 0 || options.offset > 0) && final_node.node_type() != NodeType::Paginate
        {
            records = apply_window(records, options.limit, options.offset);
        }
        Ok(ExecutionResult {
            records,
            total_count: final_output.total,
        })
    }

    async fn execute_node(
        &self,
        transformation: &Transformation,
        node: &Node,
        request: PageRequest,
        outputs: &HashMap<String, NodeOutput>,
        schemas: &mut SchemaCache,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput> {
        match &node.op {
            Operator::Load(cfg) => {
                self.execute_load(transformation, cfg, request, cancel).await
            }
            Operator::Filter(cfg) => execute_filter(node_input(outputs, node, 0)?, cfg, request),
            Operator::Project(cfg) => execute_project(node_input(outputs, node, 0)?, cfg, request),
            Operator::Join(cfg) => {
                join::execute(
                    join::JoinKind::Inner,
                    cfg,
                    node_input(outputs, node, 0)?,
                    node_input(outputs, node, 1)?,
                    transformation.organization_id,
                    request,
                    schemas,
                    cancel,
                )
                .await
            }
            Operator::LeftJoin(cfg) => {
                join::execute(
                    join::JoinKind::Left,
                    cfg,
                    node_input(outputs, node, 0)?,
                    node_input(outputs, node, 1)?,
                    transformation.organization_id,
                    request,
                    schemas,
                    cancel,
                )
                .await
            }
            Operator::AntiJoin(cfg) => {
                join::execute(
                    join::JoinKind::Anti,
                    cfg,
                    node_input(outputs, node, 0)?,
                    node_input(outputs, node, 1)?,
                    transformation.organization_id,
                    request,
                    schemas,
                    cancel,
                )
                .await
            }
            Operator::Union(cfg) => {
                let mut inputs = Vec::with_capacity(node.inputs.len());
                for idx in 0..node.inputs.len() {
                    inputs.push(node_input(outputs, node, idx)?);
                }
                Ok(execute_union(&inputs, cfg, request))
            }
            Operator::Materialize(cfg) => {
                Ok(materialize::execute(node_input(outputs, node, 0)?, cfg, request))
            }
            Operator::Sort(cfg) => execute_sort(node_input(outputs, node, 0)?, cfg, request),
            Operator::Paginate(cfg) => Ok(execute_paginate(node_input(outputs, node, 0)?, cfg)),
        }
    }

    /// Scans the repository in batches, re-applies the configured filters
    /// in-process, and stops as soon as the planned window is filled or the
    /// repository runs dry.
    async fn execute_load(
        &self,
        transformation: &Transformation,
        cfg: &LoadConfig,
        request: PageRequest,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput> {
        let entity_filter = EntityFilter {
            entity_type: Some(cfg.entity_type.clone()),
            property_filters: cfg.filters.clone(),
        };

        let mut limiter = PageLimiter::new(request);
        let mut records = Vec::new();
        let mut reported_total = 0u64;
        let mut scanned = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            let batch = if request.limit > 0 {
                LOAD_BATCH_SIZE.min(request.window_end().saturating_sub(limiter.total()))
            } else {
                LOAD_BATCH_SIZE
            };
            if batch == 0 {
                break;
            }

            let page = self
                .repository
                .list(
                    transformation.organization_id,
                    Some(&entity_filter),
                    None,
                    batch,
                    scanned,
                )
                .await
                .context("load entities")?;
            if reported_total == 0 {
                reported_total = page.total_count;
            }

            let returned = page.entities.len() as u64;
            scanned += returned;
            for entity in page.entities {
                if !filter::matches_all(&cfg.filters, &entity) {
                    continue;
                }
                if limiter.include() {
                    records.push(Record::single(cfg.alias.clone(), entity));
                }
            }

            if limiter.filled() || returned < batch {
                break;
            }
        }

        let total = if reported_total > 0 {
            reported_total
        } else {
            limiter.total()
        };
        Ok(NodeOutput { records, total })
    }
}

/// The cached output feeding `node`'s input at `idx`.
fn node_input<'a>(
    outputs: &'a HashMap<String, NodeOutput>,
    node: &Node,
    idx: usize,
) -> Result<&'a NodeOutput> {
    let id = node
        .inputs
        .get(idx)
        .with_context(|| format!("{} input missing", node.op.name()))?;
    outputs
        .get(id)
        .with_context(|| format!("{} input missing", node.op.name()))
}

fn execute_filter(input: &NodeOutput, cfg: &FilterConfig, request: PageRequest) -> Result<NodeOutput> {
    let alias = resolve_alias(&input.records, cfg.alias.as_deref(), "filter")?;
    let mut limiter = PageLimiter::new(request);
    let mut records = Vec::new();
    if let Some(alias) = alias {
        for record in &input.records {
            let matches = record
                .entity(&alias)
                .map_or(false, |entity| filter::matches_all(&cfg.filters, entity));
            if !matches {
                continue;
            }
            if limiter.include() {
                records.push(record.clone());
            }
        }
    }
    Ok(NodeOutput {
        records,
        total: limiter.total(),
    })
}

fn execute_project(
    input: &NodeOutput,
    cfg: &ProjectConfig,
    request: PageRequest,
) -> Result<NodeOutput> {
    let mut limiter = PageLimiter::new(request);
    let mut records = Vec::new();
    for record in &input.records {
        let (source, target) = resolve_projection(record, cfg.alias.as_deref())?;
        let projected = record
            .entities
            .get(&source)
            .cloned()
            .unwrap_or(None)
            .map(|entity| entity.projected(&cfg.fields));

        let mut out = record.clone();
        out.entities.remove(&source);
        out.entities.insert(target, projected);
        if limiter.include() {
            records.push(out);
        }
    }
    // Project is one-to-one; the input's total stays authoritative.
    Ok(NodeOutput {
        records,
        total: input.total,
    })
}

/// Picks the projection's `(source, target)` aliases for one record. A
/// configured alias that exists is both; otherwise a single-alias record may
/// be renamed to the configured alias.
fn resolve_projection(record: &Record, desired: Option<&str>) -> Result<(String, String)> {
    let desired = desired.filter(|d| !d.is_empty());
    if let Some(desired) = desired {
        if record.entities.contains_key(desired) {
            return Ok((desired.to_owned(), desired.to_owned()));
        }
    }
    if record.entities.len() == 1 {
        let source = record
            .entities
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        let target = desired.map_or_else(|| source.clone(), str::to_owned);
        return Ok((source, target));
    }
    match desired {
        Some(desired) => bail!("project alias {:?} not found in record", desired),
        None => bail!("project node requires an alias when multiple entities are present"),
    }
}

fn execute_union(inputs: &[&NodeOutput], _cfg: &UnionConfig, request: PageRequest) -> NodeOutput {
    let mut limiter = PageLimiter::new(request);
    let mut records = Vec::new();
    for input in inputs {
        for record in &input.records {
            if limiter.include() {
                records.push(record.clone());
            }
        }
    }
    // Totals add up only when every input knew its own.
    let total = if !inputs.is_empty() && inputs.iter().all(|i| i.total > 0) {
        inputs.iter().map(|i| i.total).sum()
    } else {
        limiter.total()
    };
    NodeOutput { records, total }
}

fn execute_sort(input: &NodeOutput, cfg: &SortConfig, request: PageRequest) -> Result<NodeOutput> {
    let Some(alias) = resolve_alias(&input.records, cfg.alias.as_deref(), "sort")? else {
        return Ok(input.clone());
    };

    let mut records = input.records.clone();
    records.sort_by(|a, b| {
        let a = a.entity(&alias).and_then(|e| e.property(&cfg.field));
        let b = b.entity(&alias).and_then(|e| e.property(&cfg.field));
        compare_sort_keys(a, b, cfg.direction)
    });

    // Downstream can only read up to the planned window; ordering is done, so
    // the tail serves no one. The input's total stays authoritative.
    if request.limit > 0 {
        records.truncate(request.window_end() as usize);
    }
    Ok(NodeOutput {
        records,
        total: input.total,
    })
}

/// Null and missing keys sort last regardless of direction; the direction
/// only flips comparisons between present values.
fn compare_sort_keys(
    a: Option<&PropertyValue>,
    b: Option<&PropertyValue>,
    direction: SortDirection,
) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = compare_values(a, b);
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    }
}

fn compare_values(a: &PropertyValue, b: &PropertyValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    use PropertyValue::*;

    match (a, b) {
        (Integer(x), Integer(y)) => x.cmp(y),
        (Float(x), Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Integer(x), Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Float(x), Integer(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Boolean(x), Boolean(y)) => x.cmp(y),
        (Timestamp(x), Timestamp(y)) => x.cmp(y),
        _ => a.render().cmp(&b.render()),
    }
}

fn execute_paginate(input: &NodeOutput, cfg: &PaginateConfig) -> NodeOutput {
    NodeOutput {
        records: apply_window(input.records.clone(), cfg.limit, cfg.offset),
        total: input.total,
    }
}

pub(crate) fn apply_window(records: Vec<Record>, limit: u64, offset: u64) -> Vec<Record> {
    let iter = records.into_iter().skip(offset as usize);
    match limit {
        0 => iter.collect(),
        limit => iter.take(limit as usize).collect(),
    }
}

/// Resolves the alias an operator works on: the configured alias when any
/// record carries it, otherwise the single alias shared by all records.
/// `None` only when there is nothing to resolve against.
fn resolve_alias(records: &[Record], desired: Option<&str>, operator: &str) -> Result<Option<String>> {
    if records.is_empty() {
        return Ok(None);
    }
    if let Some(desired) = desired.filter(|d| !d.is_empty()) {
        if records
            .iter()
            .any(|r| r.entities.contains_key(desired))
        {
            return Ok(Some(desired.to_owned()));
        }
        bail!("alias {:?} not found in records", desired);
    }

    let mut aliases: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        for alias in record.entities.keys() {
            aliases.insert(alias);
        }
    }
    match aliases.len() {
        0 => Ok(None),
        1 => Ok(aliases.iter().next().map(|a| (*a).to_owned())),
        _ => bail!("{operator} node requires an alias when multiple entities are present"),
    }
}
