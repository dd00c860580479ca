// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! # Entity transformations
//!
//! A transformation is a stored DAG of relational operators over entities:
//! Load scans the repository, the remaining operators filter, reshape, join
//! and window the record stream. Executing a transformation walks the DAG in
//! topological order after a backward planning pass decided how much data
//! each node must yield.
//!
//! Transformations persist as JSON: every node carries its `type` tag, its
//! `inputs` (always an array), and exactly one operator config under the
//! lowercase key matching the type.

pub mod dag;
pub mod exec;
pub mod join;
pub mod materialize;
pub mod plan;

use chrono::{DateTime, Utc};
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::filter::PropertyFilter;

pub use dag::{topological_order, validate, ValidationError};
pub use exec::{Cancelled, ExecuteOptions, ExecutionResult, Record, TransformExecutor};
pub use plan::PageRequest;

/// A stored transformation: named, organization-scoped, and made of an
/// ordered node list forming a DAG.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transformation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transformation {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural validation; see [`dag::validate`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        dag::validate(self)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Load,
    Filter,
    Project,
    Join,
    LeftJoin,
    AntiJoin,
    Union,
    Materialize,
    Sort,
    Paginate,
}

/// One DAG node: identity, its inputs, and the operator it runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "NodeRepr", try_from = "NodeRepr")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub inputs: Vec<String>,
    pub op: Operator,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        self.op.node_type()
    }
}

/// Per-node operator payload. Exactly one variant per node; exhaustive
/// matching keeps every executor honest about handling all operators.
#[derive(Clone, Debug, EnumAsInner, PartialEq)]
pub enum Operator {
    Load(LoadConfig),
    Filter(FilterConfig),
    Project(ProjectConfig),
    Join(JoinConfig),
    LeftJoin(JoinConfig),
    AntiJoin(JoinConfig),
    Union(UnionConfig),
    Materialize(MaterializeConfig),
    Sort(SortConfig),
    Paginate(PaginateConfig),
}

impl Operator {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Load(_) => NodeType::Load,
            Self::Filter(_) => NodeType::Filter,
            Self::Project(_) => NodeType::Project,
            Self::Join(_) => NodeType::Join,
            Self::LeftJoin(_) => NodeType::LeftJoin,
            Self::AntiJoin(_) => NodeType::AntiJoin,
            Self::Union(_) => NodeType::Union,
            Self::Materialize(_) => NodeType::Materialize,
            Self::Sort(_) => NodeType::Sort,
            Self::Paginate(_) => NodeType::Paginate,
        }
    }

    /// Short operator name used in log lines and error phrases.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Filter(_) => "filter",
            Self::Project(_) => "project",
            Self::Join(_) => "join",
            Self::LeftJoin(_) => "left join",
            Self::AntiJoin(_) => "anti join",
            Self::Union(_) => "union",
            Self::Materialize(_) => "materialize",
            Self::Sort(_) => "sort",
            Self::Paginate(_) => "paginate",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfig {
    pub alias: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<PropertyFilter>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub fields: Vec<String>,
}

/// Shared by JOIN, LEFT_JOIN and ANTI_JOIN.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    pub left_alias: String,
    pub right_alias: String,
    pub on_field: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeConfig {
    pub outputs: Vec<MaterializeOutput>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeOutput {
    pub alias: String,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    #[serde(default)]
    pub source_alias: String,
    pub source_field: String,
    pub output_field: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

// Unknown direction strings normalize to ascending rather than failing the
// whole transformation.
impl<'de> Deserialize<'de> for SortDirection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Ok(Self::Asc)
        }
    }
}

/// A zero limit means "no limit".
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginateConfig {
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

/// Wire form of a node: the `type` tag plus at most one operator config under
/// its lowercase key. `inputs` always serializes, even when empty.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRepr {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    load: Option<LoadConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<FilterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<ProjectConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join: Option<JoinConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    union: Option<UnionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    materialize: Option<MaterializeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort: Option<SortConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paginate: Option<PaginateConfig>,
}

impl NodeRepr {
    fn empty(id: String, name: String, node_type: NodeType, inputs: Vec<String>) -> Self {
        Self {
            id,
            name,
            node_type,
            inputs,
            load: None,
            filter: None,
            project: None,
            join: None,
            union: None,
            materialize: None,
            sort: None,
            paginate: None,
        }
    }

    fn populated_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.load.is_some() {
            keys.push("load");
        }
        if self.filter.is_some() {
            keys.push("filter");
        }
        if self.project.is_some() {
            keys.push("project");
        }
        if self.join.is_some() {
            keys.push("join");
        }
        if self.union.is_some() {
            keys.push("union");
        }
        if self.materialize.is_some() {
            keys.push("materialize");
        }
        if self.sort.is_some() {
            keys.push("sort");
        }
        if self.paginate.is_some() {
            keys.push("paginate");
        }
        keys
    }
}

impl From<Node> for NodeRepr {
    fn from(node: Node) -> Self {
        let mut repr = Self::empty(node.id, node.name, node.op.node_type(), node.inputs);
        match node.op {
            Operator::Load(cfg) => repr.load = Some(cfg),
            Operator::Filter(cfg) => repr.filter = Some(cfg),
            Operator::Project(cfg) => repr.project = Some(cfg),
            Operator::Join(cfg) | Operator::LeftJoin(cfg) | Operator::AntiJoin(cfg) => {
                repr.join = Some(cfg)
            }
            Operator::Union(cfg) => repr.union = Some(cfg),
            Operator::Materialize(cfg) => repr.materialize = Some(cfg),
            Operator::Sort(cfg) => repr.sort = Some(cfg),
            Operator::Paginate(cfg) => repr.paginate = Some(cfg),
        }
        repr
    }
}

impl TryFrom<NodeRepr> for Node {
    type Error = String;

    fn try_from(mut repr: NodeRepr) -> Result<Self, Self::Error> {
        let expected_key = match repr.node_type {
            NodeType::Load => "load",
            NodeType::Filter => "filter",
            NodeType::Project => "project",
            NodeType::Join | NodeType::LeftJoin | NodeType::AntiJoin => "join",
            NodeType::Union => "union",
            NodeType::Materialize => "materialize",
            NodeType::Sort => "sort",
            NodeType::Paginate => "paginate",
        };
        if let Some(stray) = repr
            .populated_keys()
            .iter()
            .find(|key| **key != expected_key)
        {
            return Err(format!(
                "node {:?}: config {:?} does not match node type",
                repr.id, stray
            ));
        }

        let missing = || format!("node {:?}: missing {:?} config", repr.id, expected_key);
        let op = match repr.node_type {
            NodeType::Load => Operator::Load(repr.load.take().ok_or_else(missing)?),
            NodeType::Filter => Operator::Filter(repr.filter.take().ok_or_else(missing)?),
            NodeType::Project => Operator::Project(repr.project.take().ok_or_else(missing)?),
            NodeType::Join => Operator::Join(repr.join.take().ok_or_else(missing)?),
            NodeType::LeftJoin => Operator::LeftJoin(repr.join.take().ok_or_else(missing)?),
            NodeType::AntiJoin => Operator::AntiJoin(repr.join.take().ok_or_else(missing)?),
            NodeType::Union => Operator::Union(repr.union.take().unwrap_or_default()),
            NodeType::Materialize => {
                Operator::Materialize(repr.materialize.take().ok_or_else(missing)?)
            }
            NodeType::Sort => Operator::Sort(repr.sort.take().ok_or_else(missing)?),
            NodeType::Paginate => Operator::Paginate(repr.paginate.take().unwrap_or_default()),
        };
        Ok(Node {
            id: repr.id,
            name: repr.name,
            inputs: repr.inputs,
            op,
        })
    }
}
