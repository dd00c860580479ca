// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! Structural validation and topological ordering of transformation DAGs.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::{Node, NodeType, Operator, Transformation};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate node id {0:?}")]
    DuplicateNodeId(String),
    #[error("node {node:?} references unknown input {input:?}")]
    UnknownInput { node: String, input: String },
    #[error("node {node:?} expects {expected} input(s), got {actual}")]
    InputArity {
        node: String,
        expected: &'static str,
        actual: usize,
    },
    #[error("transformation contains a cycle through node {0:?}")]
    Cycle(String),
    #[error("materialize node {0:?} needs at least one output")]
    EmptyMaterialize(String),
    #[error("materialize node {0:?} has an output with an empty alias")]
    EmptyOutputAlias(String),
}

/// Checks the structural invariants: unique ids, per-type input arity,
/// resolvable inputs, materialize output aliases, acyclicity.
pub fn validate(transformation: &Transformation) -> Result<(), ValidationError> {
    let mut ids = HashSet::new();
    for node in &transformation.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    for node in &transformation.nodes {
        for input in &node.inputs {
            if !ids.contains(input.as_str()) {
                return Err(ValidationError::UnknownInput {
                    node: node.id.clone(),
                    input: input.clone(),
                });
            }
        }
        check_arity(node)?;
        if let Operator::Materialize(cfg) = &node.op {
            if cfg.outputs.is_empty() {
                return Err(ValidationError::EmptyMaterialize(node.id.clone()));
            }
            if cfg.outputs.iter().any(|o| o.alias.is_empty()) {
                return Err(ValidationError::EmptyOutputAlias(node.id.clone()));
            }
        }
    }

    kahn_order(transformation).map(|_| ())
}

fn check_arity(node: &Node) -> Result<(), ValidationError> {
    let actual = node.inputs.len();
    let (expected, ok) = match node.node_type() {
        NodeType::Load => ("no", actual == 0),
        NodeType::Filter
        | NodeType::Project
        | NodeType::Materialize
        | NodeType::Sort
        | NodeType::Paginate => ("exactly one", actual == 1),
        NodeType::Join | NodeType::LeftJoin | NodeType::AntiJoin => ("exactly two", actual == 2),
        NodeType::Union => ("at least one", actual >= 1),
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InputArity {
            node: node.id.clone(),
            expected,
            actual,
        })
    }
}

/// Kahn's algorithm with a deterministic tie-break: among ready nodes the
/// lexicographically smallest id is emitted first. The last emitted node is
/// always a sink; the driver treats it as the final node.
pub fn topological_order(transformation: &Transformation) -> Result<Vec<String>, ValidationError> {
    kahn_order(transformation)
}

fn kahn_order(transformation: &Transformation) -> Result<Vec<String>, ValidationError> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &transformation.nodes {
        indegree.entry(node.id.as_str()).or_insert(0);
        for input in &node.inputs {
            *indegree.entry(node.id.as_str()).or_insert(0) += 1;
            successors
                .entry(input.as_str())
                .or_default()
                .push(node.id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(transformation.nodes.len());
    while let Some(id) = ready.iter().next().copied() {
        ready.remove(id);
        order.push(id.to_owned());
        for successor in successors.get(id).into_iter().flatten() {
            let degree = indegree
                .get_mut(successor)
                .expect("successor indegree missing");
            *degree -= 1;
            if *degree == 0 {
                ready.insert(successor);
            }
        }
    }

    if order.len() != transformation.nodes.len() {
        let stuck = indegree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| *id)
            .min()
            .unwrap_or_default();
        return Err(ValidationError::Cycle(stuck.to_owned()));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{
        FilterConfig, JoinConfig, LoadConfig, MaterializeConfig, MaterializeOutput, UnionConfig,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn load(id: &str) -> Node {
        Node {
            id: id.to_owned(),
            name: id.to_owned(),
            inputs: vec![],
            op: Operator::Load(LoadConfig {
                alias: id.to_owned(),
                entity_type: "User".to_owned(),
                filters: vec![],
            }),
        }
    }

    fn filter(id: &str, inputs: &[&str]) -> Node {
        Node {
            id: id.to_owned(),
            name: id.to_owned(),
            inputs: inputs.iter().map(|s| (*s).to_owned()).collect(),
            op: Operator::Filter(FilterConfig::default()),
        }
    }

    fn union(id: &str, inputs: &[&str]) -> Node {
        Node {
            id: id.to_owned(),
            name: id.to_owned(),
            inputs: inputs.iter().map(|s| (*s).to_owned()).collect(),
            op: Operator::Union(UnionConfig::default()),
        }
    }

    fn make_transformation(nodes: Vec<Node>) -> Transformation {
        Transformation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "t".to_owned(),
            description: None,
            nodes,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_topological_order_respects_edges_and_ties() {
        let t = make_transformation(vec![
            union("z-union", &["b-load", "a-load"]),
            load("b-load"),
            load("a-load"),
        ]);
        let order = topological_order(&t).unwrap();
        assert_eq!(order, vec!["a-load", "b-load", "z-union"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let t = make_transformation(vec![filter("a", &["b"]), filter("b", &["a"])]);
        assert!(matches!(validate(&t), Err(ValidationError::Cycle(_))));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let t = make_transformation(vec![load("a"), load("a")]);
        assert_eq!(
            validate(&t),
            Err(ValidationError::DuplicateNodeId("a".to_owned()))
        );
    }

    #[test]
    fn test_unknown_input_is_rejected() {
        let t = make_transformation(vec![filter("f", &["ghost"])]);
        assert_eq!(
            validate(&t),
            Err(ValidationError::UnknownInput {
                node: "f".to_owned(),
                input: "ghost".to_owned(),
            })
        );
    }

    #[test]
    fn test_arity_is_enforced() {
        let t = make_transformation(vec![load("a"), filter("f", &[])]);
        assert!(matches!(
            validate(&t),
            Err(ValidationError::InputArity { .. })
        ));

        let join = Node {
            id: "j".to_owned(),
            name: "j".to_owned(),
            inputs: vec!["a".to_owned()],
            op: Operator::Join(JoinConfig::default()),
        };
        let t = make_transformation(vec![load("a"), join]);
        assert!(matches!(
            validate(&t),
            Err(ValidationError::InputArity { .. })
        ));
    }

    #[test]
    fn test_materialize_needs_outputs_with_aliases() {
        let empty = Node {
            id: "m".to_owned(),
            name: "m".to_owned(),
            inputs: vec!["a".to_owned()],
            op: Operator::Materialize(MaterializeConfig { outputs: vec![] }),
        };
        let t = make_transformation(vec![load("a"), empty]);
        assert_eq!(
            validate(&t),
            Err(ValidationError::EmptyMaterialize("m".to_owned()))
        );

        let unnamed = Node {
            id: "m".to_owned(),
            name: "m".to_owned(),
            inputs: vec!["a".to_owned()],
            op: Operator::Materialize(MaterializeConfig {
                outputs: vec![MaterializeOutput {
                    alias: String::new(),
                    fields: vec![],
                }],
            }),
        };
        let t = make_transformation(vec![load("a"), unnamed]);
        assert_eq!(
            validate(&t),
            Err(ValidationError::EmptyOutputAlias("m".to_owned()))
        );
    }

    #[test]
    fn test_valid_diamond_passes() {
        let t = make_transformation(vec![
            load("a"),
            filter("f1", &["a"]),
            filter("f2", &["a"]),
            union("u", &["f1", "f2"]),
        ]);
        assert_eq!(validate(&t), Ok(()));
        let order = topological_order(&t).unwrap();
        assert_eq!(order.last().map(String::as_str), Some("u"));
    }
}
