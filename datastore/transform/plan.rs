// SPDX-FileCopyrightText: © 2026 Trellis <info@trellis.dev>

//! Backward page-request planning: how many rows each node must yield so the
//! scan at the bottom stays as small as the request allows.

use std::collections::HashMap;

use log::debug;

use super::{Node, Operator};

/// The `(limit, offset)` window a node's consumers may read. A zero limit
/// means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u64,
    pub offset: u64,
}

impl PageRequest {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit == 0
    }

    /// The last row index (exclusive) the window can reach. Meaningless for
    /// unbounded requests.
    pub fn window_end(&self) -> u64 {
        self.limit + self.offset
    }
}

/// Walks a topological order backwards and computes, per node id, the maximal
/// window any downstream consumer may request. The final node starts with the
/// caller's request; every other node derives its window from its consumers.
///
/// Merging across several consumers takes the union of windows: any unbounded
/// consumer forces the node unbounded, otherwise the largest window end wins.
pub fn plan_requests(sorted: &[&Node], request: PageRequest) -> HashMap<String, PageRequest> {
    let mut requests: HashMap<String, PageRequest> = HashMap::new();
    if let Some(last) = sorted.last() {
        requests.insert(last.id.clone(), request);
    }

    for node in sorted.iter().rev() {
        let current = requests.get(&node.id).copied().unwrap_or_default();
        let need = if current.limit == 0 {
            0
        } else {
            current.limit + current.offset
        };

        let incoming = match &node.op {
            // A sort cannot produce its true leading rows from a truncated
            // input; a filter may discard arbitrarily many rows before
            // filling its window; a join both drops unmatched left rows and
            // indexes the complete right input. All of them keep their
            // upstream unbounded.
            Operator::Sort(_)
            | Operator::Filter(_)
            | Operator::Join(_)
            | Operator::LeftJoin(_)
            | Operator::AntiJoin(_) => PageRequest::default(),
            // Paginate consumes its own window on top of what downstream
            // needs; its input must cover the deeper of the two.
            Operator::Paginate(cfg) => {
                let mut total = need;
                if cfg.limit > 0 && (total == 0 || total > cfg.limit) {
                    total = cfg.limit;
                }
                if total > 0 {
                    PageRequest::new(total + cfg.offset, 0)
                } else if cfg.limit > 0 {
                    PageRequest::new(cfg.limit + cfg.offset, 0)
                } else {
                    PageRequest::default()
                }
            }
            // Load has no inputs; project, materialize and union are
            // one-to-one (or prefix-stable concatenation) and pass the
            // window through.
            Operator::Load(_)
            | Operator::Project(_)
            | Operator::Materialize(_)
            | Operator::Union(_) => PageRequest::new(need, 0),
        };

        for input in &node.inputs {
            merge_request(&mut requests, input, incoming);
        }
    }

    for node in sorted {
        let request = requests.get(&node.id).copied().unwrap_or_default();
        debug!(
            "planned node {} window limit={} offset={}",
            node.id, request.limit, request.offset
        );
    }
    requests
}

fn merge_request(requests: &mut HashMap<String, PageRequest>, id: &str, incoming: PageRequest) {
    let merged = match requests.get(id).copied() {
        None => incoming,
        Some(existing) if existing.is_unbounded() || incoming.is_unbounded() => {
            PageRequest::default()
        }
        Some(existing) => {
            PageRequest::new(existing.window_end().max(incoming.window_end()), 0)
        }
    };
    requests.insert(id.to_owned(), merged);
}

/// Counts candidate rows against a window. Offset trimming happens at the
/// paginate step; the limiter only caps how deep an operator produces.
#[derive(Debug)]
pub struct PageLimiter {
    request: PageRequest,
    total: u64,
}

impl PageLimiter {
    pub fn new(request: PageRequest) -> Self {
        Self { request, total: 0 }
    }

    /// Accounts for one candidate row; returns whether it falls inside the
    /// window the consumers may read.
    pub fn include(&mut self) -> bool {
        self.total += 1;
        self.request.limit == 0 || self.total <= self.request.window_end()
    }

    pub fn filled(&self) -> bool {
        self.request.limit > 0 && self.total >= self.request.window_end()
    }

    /// Candidate rows seen so far, kept or not.
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{
        FilterConfig, LoadConfig, PaginateConfig, ProjectConfig, SortConfig, UnionConfig,
    };

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

    fn node(id: &str, inputs: &[&str], op: Operator) -> Node {
        Node {
            id: id.to_owned(),
            name: id.to_owned(),
            inputs: inputs.iter().map(|s| (*s).to_owned()).collect(),
            op,
        }
    }

    #[test]
    fn test_single_node_keeps_the_caller_request() {
        let l = load("l");
        let requests = plan_requests(&[&l], PageRequest::new(5, 10));
        assert_eq!(requests["l"], PageRequest::new(5, 10));
    }

    #[test]
    fn test_paginate_window_reaches_the_load() {
        let l = load("l");
        let s = node(
            "s",
            &["l"],
            Operator::Sort(SortConfig {
                alias: None,
                field: "name".to_owned(),
                direction: Default::default(),
            }),
        );
        let p = node(
            "p",
            &["s"],
            Operator::Paginate(PaginateConfig {
                limit: 10,
                offset: 20,
            }),
        );
        let requests = plan_requests(&[&l, &s, &p], PageRequest::new(0, 0));
        // Paginate needs rows up to its own window end; the sort itself
        // needs its complete input, so the load stays unbounded.
        assert_eq!(requests["s"], PageRequest::new(30, 0));
        assert_eq!(requests["l"], PageRequest::default());
    }

    #[test]
    fn test_sort_forces_unbounded_upstream() {
        let l = load("l");
        let s = node(
            "s",
            &["l"],
            Operator::Sort(SortConfig {
                alias: None,
                field: "name".to_owned(),
                direction: Default::default(),
            }),
        );
        let requests = plan_requests(&[&l, &s], PageRequest::new(1, 0));
        assert_eq!(requests["s"], PageRequest::new(1, 0));
        assert_eq!(requests["l"], PageRequest::default());
    }

    #[test]
    fn test_downstream_window_tightens_paginate() {
        let l = load("l");
        let p = node(
            "p",
            &["l"],
            Operator::Paginate(PaginateConfig {
                limit: 100,
                offset: 4,
            }),
        );
        let pr = node(
            "pr",
            &["p"],
            Operator::Project(ProjectConfig {
                alias: None,
                fields: vec!["name".to_owned()],
            }),
        );
        let requests = plan_requests(&[&l, &p, &pr], PageRequest::new(2, 1));
        // Downstream needs 3 rows, tighter than paginate's own limit of 100;
        // paginate adds its own offset before asking the load.
        assert_eq!(requests["p"], PageRequest::new(3, 0));
        assert_eq!(requests["l"], PageRequest::new(7, 0));
    }

    #[test]
    fn test_filter_forces_unbounded_upstream() {
        let l = load("l");
        let f = node("f", &["l"], Operator::Filter(FilterConfig::default()));
        let requests = plan_requests(&[&l, &f], PageRequest::new(2, 1));
        assert_eq!(requests["f"], PageRequest::new(2, 1));
        // The filter may discard any number of rows before its window fills.
        assert_eq!(requests["l"], PageRequest::default());
    }

    #[test]
    fn test_merge_takes_the_union_of_windows() {
        let l = load("l");
        let p1 = node(
            "p1",
            &["l"],
            Operator::Project(ProjectConfig {
                alias: None,
                fields: vec!["name".to_owned()],
            }),
        );
        let p2 = node(
            "p2",
            &["l"],
            Operator::Project(ProjectConfig {
                alias: None,
                fields: vec!["email".to_owned()],
            }),
        );
        let u = node("u", &["p1", "p2"], Operator::Union(UnionConfig::default()));
        let requests = plan_requests(&[&l, &p1, &p2, &u], PageRequest::new(4, 2));
        assert_eq!(requests["p1"], PageRequest::new(6, 0));
        assert_eq!(requests["p2"], PageRequest::new(6, 0));
        // Two bounded consumers merge to the larger window end.
        assert_eq!(requests["l"], PageRequest::new(6, 0));
    }

    #[test]
    fn test_unbounded_consumer_wins_the_merge() {
        let l = load("l");
        let p1 = node(
            "p1",
            &["l"],
            Operator::Project(ProjectConfig {
                alias: None,
                fields: vec!["name".to_owned()],
            }),
        );
        let s = node(
            "s",
            &["l"],
            Operator::Sort(SortConfig {
                alias: None,
                field: "name".to_owned(),
                direction: Default::default(),
            }),
        );
        let u = node("u", &["p1", "s"], Operator::Union(UnionConfig::default()));
        let requests = plan_requests(&[&l, &p1, &s, &u], PageRequest::new(5, 0));
        // The project asks the load for 5 rows, the sort for everything; the
        // unbounded side wins the merge.
        assert_eq!(requests["p1"], PageRequest::new(5, 0));
        assert_eq!(requests["l"], PageRequest::default());
    }

    #[test]
    fn test_limiter_window_accounting() {
        let mut limiter = PageLimiter::new(PageRequest::new(2, 1));
        assert!(limiter.include());
        assert!(limiter.include());
        assert!(limiter.include());
        assert!(limiter.filled());
        assert!(!limiter.include());
        assert_eq!(limiter.total(), 4);
    }

    #[test]
    fn test_limiter_unbounded_keeps_everything() {
        let mut limiter = PageLimiter::new(PageRequest::default());
        for _ in 0..100 {
            assert!(limiter.include());
        }
        assert!(!limiter.filled());
        assert_eq!(limiter.total(), 100);
    }
}
