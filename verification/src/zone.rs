//! Availability zone capacity analysis
//!
//! Storage is laid out as a tree of failure domains (root → rack → host →
//! osd, with any of the intermediate CRUSH bucket types in between). When
//! hosts go away, their data has to be re-replicated somewhere under the same
//! ancestors. This module checks that every ancestor of a removed host has
//! enough free space to absorb the used space of all removed hosts below it.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VerifyError, VerifyResult};
use crate::result::Verdict;

/// One node of the storage tree, as reported by `ceph osd df tree`.
/// Capacities are in KiB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub kb: u64,
    #[serde(default)]
    pub kb_used: u64,
    #[serde(default)]
    pub kb_avail: u64,
    #[serde(default)]
    pub children: Vec<i64>,
}

impl StorageNode {
    /// `<type>-<name>(<id>)`
    pub fn label(&self) -> String {
        format!("{}-{}({})", self.node_type, self.name, self.id)
    }
}

/// Output of the `show-disk-free` action
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiskFree {
    #[serde(default)]
    pub nodes: Vec<StorageNode>,
}

/// A unit scheduled for removal and the host it runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedUnit {
    pub unit: String,
    pub hostname: String,
}

impl RemovedUnit {
    pub fn new(unit: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            hostname: hostname.into(),
        }
    }
}

/// Validated storage tree. Edges point from parent to child.
#[derive(Debug)]
pub struct ZoneTree {
    graph: DiGraph<StorageNode, ()>,
    by_id: HashMap<i64, NodeIndex>,
}

impl ZoneTree {
    /// Build a tree from a flat node list.
    ///
    /// Fails on duplicate ids, children that reference unknown ids, nodes with
    /// two parents and cycles.
    pub fn build(nodes: Vec<StorageNode>) -> VerifyResult<Self> {
        let mut graph = DiGraph::with_capacity(nodes.len(), nodes.len());
        let mut by_id = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let id = node.id;
            let idx = graph.add_node(node);
            if by_id.insert(id, idx).is_some() {
                return Err(tree_error(format!("duplicate node id {id}")));
            }
        }

        let mut parent_of: HashMap<i64, i64> = HashMap::new();
        let edges: Vec<(i64, i64)> = graph
            .node_weights()
            .flat_map(|n| n.children.iter().map(move |c| (n.id, *c)))
            .collect();

        for (parent, child) in edges {
            let child_idx = *by_id.get(&child).ok_or_else(|| {
                tree_error(format!("node {parent} references unknown child {child}"))
            })?;
            if let Some(previous) = parent_of.insert(child, parent) {
                return Err(tree_error(format!(
                    "node {child} has two parents: {previous} and {parent}"
                )));
            }
            graph.add_edge(by_id[&parent], child_idx, ());
        }

        if is_cyclic_directed(&graph) {
            return Err(tree_error("storage hierarchy contains a cycle"));
        }

        Ok(Self { graph, by_id })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, id: i64) -> Option<&StorageNode> {
        self.by_id.get(&id).map(|idx| &self.graph[*idx])
    }

    fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Incoming).next()
    }

    /// Ancestors of `idx`, nearest first
    fn ancestors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut chain = Vec::new();
        let mut current = self.parent(idx);
        while let Some(p) = current {
            chain.push(p);
            current = self.parent(p);
        }
        chain
    }

    /// Path from the root down to `id`, e.g.
    /// `root-default(-1) -> rack-r1(-3) -> host-node1(-5)`
    pub fn path(&self, id: i64) -> Option<String> {
        let idx = *self.by_id.get(&id)?;
        Some(self.path_of(idx))
    }

    fn path_of(&self, idx: NodeIndex) -> String {
        let mut chain = self.ancestors(idx);
        chain.reverse();
        chain.push(idx);
        chain
            .iter()
            .map(|i| self.graph[*i].label())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// First node whose name matches `name` (node order of the input)
    fn find_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|idx| self.graph[*idx].name == name)
    }
}

fn tree_error(message: impl Into<String>) -> VerifyError {
    VerifyError::parse("storage hierarchy", message)
}

/// Decide whether the hosts of `removed` can go away without running any
/// ancestor out of space.
///
/// Used capacity of every removed host is summed per ancestor. Hosts that sit
/// below another removed host are already part of that host's usage and are
/// not counted again.
pub fn check_capacity(nodes: Vec<StorageNode>, removed: &[RemovedUnit]) -> VerifyResult<Verdict> {
    let tree = ZoneTree::build(nodes)?;

    // host node → units on it, in input order
    let mut hosts: Vec<(NodeIndex, Vec<&str>)> = Vec::new();
    for r in removed {
        let idx = tree.find_by_name(&r.hostname).ok_or_else(|| {
            tree_error(format!(
                "host '{}' of unit {} not found in storage hierarchy",
                r.hostname, r.unit
            ))
        })?;
        match hosts.iter_mut().find(|(h, _)| *h == idx) {
            Some((_, units)) => units.push(r.unit.as_str()),
            None => hosts.push((idx, vec![r.unit.as_str()])),
        }
    }

    let removed_set: Vec<NodeIndex> = hosts.iter().map(|(idx, _)| *idx).collect();
    let counted: Vec<&(NodeIndex, Vec<&str>)> = hosts
        .iter()
        .filter(|(idx, _)| {
            !tree
                .ancestors(*idx)
                .iter()
                .any(|a| removed_set.contains(a))
        })
        .collect();

    let mut required: BTreeMap<NodeIndex, u64> = BTreeMap::new();
    let mut units_below: BTreeMap<NodeIndex, Vec<&str>> = BTreeMap::new();
    for (idx, units) in &hosts {
        for ancestor in tree.ancestors(*idx) {
            units_below.entry(ancestor).or_default().extend(units.iter().copied());
        }
    }
    for (idx, _) in &counted {
        let used = tree.graph[*idx].kb_used;
        for ancestor in tree.ancestors(*idx) {
            let sum = required.entry(ancestor).or_insert(0);
            *sum = sum.saturating_add(used);
        }
    }

    for (idx, _) in &hosts {
        for ancestor in tree.ancestors(*idx) {
            let node = &tree.graph[ancestor];
            let needed = required.get(&ancestor).copied().unwrap_or(0);
            debug!(
                node = %node.label(),
                available = node.kb_avail,
                required = needed,
                "Capacity check"
            );
            if node.kb_avail < needed {
                let units = units_below
                    .get(&ancestor)
                    .map(|u| u.join(", "))
                    .unwrap_or_default();
                return Ok(Verdict::fail(format!(
                    "It's not safe to remove units [{units}] from {}: {needed} KiB of data \
                     would not fit into {} KiB of free space.",
                    tree.path_of(ancestor),
                    node.kb_avail
                )));
            }
        }
    }

    Ok(Verdict::ok("Availability zone check passed."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Severity;

    fn node(id: i64, name: &str, node_type: &str, used: u64, avail: u64, children: &[i64]) -> StorageNode {
        StorageNode {
            id,
            name: name.to_string(),
            node_type: node_type.to_string(),
            kb: used + avail,
            kb_used: used,
            kb_avail: avail,
            children: children.to_vec(),
        }
    }

    /// root(-1) → rack(-2) → host1(-3), host2(-4), host3(-5); each host one osd.
    fn cluster(rack_avail: u64, used: [u64; 3]) -> Vec<StorageNode> {
        vec![
            node(-1, "default", "root", 0, 1_000, &[-2]),
            node(-2, "r1", "rack", 0, rack_avail, &[-3, -4, -5]),
            node(-3, "node1", "host", used[0], 50, &[0]),
            node(-4, "node2", "host", used[1], 50, &[1]),
            node(-5, "node3", "host", used[2], 50, &[2]),
            node(0, "osd.0", "osd", used[0], 50, &[]),
            node(1, "osd.1", "osd", used[1], 50, &[]),
            node(2, "osd.2", "osd", used[2], 50, &[]),
        ]
    }

    #[test]
    fn test_single_host_fits() {
        let verdict = check_capacity(cluster(100, [60, 10, 10]), &[RemovedUnit::new("ceph-osd/0", "node1")]).unwrap();
        assert!(verdict.success());
        assert_eq!(verdict.partials()[0].message, "Availability zone check passed.");
    }

    #[test]
    fn test_shared_ancestor_sums_usage() {
        let verdict = check_capacity(
            cluster(100, [60, 50, 10]),
            &[
                RemovedUnit::new("ceph-osd/0", "node1"),
                RemovedUnit::new("ceph-osd/1", "node2"),
            ],
        )
        .unwrap();
        assert_eq!(verdict.len(), 1);
        assert_eq!(verdict.partials()[0].severity, Severity::Fail);
        let message = &verdict.partials()[0].message;
        assert!(message.contains("[ceph-osd/0, ceph-osd/1]"), "{message}");
        assert!(message.contains("root-default(-1) -> rack-r1(-2)"), "{message}");
        assert!(message.contains("110 KiB"), "{message}");
    }

    #[test]
    fn test_exact_fit_passes() {
        let verdict = check_capacity(
            cluster(110, [60, 50, 10]),
            &[
                RemovedUnit::new("ceph-osd/0", "node1"),
                RemovedUnit::new("ceph-osd/1", "node2"),
            ],
        )
        .unwrap();
        assert!(verdict.success());
    }

    #[test]
    fn test_units_on_same_host_counted_once() {
        let verdict = check_capacity(
            cluster(70, [60, 10, 10]),
            &[
                RemovedUnit::new("ceph-osd/0", "node1"),
                RemovedUnit::new("ceph-mon/0", "node1"),
            ],
        )
        .unwrap();
        assert!(verdict.success());
    }

    #[test]
    fn test_nested_removed_node_not_double_counted() {
        // the rack itself and a host below it
        let verdict = check_capacity(
            cluster(10, [60, 10, 10]),
            &[
                RemovedUnit::new("ceph-osd/0", "node1"),
                RemovedUnit::new("switch/0", "r1"),
            ],
        )
        .unwrap();
        // root only needs to absorb the rack's own usage (0)
        assert!(verdict.success());
    }

    #[test]
    fn test_unknown_host_is_parse_error() {
        let err = check_capacity(cluster(100, [1, 1, 1]), &[RemovedUnit::new("ceph-osd/9", "nowhere")]).unwrap_err();
        assert_eq!(err.code(), "PARSE");
    }

    #[test]
    fn test_malformed_trees_rejected() {
        let dangling = vec![node(-1, "default", "root", 0, 10, &[-7])];
        assert!(ZoneTree::build(dangling).is_err());

        let duplicate = vec![
            node(-1, "default", "root", 0, 10, &[]),
            node(-1, "other", "root", 0, 10, &[]),
        ];
        assert!(ZoneTree::build(duplicate).is_err());

        let two_parents = vec![
            node(-1, "a", "rack", 0, 10, &[0]),
            node(-2, "b", "rack", 0, 10, &[0]),
            node(0, "osd.0", "osd", 0, 10, &[]),
        ];
        assert!(ZoneTree::build(two_parents).is_err());

        let cycle = vec![
            node(-1, "a", "rack", 0, 10, &[-2]),
            node(-2, "b", "host", 0, 10, &[-1]),
        ];
        let err = ZoneTree::build(cycle).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_path_is_root_first() {
        let tree = ZoneTree::build(cluster(100, [1, 1, 1])).unwrap();
        assert_eq!(
            tree.path(1).unwrap(),
            "root-default(-1) -> rack-r1(-2) -> host-node2(-4) -> osd-osd.1(1)"
        );
        assert_eq!(tree.len(), 8);
    }

    #[test]
    fn test_parses_disk_free_output() {
        let raw = r#"{"nodes": [
            {"id": -1, "name": "default", "type": "root", "type_id": 10, "kb": 300, "kb_used": 30, "kb_avail": 270, "children": [-3]},
            {"id": -3, "name": "juju-1", "type": "host", "type_id": 1, "kb": 300, "kb_used": 30, "kb_avail": 270, "children": [0]},
            {"id": 0, "name": "osd.0", "type": "osd", "type_id": 0, "kb": 300, "kb_used": 30, "kb_avail": 270}
        ], "stray": []}"#;
        let df: DiskFree = serde_json::from_str(raw).unwrap();
        assert_eq!(df.nodes.len(), 3);
        let verdict = check_capacity(df.nodes, &[RemovedUnit::new("ceph-osd/0", "juju-1")]).unwrap();
        assert!(verdict.success());
    }
}
