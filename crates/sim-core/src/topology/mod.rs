//! Topology
//!
//! The immutable graph agents are bound to. Nodes keep their insertion
//! order, which is also the order agents are stepped in.

pub mod generators;
pub mod gexf;
pub mod loader;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sim_history::{NodeId, Value};
use std::collections::BTreeMap;

use crate::error::ConfigError;

pub use generators::generate;
pub use loader::load_network;

/// Static attributes attached to a node.
pub type Attributes = BTreeMap<String, Value>;

/// An edge between two node indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: Option<f64>,
}

/// Simple graph (no parallel edges), directed or undirected.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    directed: bool,
    nodes: IndexMap<NodeId, Attributes>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
}

impl Topology {
    pub fn new(directed: bool) -> Self {
        Self {
            directed,
            ..Default::default()
        }
    }

    pub fn undirected() -> Self {
        Self::new(false)
    }

    /// Graph with `n` isolated nodes `"0".."n-1"`.
    pub fn with_nodes(n: usize) -> Self {
        let mut topology = Self::undirected();
        for i in 0..n {
            topology.add_node(NodeId::from(i), Attributes::new());
        }
        topology
    }

    /// Adds a node, or merges attributes into an existing one. Returns its index.
    pub fn add_node(&mut self, id: NodeId, attributes: Attributes) -> usize {
        if let Some((index, _, existing)) = self.nodes.get_full_mut(&id) {
            existing.extend(attributes);
            return index;
        }
        let (index, _) = self.nodes.insert_full(id, attributes);
        self.adjacency.push(Vec::new());
        index
    }

    /// Sets a single attribute on the node at `index`.
    pub fn set_node_attribute(&mut self, index: usize, key: impl Into<String>, value: Value) {
        if let Some((_, attrs)) = self.nodes.get_index_mut(index) {
            attrs.insert(key.into(), value);
        }
    }

    /// Adds an edge between two node ids, creating missing nodes.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, weight: Option<f64>) -> bool {
        let s = self.add_node(source, Attributes::new());
        let t = self.add_node(target, Attributes::new());
        self.add_edge_by_index(s, t, weight)
    }

    /// Adds an edge between existing node indices. Returns false if the edge
    /// already exists or an index is out of range.
    pub fn add_edge_by_index(&mut self, source: usize, target: usize, weight: Option<f64>) -> bool {
        if source >= self.len() || target >= self.len() || self.has_edge(source, target) {
            return false;
        }
        self.adjacency[source].push(target);
        if !self.directed && source != target {
            self.adjacency[target].push(source);
        }
        self.edges.push(Edge {
            source,
            target,
            weight,
        });
        true
    }

    pub fn has_edge(&self, source: usize, target: usize) -> bool {
        self.adjacency
            .get(source)
            .is_some_and(|adj| adj.contains(&target))
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.keys()
    }

    pub fn node_id(&self, index: usize) -> Option<&NodeId> {
        self.nodes.get_index(index).map(|(id, _)| id)
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    pub fn attributes(&self, index: usize) -> Option<&Attributes> {
        self.nodes.get_index(index).map(|(_, attrs)| attrs)
    }

    /// Adjacent node indices (successors for directed graphs), in insertion order.
    pub fn neighbors(&self, index: usize) -> &[usize] {
        self.adjacency.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of neighbors of the node at `index`.
    pub fn degree(&self, index: usize) -> usize {
        self.neighbors(index).len()
    }

    /// Node-link form used in serialized live state and `.json` topology files.
    pub fn to_data(&self) -> TopologyData {
        TopologyData {
            directed: self.directed,
            nodes: self
                .nodes
                .iter()
                .map(|(id, attrs)| NodeData {
                    id: id.clone(),
                    attributes: attrs.clone(),
                })
                .collect(),
            links: self
                .edges
                .iter()
                .map(|e| LinkData {
                    source: self.nodes.get_index(e.source).map(|(id, _)| id.clone()).unwrap_or_default(),
                    target: self.nodes.get_index(e.target).map(|(id, _)| id.clone()).unwrap_or_default(),
                    weight: e.weight,
                })
                .collect(),
        }
    }

    pub fn from_data(data: TopologyData) -> Result<Self, ConfigError> {
        let mut topology = Self::new(data.directed);
        for node in data.nodes {
            topology.add_node(node.id, node.attributes);
        }
        for link in data.links {
            for end in [&link.source, &link.target] {
                if topology.index_of(end).is_none() {
                    return Err(ConfigError::UnknownNode {
                        field: "links".to_string(),
                        node: end.clone(),
                    });
                }
            }
            topology.add_edge(link.source, link.target, link.weight);
        }
        Ok(topology)
    }
}

/// Node-link graph description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyData {
    #[serde(default)]
    pub directed: bool,
    pub nodes: Vec<NodeData>,
    #[serde(default, alias = "edges")]
    pub links: Vec<LinkData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    #[serde(flatten)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkData {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> Topology {
        let mut t = Topology::undirected();
        t.add_edge("Torvalds".into(), "balkian".into(), None);
        t.add_edge("Torvalds".into(), "other".into(), Some(2.0));
        t
    }

    #[test]
    fn test_undirected_adjacency() {
        let t = star();
        assert_eq!(t.len(), 3);
        assert_eq!(t.edge_count(), 2);
        assert_eq!(t.degree(0), 2);
        assert_eq!(t.degree(1), 1);
        assert_eq!(t.neighbors(2), &[0]);
        assert!(t.has_edge(1, 0));
    }

    #[test]
    fn test_no_parallel_edges() {
        let mut t = star();
        assert!(!t.add_edge("balkian".into(), "Torvalds".into(), None));
        assert_eq!(t.edge_count(), 2);
    }

    #[test]
    fn test_directed_neighbors_are_successors() {
        let mut t = Topology::new(true);
        t.add_edge("a".into(), "b".into(), None);
        assert_eq!(t.degree(0), 1);
        assert_eq!(t.degree(1), 0);
    }

    #[test]
    fn test_node_order_is_insertion_order() {
        let t = star();
        let ids: Vec<_> = t.node_ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["Torvalds", "balkian", "other"]);
        assert_eq!(t.index_of(&NodeId::from("other")), Some(2));
    }

    #[test]
    fn test_node_link_round_trip() {
        let mut t = star();
        t.set_node_attribute(1, "weight", Value::from(3));
        let data = t.to_data();
        let json = serde_json::to_string(&data).unwrap();
        let back: TopologyData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);

        let rebuilt = Topology::from_data(back).unwrap();
        assert_eq!(rebuilt.len(), 3);
        assert_eq!(rebuilt.edges()[1].weight, Some(2.0));
        assert_eq!(rebuilt.attributes(1).unwrap().get("weight"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_node_link_rejects_dangling_link() {
        let data = TopologyData {
            directed: false,
            nodes: vec![NodeData {
                id: "a".into(),
                attributes: Attributes::new(),
            }],
            links: vec![LinkData {
                source: "a".into(),
                target: "ghost".into(),
                weight: None,
            }],
        };
        assert!(matches!(
            Topology::from_data(data),
            Err(ConfigError::UnknownNode { .. })
        ));
    }
}
