//! Relationships between nodes.
//!
//! Relationships are recorded by id, never by live reference, so a node can be
//! cloned out of the document store without dragging its neighbours along.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of relationship a node has with another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRelationship {
    /// The document the node was parsed from.
    Source,
    /// The preceding node in the source document.
    Previous,
    /// The following node in the source document.
    Next,
    /// The parent node in a hierarchy.
    Parent,
    /// A child node in a hierarchy.
    Child,
}

impl fmt::Display for NodeRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRelationship::Source => write!(f, "SOURCE"),
            NodeRelationship::Previous => write!(f, "PREVIOUS"),
            NodeRelationship::Next => write!(f, "NEXT"),
            NodeRelationship::Parent => write!(f, "PARENT"),
            NodeRelationship::Child => write!(f, "CHILD"),
        }
    }
}

/// Relationship table of one node.
///
/// Every kind except [`NodeRelationship::Child`] holds at most one id; children keep
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRelationships {
    single: BTreeMap<NodeRelationship, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<String>,
}

impl NodeRelationships {
    /// Create an empty relationship table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single-valued relationship, replacing any previous value.
    ///
    /// Setting [`NodeRelationship::Child`] appends instead.
    pub fn set(&mut self, kind: NodeRelationship, node_id: impl Into<String>) {
        let node_id = node_id.into();
        if kind == NodeRelationship::Child {
            self.add_child(node_id);
        } else {
            self.single.insert(kind, node_id);
        }
    }

    /// Get a single-valued relationship.
    pub fn get(&self, kind: NodeRelationship) -> Option<&str> {
        self.single.get(&kind).map(String::as_str)
    }

    /// Append a child id unless it is already present.
    pub fn add_child(&mut self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        if !self.children.contains(&node_id) {
            self.children.push(node_id);
        }
    }

    /// Child ids in insertion order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Id of the source document.
    pub fn source(&self) -> Option<&str> {
        self.get(NodeRelationship::Source)
    }

    /// Id of the parent node.
    pub fn parent(&self) -> Option<&str> {
        self.get(NodeRelationship::Parent)
    }

    /// Remove a relationship. Removing `Child` clears all children.
    pub fn remove(&mut self, kind: NodeRelationship) {
        if kind == NodeRelationship::Child {
            self.children.clear();
        } else {
            self.single.remove(&kind);
        }
    }

    /// Whether no relationship is recorded.
    pub fn is_empty(&self) -> bool {
        self.single.is_empty() && self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_relationships_replace() {
        let mut rels = NodeRelationships::new();
        rels.set(NodeRelationship::Parent, "p1");
        rels.set(NodeRelationship::Parent, "p2");
        assert_eq!(rels.parent(), Some("p2"));
    }

    #[test]
    fn test_children_deduplicate_and_keep_order() {
        let mut rels = NodeRelationships::new();
        rels.set(NodeRelationship::Child, "b");
        rels.add_child("a");
        rels.add_child("b");
        assert_eq!(rels.children(), ["b".to_string(), "a".to_string()]);
        rels.remove(NodeRelationship::Child);
        assert!(rels.is_empty());
    }
}
