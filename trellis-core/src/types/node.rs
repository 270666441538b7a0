//! Nodes: the atomic unit of retrievable content.
//!
//! A [`Node`] is either plain text or an *index node* that points at a nested index
//! structure. Retrievers hand index nodes back untouched; resolving them is the job
//! of the query runner and the graph query engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::relationships::{NodeRelationship, NodeRelationships};

/// What a node carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Literal text content.
    #[default]
    Text,
    /// A reference to another index; the node text is that index's summary.
    Index {
        /// Id of the referenced index struct.
        index_id: String,
    },
}

/// A retrievable content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier, stable once assigned.
    pub id: String,

    /// Text content.
    pub text: String,

    /// Text or index reference.
    #[serde(default)]
    pub kind: NodeKind,

    /// Dense embedding, if computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Relationships to other nodes, by id.
    #[serde(default, skip_serializing_if = "NodeRelationships::is_empty")]
    pub relationships: NodeRelationships,
}

impl Node {
    /// Create a text node with a fresh id.
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            kind: NodeKind::Text,
            embedding: None,
            metadata: HashMap::new(),
            relationships: NodeRelationships::new(),
        }
    }

    /// Create an index node referencing `index_id`, with `text` as its summary.
    pub fn index<S: Into<String>, I: Into<String>>(text: S, index_id: I) -> Self {
        Self {
            kind: NodeKind::Index {
                index_id: index_id.into(),
            },
            ..Self::new(text)
        }
    }

    /// Replace the id.
    #[must_use]
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = id.into();
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach an embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Record a relationship.
    #[must_use]
    pub fn with_relationship(mut self, kind: NodeRelationship, node_id: impl Into<String>) -> Self {
        self.relationships.set(kind, node_id);
        self
    }

    /// The text handed to prompts.
    pub fn get_text(&self) -> &str {
        &self.text
    }

    /// Whether this node references a nested index.
    pub fn is_index_node(&self) -> bool {
        matches!(self.kind, NodeKind::Index { .. })
    }

    /// The referenced index id, for index nodes.
    pub fn index_id(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Index { index_id } => Some(index_id),
            NodeKind::Text => None,
        }
    }

    /// Id of the document this node was parsed from.
    pub fn ref_doc_id(&self) -> Option<&str> {
        self.relationships.source()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.text.chars().take(80).collect();
        match self.index_id() {
            Some(index_id) => write!(f, "IndexNode(id={}, index_id={index_id}): {preview}", self.id),
            None => write!(f, "Node(id={}): {preview}", self.id),
        }
    }
}

/// A node paired with an optional retrieval score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    /// The node.
    pub node: Node,
    /// Similarity or ranking score; `None` for unranked retrieval.
    pub score: Option<f32>,
}

impl ScoredNode {
    /// Wrap a node with a score.
    pub fn new(node: Node, score: f32) -> Self {
        Self {
            node,
            score: Some(score),
        }
    }

    /// Wrap a node without a score.
    pub fn unscored(node: Node) -> Self {
        Self { node, score: None }
    }

    /// Node id.
    pub fn id(&self) -> &str {
        &self.node.id
    }

    /// Node text.
    pub fn text(&self) -> &str {
        self.node.get_text()
    }
}

impl From<Node> for ScoredNode {
    fn from(node: Node) -> Self {
        Self::unscored(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_node_accessors() {
        let node = Node::index("summary of child", "child-1");
        assert!(node.is_index_node());
        assert_eq!(node.index_id(), Some("child-1"));
        assert_eq!(node.get_text(), "summary of child");

        let text = Node::new("plain");
        assert!(!text.is_index_node());
        assert_eq!(text.index_id(), None);
    }

    #[test]
    fn test_node_serde_keeps_kind() {
        let node = Node::index("s", "child").with_metadata("k", "v");
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["kind"]["kind"], "index");
        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_missing_kind_defaults_to_text() {
        let back: Node = serde_json::from_str(r#"{"id":"n1","text":"hello"}"#).unwrap();
        assert_eq!(back.kind, NodeKind::Text);
        assert!(back.embedding.is_none());
    }
}
