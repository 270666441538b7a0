//! Source documents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A source document as handed to index builders.
///
/// Unlike nodes, a document may arrive without an id; the document store assigns one
/// on insert when asked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    /// Document id, if assigned.
    #[serde(default)]
    pub doc_id: Option<String>,
    /// Raw text.
    pub text: String,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Document-level embedding, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Create a document without an id.
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Set the id.
    #[must_use]
    pub fn with_id<S: Into<String>>(mut self, doc_id: S) -> Self {
        self.doc_id = Some(doc_id.into());
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
}
