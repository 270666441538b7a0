//! Query requests and responses.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::node::ScoredNode;
use crate::error::Result;

/// A normalized query request.
///
/// Transforms never mutate a bundle in place; they return a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueryBundle {
    /// The raw query text shown to the LLM.
    pub query_str: String,

    /// Strings to embed instead of `query_str`.
    #[serde(default)]
    pub custom_embedding_strs: Option<Vec<String>>,

    /// Precomputed query embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl QueryBundle {
    /// Create a bundle with no custom embedding strings.
    pub fn new<S: Into<String>>(query_str: S) -> Self {
        Self {
            query_str: query_str.into(),
            custom_embedding_strs: None,
            embedding: None,
        }
    }

    /// Set custom embedding strings.
    #[must_use]
    pub fn with_embedding_strs(mut self, strs: Vec<String>) -> Self {
        self.custom_embedding_strs = Some(strs);
        self
    }

    /// Set a precomputed embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Strings to embed: the custom ones when present, else the query string.
    pub fn embedding_strs(&self) -> Vec<String> {
        match &self.custom_embedding_strs {
            Some(strs) if !strs.is_empty() => strs.clone(),
            _ => vec![self.query_str.clone()],
        }
    }
}

impl fmt::Display for QueryBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_str)
    }
}

/// Query input accepted by the runner and engines: a bare string or a bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    /// A bare query string.
    Text(String),
    /// An already-built bundle.
    Bundle(QueryBundle),
}

impl QueryInput {
    /// Normalize into a bundle.
    ///
    /// A bare string becomes a bundle whose only embedding string is the query itself.
    pub fn into_bundle(self) -> QueryBundle {
        match self {
            Self::Text(query_str) => {
                let strs = vec![query_str.clone()];
                QueryBundle::new(query_str).with_embedding_strs(strs)
            }
            Self::Bundle(bundle) => bundle,
        }
    }

    /// The query text.
    pub fn query_str(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Bundle(b) => &b.query_str,
        }
    }
}

impl From<&str> for QueryInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<QueryBundle> for QueryInput {
    fn from(b: QueryBundle) -> Self {
        Self::Bundle(b)
    }
}

impl From<&QueryBundle> for QueryInput {
    fn from(b: &QueryBundle) -> Self {
        Self::Bundle(b.clone())
    }
}

/// The answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Response {
    /// Synthesized text; `None` when no text was requested.
    pub response: Option<String>,

    /// Contributing nodes across every recursion level.
    #[serde(default)]
    pub source_nodes: Vec<ScoredNode>,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Response {
    /// Create a response.
    pub fn new(response: Option<String>, source_nodes: Vec<ScoredNode>) -> Self {
        Self {
            response,
            source_nodes,
            metadata: HashMap::new(),
        }
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

    /// Formatted listing of the source nodes, each truncated to `length` characters.
    pub fn get_formatted_sources(&self, length: usize) -> String {
        self.source_nodes
            .iter()
            .map(|n| {
                let snippet: String = n.text().chars().take(length).collect();
                format!("> Source (Node id: {}): {snippet}...", n.id())
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.response.as_deref().unwrap_or("None"))
    }
}

/// Incremental text produced by a streaming LLM call.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// A response whose text arrives incrementally.
pub struct StreamingResponse {
    /// Text deltas.
    pub response_stream: TokenStream,
    /// Contributing nodes, known before the first token.
    pub source_nodes: Vec<ScoredNode>,
}

impl StreamingResponse {
    /// Drain the stream into a regular response.
    pub async fn collect(self) -> Result<Response> {
        use futures::StreamExt;

        let mut text = String::new();
        let mut stream = self.response_stream;
        while let Some(delta) = stream.next().await {
            text.push_str(&delta?);
        }
        Ok(Response::new(Some(text), self.source_nodes))
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("source_nodes", &self.source_nodes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_input_normalizes_embedding_strs() {
        let bundle = QueryInput::from("what is rust?").into_bundle();
        assert_eq!(bundle.query_str, "what is rust?");
        assert_eq!(
            bundle.custom_embedding_strs,
            Some(vec!["what is rust?".to_string()])
        );
    }

    #[test]
    fn test_bundle_input_is_unchanged() {
        let original = QueryBundle::new("q").with_embedding_strs(vec!["a".into(), "b".into()]);
        let bundle = QueryInput::from(original.clone()).into_bundle();
        assert_eq!(bundle, original);
    }

    #[test]
    fn test_embedding_strs_fall_back_to_query() {
        assert_eq!(QueryBundle::new("q").embedding_strs(), vec!["q".to_string()]);
    }

    #[test]
    fn test_response_display() {
        assert_eq!(Response::default().to_string(), "None");
        assert_eq!(Response::new(Some("42".into()), vec![]).to_string(), "42");
    }
}
