//! Vector store trait.
//!
//! A store keeps embeddings keyed by id and answers nearest-neighbour queries. Stores
//! that do not keep node text (`stores_text() == false`) return ids only, and the
//! caller resolves them through the document store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::types::Node;

/// A metadata equality constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactMatchFilter {
    /// Metadata key.
    pub key: String,
    /// Required value.
    pub value: serde_json::Value,
}

/// Conjunction of metadata filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilters {
    /// Every filter must match.
    pub filters: Vec<ExactMatchFilter>,
}

impl MetadataFilters {
    /// Add an equality filter.
    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.push(ExactMatchFilter {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Whether no filter is set.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether `metadata` satisfies every filter.
    pub fn matches(&self, metadata: &HashMap<String, serde_json::Value>) -> bool {
        self.filters
            .iter()
            .all(|f| metadata.get(&f.key) == Some(&f.value))
    }
}

/// A nearest-neighbour request.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreQuery {
    /// Query embedding.
    pub query_embedding: Vec<f32>,
    /// Number of results.
    pub similarity_top_k: usize,
    /// Metadata constraints.
    pub filters: MetadataFilters,
}

impl VectorStoreQuery {
    /// Create an unfiltered query.
    pub fn new(query_embedding: Vec<f32>, similarity_top_k: usize) -> Self {
        Self {
            query_embedding,
            similarity_top_k,
            filters: MetadataFilters::default(),
        }
    }

    /// Set metadata filters.
    #[must_use]
    pub fn with_filters(mut self, filters: MetadataFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Result of a nearest-neighbour request, best match first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStoreQueryResult {
    /// Node payloads, for stores that keep text.
    pub nodes: Option<Vec<Node>>,
    /// Similarity per result.
    pub similarities: Vec<f32>,
    /// Vector id per result.
    pub ids: Vec<String>,
}

/// Storage and search of embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync + std::fmt::Debug {
    /// Whether query results carry node payloads.
    fn stores_text(&self) -> bool;

    /// Add nodes, each of which must carry an embedding. Returns vector ids in order.
    async fn add(&self, nodes: Vec<Node>) -> Result<Vec<String>>;

    /// Delete vectors by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Delete every vector whose metadata matches, returning how many were removed.
    async fn delete_by_filter(&self, filters: &MetadataFilters) -> Result<usize>;

    /// Nearest-neighbour search.
    async fn query(&self, query: &VectorStoreQuery) -> Result<VectorStoreQueryResult>;

    /// Number of stored vectors.
    async fn count(&self) -> Result<usize>;

    /// Get a human-readable name for this store.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
