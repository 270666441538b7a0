//! In-memory vector store.
//!
//! Keeps every node and its embedding in memory and answers queries with an exact
//! scan. Suitable for tests, demos and small indices.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use trellis_core::traits::{
    MetadataFilters, SimilarityMode, VectorStore, VectorStoreQuery, VectorStoreQueryResult,
    similarity,
};
use trellis_core::{Node, Result, TrellisError};

#[derive(Debug, Default)]
struct Entries {
    /// Insertion order, so equal scores rank stably.
    order: Vec<String>,
    nodes: HashMap<String, Node>,
}

/// Exact-scan vector store keyed by node id.
///
/// Nodes are stored with their text, so query results carry the node payloads.
///
/// # Examples
///
/// ```rust
/// use trellis_integrations::SimpleVectorStore;
/// use trellis_core::traits::{SimilarityMode, VectorStore};
///
/// let store = SimpleVectorStore::new().with_similarity_mode(SimilarityMode::DotProduct);
/// assert!(store.stores_text());
/// ```
#[derive(Debug, Default)]
pub struct SimpleVectorStore {
    mode: SimilarityMode,
    entries: RwLock<Entries>,
}

impl SimpleVectorStore {
    /// Create an empty store comparing embeddings by cosine similarity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare embeddings with `mode`.
    #[must_use]
    pub fn with_similarity_mode(mut self, mode: SimilarityMode) -> Self {
        self.mode = mode;
        self
    }

    /// The comparison in use.
    pub fn similarity_mode(&self) -> SimilarityMode {
        self.mode
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|_| TrellisError::internal("vector store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|_| TrellisError::internal("vector store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for SimpleVectorStore {
    fn stores_text(&self) -> bool {
        true
    }

    async fn add(&self, nodes: Vec<Node>) -> Result<Vec<String>> {
        let mut entries = self.write()?;
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            if node.embedding.is_none() {
                return Err(TrellisError::vector_store(format!(
                    "node '{}' has no embedding",
                    node.id
                )));
            }
            let id = node.id.clone();
            if entries.nodes.insert(id.clone(), node).is_none() {
                entries.order.push(id.clone());
            }
            ids.push(id);
        }
        debug!("Added {} nodes to SimpleVectorStore", ids.len());
        Ok(ids)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut entries = self.write()?;
        for id in ids {
            entries.nodes.remove(id);
        }
        entries.order.retain(|id| !ids.contains(id));
        Ok(())
    }

    async fn delete_by_filter(&self, filters: &MetadataFilters) -> Result<usize> {
        let mut entries = self.write()?;
        let before = entries.nodes.len();
        entries.nodes.retain(|_, node| !filters.matches(&node.metadata));
        let Entries { order, nodes } = &mut *entries;
        order.retain(|id| nodes.contains_key(id));
        let removed = before - nodes.len();
        info!("Deleted {} nodes matching filters", removed);
        Ok(removed)
    }

    async fn query(&self, query: &VectorStoreQuery) -> Result<VectorStoreQueryResult> {
        let entries = self.read()?;
        let mut scored: Vec<(&Node, f32)> = Vec::new();
        for id in &entries.order {
            let Some(node) = entries.nodes.get(id) else {
                continue;
            };
            if !query.filters.matches(&node.metadata) {
                continue;
            }
            let Some(embedding) = &node.embedding else {
                continue;
            };
            if embedding.len() != query.query_embedding.len() {
                return Err(TrellisError::vector_store(format!(
                    "query dimension {} does not match stored dimension {}",
                    query.query_embedding.len(),
                    embedding.len()
                )));
            }
            scored.push((node, similarity(&query.query_embedding, embedding, self.mode)));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(query.similarity_top_k);
        debug!(top_k = query.similarity_top_k, hits = scored.len(), "Scanned SimpleVectorStore");

        Ok(VectorStoreQueryResult {
            ids: scored.iter().map(|(n, _)| n.id.clone()).collect(),
            similarities: scored.iter().map(|(_, s)| *s).collect(),
            nodes: Some(scored.into_iter().map(|(n, _)| n.clone()).collect()),
        })
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.nodes.len())
    }
}
