//! Vector store retriever.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use trellis_core::traits::{MetadataFilters, Retriever, VectorStore, VectorStoreQuery};
use trellis_core::utils::with_timeout;
use trellis_core::{
    DocumentStore, QueryBundle, Result, ScoredNode, ServiceContext, TrellisError, VectorIndexDict,
};

use super::{query_embedding, snippet};

/// Asks the backing vector store for the `similarity_top_k` nearest nodes.
///
/// Stores that keep text return the node payloads directly; otherwise the returned
/// vector ids are mapped to node ids through the index and loaded from the document
/// store.
#[derive(Debug, Clone)]
pub struct VectorIndexRetriever {
    index: VectorIndexDict,
    docstore: Arc<DocumentStore>,
    service_context: ServiceContext,
    vector_store: Arc<dyn VectorStore>,
    similarity_top_k: usize,
    filters: MetadataFilters,
    verbose: bool,
}

impl VectorIndexRetriever {
    /// Create a retriever over `index`.
    pub fn new(
        index: VectorIndexDict,
        docstore: Arc<DocumentStore>,
        service_context: ServiceContext,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            index,
            docstore,
            service_context,
            vector_store,
            similarity_top_k: 1,
            filters: MetadataFilters::default(),
            verbose: false,
        }
    }

    /// Number of nodes to return.
    #[must_use]
    pub fn with_similarity_top_k(mut self, k: usize) -> Self {
        self.similarity_top_k = k;
        self
    }

    /// Metadata constraints passed to the store.
    #[must_use]
    pub fn with_filters(mut self, filters: MetadataFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Log every returned node with its score.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[async_trait]
impl Retriever for VectorIndexRetriever {
    #[instrument(skip_all, fields(index_id = %self.index.index_id, top_k = self.similarity_top_k, store = self.vector_store.name()))]
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let embedding = query_embedding(&self.service_context, query).await?;
        let request = VectorStoreQuery::new(embedding, self.similarity_top_k)
            .with_filters(self.filters.clone());
        let result = with_timeout(
            self.service_context.request_timeout(),
            "vector_store.query",
            self.vector_store.query(&request),
        )
        .await
        .map_err(|e| e.in_stage("vector_store"))?;
        debug!(ids = result.ids.len(), "Vector store answered");

        let nodes = match result.nodes {
            Some(nodes) if self.vector_store.stores_text() => nodes,
            _ => result
                .ids
                .iter()
                .map(|vector_id| {
                    let node_id = self.index.node_id(vector_id).ok_or_else(|| {
                        TrellisError::not_found(format!(
                            "vector id '{vector_id}' in index '{}'",
                            self.index.index_id
                        ))
                    })?;
                    self.docstore.get_node(node_id)
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let results: Vec<ScoredNode> = nodes
            .into_iter()
            .enumerate()
            .map(|(i, node)| ScoredNode {
                node,
                score: result.similarities.get(i).copied(),
            })
            .collect();
        if self.verbose {
            for r in &results {
                info!(score = ?r.score, node = %snippet(r.text()), "Vector match");
            }
        }
        info!("Retrieved {} nodes", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::Node;
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};
    use trellis_integrations::SimpleVectorStore;

    #[tokio::test]
    async fn test_maps_vector_ids_to_nodes() {
        let docstore = Arc::new(DocumentStore::new());
        let context = ServiceContext::builder()
            .llm(Arc::new(MockLlmPredictor::echo()))
            .embed_model(Arc::new(MockEmbedder::new(256)))
            .build()
            .unwrap();
        let store = Arc::new(SimpleVectorStore::new());
        let mut index = VectorIndexDict::new();
        let texts = ["vector databases", "keyword tables", "tree summaries"];
        let embeddings = context
            .text_embeddings(&texts.map(str::to_string))
            .await
            .unwrap();
        for (text, embedding) in texts.iter().zip(embeddings) {
            let node = Node::new(*text).with_embedding(embedding);
            docstore.insert(node.clone()).unwrap();
            let ids = store.add(vec![node.clone()]).await.unwrap();
            index.add_node(node.id.clone(), ids[0].clone());
        }

        let nodes = VectorIndexRetriever::new(index, docstore, context, store)
            .with_similarity_top_k(2)
            .retrieve(&QueryBundle::new("keyword tables"))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text(), "keyword tables");
        assert!(nodes[0].score.unwrap() > 0.99);
    }
}
