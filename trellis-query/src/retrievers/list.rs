//! List index retrievers.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use trellis_core::traits::{Retriever, SimilarityMode, top_k_similar};
use trellis_core::{DocumentStore, IndexList, QueryBundle, Result, ScoredNode, ServiceContext};

use super::{node_embeddings, query_embedding, snippet};

/// Every node of the list, in stored order and unranked.
#[derive(Debug, Clone)]
pub struct ListRetriever {
    list: IndexList,
    docstore: Arc<DocumentStore>,
}

impl ListRetriever {
    /// Create a retriever over `list`.
    pub fn new(list: IndexList, docstore: Arc<DocumentStore>) -> Self {
        Self { list, docstore }
    }
}

#[async_trait]
impl Retriever for ListRetriever {
    async fn retrieve(&self, _query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let nodes = self.docstore.get_nodes(&self.list.nodes)?;
        debug!(index_id = %self.list.index_id, nodes = nodes.len(), "Retrieved list nodes");
        Ok(nodes.into_iter().map(ScoredNode::unscored).collect())
    }
}

/// The `similarity_top_k` list nodes closest to the query embedding.
#[derive(Debug, Clone)]
pub struct ListEmbeddingRetriever {
    list: IndexList,
    docstore: Arc<DocumentStore>,
    service_context: ServiceContext,
    similarity_top_k: usize,
    verbose: bool,
}

impl ListEmbeddingRetriever {
    /// Create a retriever over `list`.
    pub fn new(list: IndexList, docstore: Arc<DocumentStore>, service_context: ServiceContext) -> Self {
        Self {
            list,
            docstore,
            service_context,
            similarity_top_k: 1,
            verbose: false,
        }
    }

    /// Number of nodes to return.
    #[must_use]
    pub fn with_similarity_top_k(mut self, k: usize) -> Self {
        self.similarity_top_k = k;
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
impl Retriever for ListEmbeddingRetriever {
    #[instrument(skip_all, fields(index_id = %self.list.index_id, top_k = self.similarity_top_k))]
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let nodes = self.docstore.get_nodes(&self.list.nodes)?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = query_embedding(&self.service_context, query).await?;
        let embeddings = node_embeddings(&self.service_context, &nodes).await?;
        let ranked = top_k_similar(
            &query_embedding,
            &embeddings,
            self.similarity_top_k,
            SimilarityMode::Cosine,
        );
        let results: Vec<ScoredNode> = ranked
            .into_iter()
            .map(|(i, score)| ScoredNode::new(nodes[i].clone(), score))
            .collect();
        if self.verbose {
            for result in &results {
                info!(score = ?result.score, node = %snippet(result.text()), "Ranked node");
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

    fn fixture() -> (IndexList, Arc<DocumentStore>) {
        let docstore = Arc::new(DocumentStore::new());
        let mut list = IndexList::new();
        for text in ["the borrow checker", "async runtimes", "query engines over indices"] {
            list.add_node(docstore.insert(Node::new(text)).unwrap());
        }
        (list, docstore)
    }

    #[tokio::test]
    async fn test_list_returns_stored_order() {
        let (list, docstore) = fixture();
        let nodes = ListRetriever::new(list, docstore)
            .retrieve(&QueryBundle::new("anything"))
            .await
            .unwrap();
        let texts: Vec<&str> = nodes.iter().map(ScoredNode::text).collect();
        assert_eq!(
            texts,
            vec!["the borrow checker", "async runtimes", "query engines over indices"]
        );
        assert!(nodes.iter().all(|n| n.score.is_none()));
    }

    #[tokio::test]
    async fn test_embedding_top_k() {
        let (list, docstore) = fixture();
        let context = ServiceContext::builder()
            .llm(Arc::new(MockLlmPredictor::echo()))
            .embed_model(Arc::new(MockEmbedder::new(256)))
            .build()
            .unwrap();
        let nodes = ListEmbeddingRetriever::new(list, docstore, context)
            .with_similarity_top_k(2)
            .retrieve(&QueryBundle::new("async runtimes"))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text(), "async runtimes");
        assert!(nodes[0].score >= nodes[1].score);
    }
}
