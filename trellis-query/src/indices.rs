//! Index builders.
//!
//! Each builder stores the nodes it is given in the [`DocumentStore`], builds the index
//! struct over their ids and persists the struct in the same store, so the struct can
//! later be resolved by id from an index node.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use trellis_core::prompts::{PromptType, default_prompt, prompt_vars};
use trellis_core::traits::{KeywordExtractor, VectorStore};
use trellis_core::utils::with_timeout;
use trellis_core::{
    DocumentStore, IndexGraph, IndexList, IndexStruct, KeywordTable, Node, Result, ServiceContext,
    StructTable, TrellisError, VectorIndexDict,
};

use crate::retrievers::node_embeddings;

/// Number of children grouped under one summary node by default.
pub const DEFAULT_NUM_CHILDREN: usize = 10;

/// Builds index structs over a shared document store.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    docstore: Arc<DocumentStore>,
}

impl IndexBuilder {
    /// Create a builder writing into `docstore`.
    pub fn new(docstore: Arc<DocumentStore>) -> Self {
        Self { docstore }
    }

    /// The store nodes and structs are written to.
    pub fn docstore(&self) -> &Arc<DocumentStore> {
        &self.docstore
    }

    fn persist(&self, index_struct: impl Into<IndexStruct>) -> Result<IndexStruct> {
        let index_struct = index_struct.into();
        self.docstore.insert(index_struct.clone())?;
        debug!(
            index_id = index_struct.index_id(),
            struct_type = %index_struct.struct_type(),
            "Persisted index struct"
        );
        Ok(index_struct)
    }

    /// A list index over `nodes` in the given order.
    pub fn list(&self, nodes: impl IntoIterator<Item = Node>) -> Result<IndexStruct> {
        let mut list = IndexList::new();
        for node in nodes {
            list.add_node(self.docstore.insert(node)?);
        }
        self.persist(list)
    }

    /// A keyword table mapping the keywords `extractor` finds in each node to that node.
    pub fn keyword_table(
        &self,
        nodes: impl IntoIterator<Item = Node>,
        extractor: &dyn KeywordExtractor,
    ) -> Result<IndexStruct> {
        let mut table = KeywordTable::new();
        for node in nodes {
            let keywords = extractor.extract_keywords(node.get_text());
            let node_id = self.docstore.insert(node)?;
            table.add_node(keywords, &node_id);
        }
        self.persist(table)
    }

    /// A vector index: nodes are embedded, added to `vector_store` and mapped back by
    /// vector id.
    #[instrument(skip_all, fields(store = vector_store.name()))]
    pub async fn vector(
        &self,
        nodes: Vec<Node>,
        service_context: &ServiceContext,
        vector_store: &dyn VectorStore,
    ) -> Result<IndexStruct> {
        let embeddings = node_embeddings(service_context, &nodes).await?;
        let nodes: Vec<Node> = nodes
            .into_iter()
            .zip(embeddings)
            .map(|(node, embedding)| node.with_embedding(embedding))
            .collect();
        let node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        self.docstore.add_nodes(nodes.iter().cloned())?;

        let vector_ids = with_timeout(
            service_context.request_timeout(),
            "vector_store.add",
            vector_store.add(nodes),
        )
        .await
        .map_err(|e| e.in_stage("vector_store"))?;
        if vector_ids.len() != node_ids.len() {
            return Err(TrellisError::vector_store(format!(
                "vector store returned {} ids for {} nodes",
                vector_ids.len(),
                node_ids.len()
            )));
        }

        let mut dict = VectorIndexDict::new();
        for (node_id, vector_id) in node_ids.into_iter().zip(vector_ids) {
            dict.add_node(node_id, vector_id);
        }
        info!("Indexed {} nodes into vector store", dict.nodes_dict.len());
        self.persist(dict)
    }

    /// A tree index, summarizing `num_children` nodes at a time until one level fits.
    ///
    /// Levels are summarized bottom-up with the summary prompt; the last level becomes
    /// the root set.
    #[instrument(skip_all, fields(nodes = nodes.len(), num_children))]
    pub async fn tree(
        &self,
        nodes: Vec<Node>,
        service_context: &ServiceContext,
        num_children: usize,
    ) -> Result<IndexStruct> {
        if num_children < 2 {
            return Err(TrellisError::configuration(format!(
                "num_children must be at least 2, got {num_children}"
            )));
        }
        let prompt = default_prompt(PromptType::Summary);
        let mut graph = IndexGraph::new();
        let mut level: Vec<Node> = Vec::with_capacity(nodes.len());
        for node in nodes {
            graph.insert(self.docstore.insert(node.clone())?, None);
            level.push(node);
        }

        let mut depth = 0;
        while level.len() > num_children {
            let summaries = try_join_all(level.chunks(num_children).map(|group| {
                let prompt = &prompt;
                async move {
                    let context = service_context
                        .prompt_helper()
                        .get_text_from_nodes(group, Some(prompt))?;
                    let vars = prompt_vars([("context_str", context.as_str())]);
                    service_context.predict(prompt, &vars).await
                }
            }))
            .await?;

            let mut next = Vec::with_capacity(summaries.len());
            for (group, summary) in level.chunks(num_children).zip(summaries) {
                let parent = Node::new(summary);
                let parent_id = self.docstore.insert(parent.clone())?;
                graph.insert(parent_id.clone(), None);
                graph
                    .node_id_to_children
                    .insert(parent_id, group.iter().map(|n| n.id.clone()).collect());
                next.push(parent);
            }
            depth += 1;
            debug!(depth, nodes = next.len(), "Summarized tree level");
            level = next;
        }

        let roots: Vec<String> = level.iter().map(|n| n.id.clone()).collect();
        graph.set_roots(&roots);
        info!("Built tree with {} nodes and {} roots", graph.all_nodes.len(), roots.len());
        self.persist(graph)
    }

    /// A table index; the rows stay in the structured data source.
    pub fn table(&self, table: StructTable) -> Result<IndexStruct> {
        self.persist(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::traits::{EnglishStopwords, KeywordExtractionConfig};
    use trellis_integrations::SimpleVectorStore;
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    use crate::keywords::SimpleKeywordExtractor;

    fn context(llm: Arc<MockLlmPredictor>) -> ServiceContext {
        ServiceContext::builder()
            .llm(llm)
            .embed_model(Arc::new(MockEmbedder::new(16)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_list_keeps_order_and_persists() {
        let builder = IndexBuilder::new(Arc::new(DocumentStore::new()));
        let index = builder
            .list([Node::new("first").with_id("a"), Node::new("second").with_id("b")])
            .unwrap();
        let IndexStruct::List(list) = &index else {
            panic!("expected a list");
        };
        assert_eq!(list.nodes, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(builder.docstore().get_index_struct(index.index_id()).unwrap(), index);
        assert_eq!(builder.docstore().get_node("b").unwrap().get_text(), "second");
    }

    #[test]
    fn test_keyword_table_maps_keywords_to_nodes() {
        let builder = IndexBuilder::new(Arc::new(DocumentStore::new()));
        let extractor = SimpleKeywordExtractor::new(KeywordExtractionConfig::default(), EnglishStopwords::shared());
        let index = builder
            .keyword_table(
                [Node::new("tokio runtime").with_id("t"), Node::new("cargo builds").with_id("c")],
                &extractor,
            )
            .unwrap();
        let IndexStruct::KeywordTable(table) = index else {
            panic!("expected a keyword table");
        };
        assert!(table.postings("tokio").unwrap().contains("t"));
        assert!(table.postings("cargo").unwrap().contains("c"));
    }

    #[tokio::test]
    async fn test_vector_maps_vector_ids_to_nodes() {
        let builder = IndexBuilder::new(Arc::new(DocumentStore::new()));
        let store = SimpleVectorStore::new();
        let ctx = context(Arc::new(MockLlmPredictor::echo()));
        let index = builder
            .vector(vec![Node::new("alpha").with_id("n1"), Node::new("beta").with_id("n2")], &ctx, &store)
            .await
            .unwrap();
        let IndexStruct::Vector(dict) = index else {
            panic!("expected a vector index");
        };
        assert_eq!(dict.nodes_dict.len(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(builder.docstore().get_node("n1").unwrap().embedding.is_some());
    }

    #[tokio::test]
    async fn test_tree_summarizes_until_one_level_fits() {
        let llm = Arc::new(MockLlmPredictor::echo().with_default_response("summary"));
        let builder = IndexBuilder::new(Arc::new(DocumentStore::new()));
        let nodes = (0..5).map(|i| Node::new(format!("chunk {i}"))).collect();
        let index = builder.tree(nodes, &context(llm.clone()), 2).await.unwrap();
        let IndexStruct::Tree(graph) = index else {
            panic!("expected a tree");
        };

        // 5 leaves -> 3 summaries -> 2 summaries
        assert_eq!(llm.call_count(), 5);
        assert_eq!(graph.all_nodes.len(), 10);
        assert_eq!(graph.root_ids().len(), 2);
        assert_eq!(graph.leaf_ids().len(), 5);
        for root in graph.root_ids() {
            assert!(!graph.children(&root).is_empty());
        }
    }

    #[tokio::test]
    async fn test_tree_rejects_degenerate_fanout() {
        let builder = IndexBuilder::new(Arc::new(DocumentStore::new()));
        let err = builder
            .tree(vec![Node::new("a")], &context(Arc::new(MockLlmPredictor::echo())), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
    }
}
