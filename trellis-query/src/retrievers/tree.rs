//! Tree index retrievers.
//!
//! The two selecting retrievers walk from the roots to the leaves, choosing up to
//! `child_branch_factor` children per level either by asking the LLM to pick from a
//! numbered list or by embedding similarity. Selected leaves are returned depth-first
//! in selection order.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use trellis_core::prompts::{PromptTemplate, PromptType, default_prompt, prompt_vars};
use trellis_core::traits::{Retriever, SimilarityMode, top_k_similar};
use trellis_core::{
    DocumentStore, IndexGraph, QueryBundle, Result, ScoredNode, ServiceContext, TrellisError,
};

use super::{node_embeddings, query_embedding, snippet};

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number pattern is valid"));

/// The first `n` integers in an answer, in order of appearance.
pub fn extract_numbers_given_response(response: &str, n: usize) -> Vec<usize> {
    NUMBER
        .find_iter(response)
        .filter_map(|m| m.as_str().parse().ok())
        .take(n)
        .collect()
}

fn check_hierarchy(tree: &IndexGraph) -> Result<()> {
    if tree.root_nodes.is_empty() && !tree.all_nodes.is_empty() {
        return Err(TrellisError::configuration(format!(
            "tree index '{}' has nodes but no root nodes",
            tree.index_id
        )));
    }
    Ok(())
}

/// Walk the tree depth-first, letting `select` pick among each level's candidates.
///
/// Returns the selected leaf ids with the score they were selected with.
async fn walk<F, Fut>(tree: &IndexGraph, mut select: F) -> Result<Vec<(String, Option<f32>)>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<(String, Option<f32>)>>>,
{
    check_hierarchy(tree)?;
    if tree.root_nodes.is_empty() {
        return Ok(Vec::new());
    }
    let mut leaves = Vec::new();
    let mut stack = select(tree.root_ids()).await?;
    stack.reverse();
    while let Some((id, score)) = stack.pop() {
        let children = tree.children(&id);
        if children.is_empty() {
            leaves.push((id, score));
            continue;
        }
        let mut chosen = select(children.to_vec()).await?;
        chosen.reverse();
        stack.extend(chosen);
    }
    Ok(leaves)
}

fn hydrate(docstore: &DocumentStore, selected: Vec<(String, Option<f32>)>) -> Result<Vec<ScoredNode>> {
    selected
        .into_iter()
        .map(|(id, score)| {
            Ok(ScoredNode {
                node: docstore.get_node(&id)?,
                score,
            })
        })
        .collect()
}

/// Descends by asking the LLM to choose among numbered child summaries.
#[derive(Debug, Clone)]
pub struct TreeSelectLeafRetriever {
    tree: IndexGraph,
    docstore: Arc<DocumentStore>,
    service_context: ServiceContext,
    child_branch_factor: usize,
    query_template: PromptTemplate,
    query_template_multiple: PromptTemplate,
    verbose: bool,
}

impl TreeSelectLeafRetriever {
    /// Create a retriever over `tree`.
    pub fn new(tree: IndexGraph, docstore: Arc<DocumentStore>, service_context: ServiceContext) -> Self {
        Self {
            tree,
            docstore,
            service_context,
            child_branch_factor: 1,
            query_template: default_prompt(PromptType::TreeSelect),
            query_template_multiple: default_prompt(PromptType::TreeSelectMultiple),
            verbose: false,
        }
    }

    /// Children followed per level.
    #[must_use]
    pub fn with_child_branch_factor(mut self, factor: usize) -> Self {
        self.child_branch_factor = factor.max(1);
        self
    }

    /// Log every choice.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn select(&self, query_str: &str, candidate_ids: Vec<String>) -> Result<Vec<(String, Option<f32>)>> {
        let candidates = self.docstore.get_nodes(&candidate_ids)?;
        let num_chunks = candidates.len().to_string();
        let branching = self.child_branch_factor.to_string();
        let template = if self.child_branch_factor == 1 {
            self.query_template.partial_format(&prompt_vars([
                ("query_str", query_str),
                ("num_chunks", num_chunks.as_str()),
            ]))
        } else {
            self.query_template_multiple.partial_format(&prompt_vars([
                ("query_str", query_str),
                ("num_chunks", num_chunks.as_str()),
                ("branching_factor", branching.as_str()),
            ]))
        };
        let context_list = self
            .service_context
            .prompt_helper()
            .get_numbered_text_from_nodes(&candidates, Some(&template))?;
        let answer = self
            .service_context
            .predict(&template, &prompt_vars([("context_list", context_list)]))
            .await?;

        let numbers = extract_numbers_given_response(&answer, self.child_branch_factor);
        let mut chosen: Vec<(String, Option<f32>)> = Vec::new();
        for number in numbers {
            let Some(node) = number.checked_sub(1).and_then(|i| candidates.get(i)) else {
                debug!(number, candidates = candidates.len(), "Ignoring out-of-range choice");
                continue;
            };
            if chosen.iter().any(|(id, _)| id == &node.id) {
                continue;
            }
            if self.verbose {
                info!(choice = number, node = %snippet(node.get_text()), "Selected node");
            }
            chosen.push((node.id.clone(), None));
        }
        if chosen.is_empty() {
            warn!(answer = %answer, "Tree selection answer contained no usable choice");
        }
        Ok(chosen)
    }
}

#[async_trait]
impl Retriever for TreeSelectLeafRetriever {
    #[instrument(skip_all, fields(index_id = %self.tree.index_id, branch = self.child_branch_factor))]
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let query_str = query.query_str.as_str();
        let selected = walk(&self.tree, |ids| self.select(query_str, ids)).await?;
        let nodes = hydrate(&self.docstore, selected)?;
        info!("Retrieved {} nodes", nodes.len());
        Ok(nodes)
    }
}

/// Descends into the children most similar to the query embedding.
#[derive(Debug, Clone)]
pub struct TreeSelectLeafEmbeddingRetriever {
    tree: IndexGraph,
    docstore: Arc<DocumentStore>,
    service_context: ServiceContext,
    child_branch_factor: usize,
    verbose: bool,
}

impl TreeSelectLeafEmbeddingRetriever {
    /// Create a retriever over `tree`.
    pub fn new(tree: IndexGraph, docstore: Arc<DocumentStore>, service_context: ServiceContext) -> Self {
        Self {
            tree,
            docstore,
            service_context,
            child_branch_factor: 1,
            verbose: false,
        }
    }

    /// Children followed per level.
    #[must_use]
    pub fn with_child_branch_factor(mut self, factor: usize) -> Self {
        self.child_branch_factor = factor.max(1);
        self
    }

    /// Log every choice with its score.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn select(
        &self,
        query_embedding: &[f32],
        candidate_ids: Vec<String>,
    ) -> Result<Vec<(String, Option<f32>)>> {
        let candidates = self.docstore.get_nodes(&candidate_ids)?;
        let embeddings = node_embeddings(&self.service_context, &candidates).await?;
        let ranked = top_k_similar(
            query_embedding,
            &embeddings,
            self.child_branch_factor,
            SimilarityMode::Cosine,
        );
        Ok(ranked
            .into_iter()
            .map(|(i, score)| {
                if self.verbose {
                    info!(score, node = %snippet(candidates[i].get_text()), "Selected node");
                }
                (candidates[i].id.clone(), Some(score))
            })
            .collect())
    }
}

#[async_trait]
impl Retriever for TreeSelectLeafEmbeddingRetriever {
    #[instrument(skip_all, fields(index_id = %self.tree.index_id, branch = self.child_branch_factor))]
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        check_hierarchy(&self.tree)?;
        let embedding = query_embedding(&self.service_context, query).await?;
        let embedding = embedding.as_slice();
        let selected = walk(&self.tree, |ids| self.select(embedding, ids)).await?;
        let nodes = hydrate(&self.docstore, selected)?;
        info!("Retrieved {} nodes", nodes.len());
        Ok(nodes)
    }
}

/// Answers from the root nodes.
#[derive(Debug, Clone)]
pub struct TreeRootRetriever {
    tree: IndexGraph,
    docstore: Arc<DocumentStore>,
}

impl TreeRootRetriever {
    /// Create a retriever over `tree`.
    pub fn new(tree: IndexGraph, docstore: Arc<DocumentStore>) -> Self {
        Self { tree, docstore }
    }
}

#[async_trait]
impl Retriever for TreeRootRetriever {
    async fn retrieve(&self, _query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let nodes = self.docstore.get_nodes(&self.tree.root_ids())?;
        debug!(roots = nodes.len(), "Retrieved tree roots");
        Ok(nodes.into_iter().map(ScoredNode::unscored).collect())
    }
}

/// Every leaf in index order.
#[derive(Debug, Clone)]
pub struct TreeAllLeafRetriever {
    tree: IndexGraph,
    docstore: Arc<DocumentStore>,
}

impl TreeAllLeafRetriever {
    /// Create a retriever over `tree`.
    pub fn new(tree: IndexGraph, docstore: Arc<DocumentStore>) -> Self {
        Self { tree, docstore }
    }
}

#[async_trait]
impl Retriever for TreeAllLeafRetriever {
    async fn retrieve(&self, _query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let nodes = self.docstore.get_nodes(&self.tree.leaf_ids())?;
        debug!(leaves = nodes.len(), "Retrieved tree leaves");
        Ok(nodes.into_iter().map(ScoredNode::unscored).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::Node;
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    /// root-a (a1, a2), root-b (b1)
    fn fixture() -> (IndexGraph, Arc<DocumentStore>) {
        let docstore = Arc::new(DocumentStore::new());
        let mut tree = IndexGraph::new();
        for (id, text, parent) in [
            ("a", "summary about rust", None),
            ("a1", "rust ownership", Some("a")),
            ("a2", "rust lifetimes", Some("a")),
            ("b", "summary about python", None),
            ("b1", "python generators", Some("b")),
        ] {
            docstore.insert(Node::new(text).with_id(id)).unwrap();
            tree.insert(id, parent);
        }
        (tree, docstore)
    }

    fn context(llm: Arc<MockLlmPredictor>) -> ServiceContext {
        ServiceContext::builder()
            .llm(llm)
            .embed_model(Arc::new(MockEmbedder::new(256)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_extract_numbers() {
        assert_eq!(extract_numbers_given_response("ANSWER: 2, 3 and 7", 2), vec![2, 3]);
        assert!(extract_numbers_given_response("no idea", 1).is_empty());
    }

    #[tokio::test]
    async fn test_llm_selection_descends_to_leaf() {
        let (tree, docstore) = fixture();
        let llm = Arc::new(MockLlmPredictor::with_responses(["ANSWER: 1", "ANSWER: 2"]));
        let retriever = TreeSelectLeafRetriever::new(tree, docstore, context(llm.clone()));
        let nodes = retriever.retrieve(&QueryBundle::new("lifetimes?")).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), "a2");
        assert_eq!(llm.call_count(), 2);
        assert!(llm.prompts()[0].contains("(1) summary about rust"));
        assert!(llm.prompts()[0].contains("(2) summary about python"));
    }

    #[tokio::test]
    async fn test_branch_factor_follows_several_children() {
        let (tree, docstore) = fixture();
        let llm = Arc::new(MockLlmPredictor::with_responses([
            "ANSWER: 2, 1",
            "ANSWER: 1",
            "ANSWER: 2, 1",
        ]));
        let retriever = TreeSelectLeafRetriever::new(tree, docstore, context(llm.clone()))
            .with_child_branch_factor(2);
        let nodes = retriever.retrieve(&QueryBundle::new("q")).await.unwrap();
        let ids: Vec<&str> = nodes.iter().map(ScoredNode::id).collect();
        assert_eq!(ids, vec!["b1", "a2", "a1"]);
        assert!(llm.prompts()[0].contains("no more than 2"));
    }

    #[tokio::test]
    async fn test_unusable_answer_ends_branch() {
        let (tree, docstore) = fixture();
        let llm = Arc::new(MockLlmPredictor::with_responses(["ANSWER: 9"]));
        let retriever = TreeSelectLeafRetriever::new(tree, docstore, context(llm));
        let nodes = retriever.retrieve(&QueryBundle::new("q")).await.unwrap();
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_roots_is_configuration_error() {
        let (mut tree, docstore) = fixture();
        tree.root_nodes.clear();
        let llm = Arc::new(MockLlmPredictor::echo());
        let err = TreeSelectLeafRetriever::new(tree, docstore, context(llm))
            .retrieve(&QueryBundle::new("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_embedding_selection_prefers_similar_text() {
        let (tree, docstore) = fixture();
        let llm = Arc::new(MockLlmPredictor::echo());
        let retriever = TreeSelectLeafEmbeddingRetriever::new(tree, docstore, context(llm.clone()));
        let nodes = retriever
            .retrieve(&QueryBundle::new("python generators"))
            .await
            .unwrap();
        assert_eq!(nodes[0].id(), "b1");
        assert!(nodes[0].score.is_some());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_roots_and_leaves() {
        let (tree, docstore) = fixture();
        let roots = TreeRootRetriever::new(tree.clone(), docstore.clone())
            .retrieve(&QueryBundle::new("q"))
            .await
            .unwrap();
        assert_eq!(roots.iter().map(ScoredNode::id).collect::<Vec<_>>(), vec!["a", "b"]);

        let leaves = TreeAllLeafRetriever::new(tree, docstore)
            .retrieve(&QueryBundle::new("q"))
            .await
            .unwrap();
        assert_eq!(
            leaves.iter().map(ScoredNode::id).collect::<Vec<_>>(),
            vec!["a1", "a2", "b1"]
        );
    }
}
