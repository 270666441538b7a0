//! Query objects.
//!
//! An [`IndexQueryObject`] binds one index struct to a retriever and a synthesis
//! policy. Running it retrieves nodes, applies the node postprocessors, optionally
//! resolves index nodes through a [`NestedQueryRunner`], and folds the result into a
//! [`Response`].

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use trellis_core::traits::{NodePostprocessor, Retriever};
use trellis_core::{
    DocumentStore, IndexStruct, Node, QueryBundle, Response, Result, ScoredNode,
    StreamingResponse,
};

use crate::recursion::{DEFAULT_MAX_DEPTH, NestedQueryRunner, QueryContext};
use crate::retrievers::snippet;
use crate::synthesizer::ResponseSynthesizer;

/// A query bound to one index struct.
///
/// Combiners drive queries through this trait: they may call [`IndexQuery::query`]
/// several times, or retrieve and synthesize separately.
#[async_trait]
pub trait IndexQuery: Send + Sync + std::fmt::Debug {
    /// The index struct this query runs against.
    fn index_struct(&self) -> &IndexStruct;

    /// Retrieve and postprocess nodes.
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>>;

    /// Fold nodes into a response, citing `additional_source_nodes` after them.
    async fn synthesize(
        &self,
        query: &QueryBundle,
        nodes: Vec<ScoredNode>,
        additional_source_nodes: Vec<ScoredNode>,
    ) -> Result<Response>;

    /// Answer on the sequential path.
    async fn query(&self, query: &QueryBundle) -> Result<Response>;

    /// Answer on the concurrent path.
    async fn aquery(&self, query: &QueryBundle) -> Result<Response> {
        self.query(query).await
    }

    /// Get a human-readable name for this query.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Retrieval, postprocessing, recursion and synthesis for one index struct.
///
/// Without a synthesizer the query answers with the retrieved text itself, which is
/// how struct-store queries return their rows.
#[derive(Debug, Clone)]
pub struct IndexQueryObject {
    index_struct: IndexStruct,
    retriever: Arc<dyn Retriever>,
    synthesizer: Option<ResponseSynthesizer>,
    docstore: Arc<DocumentStore>,
    runner: Option<Arc<dyn NestedQueryRunner>>,
    recursive: bool,
    use_async: bool,
    postprocessors: Vec<Arc<dyn NodePostprocessor>>,
    context: QueryContext,
    verbose: bool,
}

impl IndexQueryObject {
    /// Create a query answering with the retrieved text.
    pub fn new(
        index_struct: IndexStruct,
        retriever: Arc<dyn Retriever>,
        docstore: Arc<DocumentStore>,
    ) -> Self {
        let context = QueryContext::root(index_struct.index_id(), DEFAULT_MAX_DEPTH);
        Self {
            index_struct,
            retriever,
            synthesizer: None,
            docstore,
            runner: None,
            recursive: false,
            use_async: false,
            postprocessors: Vec::new(),
            context,
            verbose: false,
        }
    }

    /// Synthesize answers with `synthesizer`.
    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: ResponseSynthesizer) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Replace the retriever.
    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = retriever;
        self
    }

    /// Runner that resolves index nodes.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn NestedQueryRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Resolve index nodes through the runner.
    #[must_use]
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Take the concurrent path for retrieval, nested queries and synthesis.
    #[must_use]
    pub fn with_use_async(mut self, use_async: bool) -> Self {
        self.use_async = use_async;
        self
    }

    /// Append a node postprocessor.
    #[must_use]
    pub fn with_postprocessor(mut self, postprocessor: Arc<dyn NodePostprocessor>) -> Self {
        self.postprocessors.push(postprocessor);
        self
    }

    /// Append several node postprocessors.
    #[must_use]
    pub fn with_postprocessors(
        mut self,
        postprocessors: impl IntoIterator<Item = Arc<dyn NodePostprocessor>>,
    ) -> Self {
        self.postprocessors.extend(postprocessors);
        self
    }

    /// Position of this query in a recursive resolution.
    #[must_use]
    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Log retrieved nodes at info level.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The synthesizer, if answers are synthesized.
    pub fn synthesizer(&self) -> Option<&ResponseSynthesizer> {
        self.synthesizer.as_ref()
    }

    /// The recursion context.
    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// Whether index nodes are resolved.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether the concurrent path is used.
    pub fn use_async(&self) -> bool {
        self.use_async
    }

    async fn retrieve_nodes(&self, query: &QueryBundle, concurrent: bool) -> Result<Vec<ScoredNode>> {
        let retrieved = if concurrent {
            self.retriever.aretrieve(query).await
        } else {
            self.retriever.retrieve(query).await
        };
        let mut nodes = retrieved.map_err(|e| e.in_stage("retrieve"))?;
        for postprocessor in &self.postprocessors {
            let before = nodes.len();
            nodes = postprocessor.postprocess(nodes, query).await?;
            debug!(postprocessor = postprocessor.name(), before, after = nodes.len(), "Postprocessed nodes");
        }
        if self.verbose {
            for node in &nodes {
                info!(level = self.context.level(), score = ?node.score, node = %snippet(node.text()), "Retrieved node");
            }
        }
        Ok(nodes)
    }

    /// Replace index nodes by the answers of the indices they reference.
    ///
    /// Returns the nodes for synthesis and the source nodes of every nested answer.
    /// Nested queries run one after another in retrieval order.
    async fn resolve_index_nodes(
        &self,
        query: &QueryBundle,
        nodes: Vec<ScoredNode>,
        concurrent: bool,
    ) -> Result<(Vec<ScoredNode>, Vec<ScoredNode>)> {
        let runner = match &self.runner {
            Some(runner) if self.recursive => runner,
            _ => return Ok((nodes, Vec::new())),
        };
        let mut resolved = Vec::with_capacity(nodes.len());
        let mut additional_source_nodes = Vec::new();
        for scored in nodes {
            let Some(child_id) = scored.node.index_id().map(str::to_string) else {
                resolved.push(scored);
                continue;
            };
            let child_context = self.context.descend(&child_id)?;
            let child = self.docstore.get_index_struct(&child_id)?;
            debug!(level = child_context.level(), child = %child_id, "Resolving index node");
            let response = if concurrent {
                runner.aquery_nested(query, &child, child_context).await?
            } else {
                runner.query_nested(query, &child, child_context).await?
            };
            resolved.push(ScoredNode {
                node: Node::new(response.to_string()),
                score: scored.score,
            });
            additional_source_nodes.extend(response.source_nodes);
        }
        Ok((resolved, additional_source_nodes))
    }

    async fn synthesize_with(
        &self,
        query: &QueryBundle,
        nodes: Vec<ScoredNode>,
        additional_source_nodes: Vec<ScoredNode>,
        concurrent: bool,
    ) -> Result<Response> {
        let Some(synthesizer) = &self.synthesizer else {
            return Ok(passthrough_response(nodes, additional_source_nodes));
        };
        let response = if concurrent {
            synthesizer
                .asynthesize(query, nodes, additional_source_nodes)
                .await
        } else {
            synthesizer
                .synthesize(query, nodes, additional_source_nodes)
                .await
        };
        response.map_err(|e| e.in_stage("synthesize"))
    }

    async fn run(&self, query: &QueryBundle, concurrent: bool) -> Result<Response> {
        let nodes = self.retrieve_nodes(query, concurrent).await?;
        info!("Retrieved {} nodes", nodes.len());
        let (nodes, additional_source_nodes) =
            self.resolve_index_nodes(query, nodes, concurrent).await?;
        self.synthesize_with(query, nodes, additional_source_nodes, concurrent)
            .await
    }

    /// Answer with the text streamed as it is generated.
    ///
    /// Retrieval and index node resolution complete before the stream starts.
    pub async fn query_streaming(&self, query: &QueryBundle) -> Result<StreamingResponse> {
        let nodes = self.retrieve_nodes(query, false).await?;
        let (nodes, additional_source_nodes) =
            self.resolve_index_nodes(query, nodes, false).await?;
        let Some(synthesizer) = &self.synthesizer else {
            let response = passthrough_response(nodes, additional_source_nodes);
            let text = response.to_string();
            return Ok(StreamingResponse {
                response_stream: futures::stream::once(async move { Ok(text) }).boxed(),
                source_nodes: response.source_nodes,
            });
        };
        synthesizer
            .synthesize_streaming(query, nodes, additional_source_nodes)
            .await
            .map_err(|e| e.in_stage("synthesize"))
    }
}

/// Answer with the retrieved text itself.
///
/// Node metadata is copied into the response metadata.
fn passthrough_response(nodes: Vec<ScoredNode>, additional_source_nodes: Vec<ScoredNode>) -> Response {
    let text = nodes
        .iter()
        .map(ScoredNode::text)
        .collect::<Vec<_>>()
        .join("\n");
    let metadata = nodes
        .iter()
        .flat_map(|n| n.node.metadata.clone())
        .collect();
    let mut source_nodes = nodes;
    source_nodes.extend(additional_source_nodes);
    Response {
        response: Some(text),
        source_nodes,
        metadata,
    }
}

#[async_trait]
impl IndexQuery for IndexQueryObject {
    fn index_struct(&self) -> &IndexStruct {
        &self.index_struct
    }

    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        self.retrieve_nodes(query, self.use_async).await
    }

    async fn synthesize(
        &self,
        query: &QueryBundle,
        nodes: Vec<ScoredNode>,
        additional_source_nodes: Vec<ScoredNode>,
    ) -> Result<Response> {
        self.synthesize_with(query, nodes, additional_source_nodes, self.use_async)
            .await
    }

    #[instrument(skip_all, fields(index_id = self.index_struct.index_id(), level = self.context.level()))]
    async fn query(&self, query: &QueryBundle) -> Result<Response> {
        self.run(query, self.use_async).await
    }

    #[instrument(skip_all, fields(index_id = self.index_struct.index_id(), level = self.context.level()))]
    async fn aquery(&self, query: &QueryBundle) -> Result<Response> {
        self.run(query, true).await
    }
}
