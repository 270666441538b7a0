//! Composable graphs of indices.
//!
//! A [`ComposableGraph`] is a root index id over a shared [`DocumentStore`]. The root
//! holds one index node per child index; a child may in turn hold index nodes of its
//! own. [`ComposableGraphQueryEngine`] answers a query against the root and resolves
//! every index node it retrieves by querying the referenced index, level by level.
//!
//! Unlike [`QueryRunner`](crate::runner::QueryRunner), the engine applies its transform
//! once at the top and never consults a combiner: nested levels receive the already
//! transformed bundle.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use trellis_core::traits::{
    EnglishStopwords, KeywordExtractionConfig, KeywordExtractor, NodePostprocessor, Retriever,
    Stopwords, StructuredDataSource, VectorStore,
};
use trellis_core::{
    DocumentStore, IndexGraph, IndexStruct, IndexStructType, Node, QueryBundle, QueryInput,
    Response, Result, ServiceContext, TrellisError,
};

use crate::indices::IndexBuilder;
use crate::keywords::SimpleKeywordExtractor;
use crate::query::IndexQuery;
use crate::query_config::{QueryConfig, QueryConfigMap};
use crate::recursion::{DEFAULT_MAX_DEPTH, NestedQueryRunner, QueryContext};
use crate::registry::{IndexSources, QueryArgs, QueryRegistry};
use crate::transforms::{IdentityQueryTransform, QueryTransform, TransformContext};

/// A root index over child indices, all stored in one document store.
#[derive(Debug, Clone)]
pub struct ComposableGraph {
    docstore: Arc<DocumentStore>,
    root_id: String,
}

impl ComposableGraph {
    /// Wrap an existing root index.
    pub fn new(docstore: Arc<DocumentStore>, root_id: impl Into<String>) -> Self {
        Self {
            docstore,
            root_id: root_id.into(),
        }
    }

    /// Compose `children` under a new root of type `root_type`.
    ///
    /// Each child gets an index node whose text is its summary. The children are
    /// stored with their summaries set, and the root is stored next to them. List,
    /// keyword table and tree roots are supported; a keyword table root extracts
    /// keywords from the summaries, with `extractor` when given.
    pub fn from_indices(
        docstore: Arc<DocumentStore>,
        root_type: IndexStructType,
        children: Vec<IndexStruct>,
        summaries: Vec<String>,
        extractor: Option<&dyn KeywordExtractor>,
    ) -> Result<Self> {
        if children.len() != summaries.len() {
            return Err(TrellisError::validation(format!(
                "{} child indices but {} summaries",
                children.len(),
                summaries.len()
            )));
        }

        let mut index_nodes = Vec::with_capacity(children.len());
        for (mut child, summary) in children.into_iter().zip(summaries) {
            child.set_summary(summary.clone());
            index_nodes.push(Node::index(summary, child.index_id()));
            docstore.insert(child)?;
        }

        let builder = IndexBuilder::new(Arc::clone(&docstore));
        let root = match root_type {
            IndexStructType::List => builder.list(index_nodes)?,
            IndexStructType::KeywordTable => match extractor {
                Some(extractor) => builder.keyword_table(index_nodes, extractor)?,
                None => {
                    let extractor = SimpleKeywordExtractor::new(
                        KeywordExtractionConfig::default(),
                        EnglishStopwords::shared(),
                    );
                    builder.keyword_table(index_nodes, &extractor)?
                }
            },
            IndexStructType::Tree => {
                let mut tree = IndexGraph::new();
                for node in index_nodes {
                    tree.insert(docstore.insert(node)?, None);
                }
                let tree = IndexStruct::Tree(tree);
                docstore.insert(tree.clone())?;
                tree
            }
            IndexStructType::Vector | IndexStructType::Table => {
                return Err(TrellisError::configuration(format!(
                    "a '{root_type}' index cannot be the root of a composable graph"
                )));
            }
        };
        debug!(root_id = root.index_id(), %root_type, "Composed graph");
        Ok(Self::new(docstore, root.index_id()))
    }

    /// Id of the root index.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// The store holding every index of the graph.
    pub fn docstore(&self) -> &Arc<DocumentStore> {
        &self.docstore
    }

    /// The root index struct.
    pub fn root(&self) -> Result<IndexStruct> {
        self.docstore.get_index_struct(&self.root_id)
    }
}

#[derive(Debug)]
struct EngineInner {
    graph: ComposableGraph,
    service_context: ServiceContext,
    registry: QueryRegistry,
    configs: QueryConfigMap,
    custom_retrievers: HashMap<String, Arc<dyn Retriever>>,
    postprocessors: Vec<Arc<dyn NodePostprocessor>>,
    query_transform: Arc<dyn QueryTransform>,
    recursive: bool,
    use_async: bool,
    max_depth: usize,
    sources: Arc<IndexSources>,
    stopwords: Arc<dyn Stopwords>,
    verbose: bool,
}

/// Answers queries over a [`ComposableGraph`].
///
/// Custom retrievers registered for an index id and the node postprocessors apply at
/// every level, not just the root.
#[derive(Debug, Clone)]
pub struct ComposableGraphQueryEngine {
    inner: Arc<EngineInner>,
}

impl ComposableGraphQueryEngine {
    /// Start building an engine over `graph`.
    pub fn builder(graph: ComposableGraph, service_context: ServiceContext) -> GraphQueryEngineBuilder {
        GraphQueryEngineBuilder::new(graph, service_context)
    }

    /// The graph being queried.
    pub fn graph(&self) -> &ComposableGraph {
        &self.inner.graph
    }

    /// Answer `input` against the root index.
    #[instrument(skip_all, fields(root_id = self.inner.graph.root_id()))]
    pub async fn query(&self, input: impl Into<QueryInput>) -> Result<Response> {
        self.query_root(input.into(), false).await
    }

    /// Answer `input` against the root index on the concurrent path.
    #[instrument(skip_all, fields(root_id = self.inner.graph.root_id()))]
    pub async fn aquery(&self, input: impl Into<QueryInput>) -> Result<Response> {
        self.query_root(input.into(), true).await
    }

    async fn query_root(&self, input: QueryInput, concurrent: bool) -> Result<Response> {
        let root = self.inner.graph.root()?;
        let bundle = self
            .inner
            .query_transform
            .run(input, &TransformContext::for_index(&root))
            .await?;
        let context = QueryContext::root(root.index_id(), self.inner.max_depth);
        self.query_index(&bundle, &root, context, concurrent).await
    }

    async fn query_index(
        &self,
        query: &QueryBundle,
        index_struct: &IndexStruct,
        context: QueryContext,
        concurrent: bool,
    ) -> Result<Response> {
        let inner = &self.inner;
        let config = inner.configs.resolve(index_struct);
        let args = QueryArgs::new(
            index_struct.clone(),
            Arc::clone(inner.graph.docstore()),
            inner.service_context.clone(),
        )
        .with_kwargs(config.query_kwargs.clone())
        .with_sources(Arc::clone(&inner.sources))
        .with_stopwords(Arc::clone(&inner.stopwords));

        let mut query_obj = inner.registry.build(config.query_mode, &args)?;
        if let Some(retriever) = inner.custom_retrievers.get(index_struct.index_id()) {
            debug!(index_id = index_struct.index_id(), retriever = retriever.name(), "Using custom retriever");
            query_obj = query_obj.with_retriever(Arc::clone(retriever));
        }
        debug!(
            index_id = index_struct.index_id(),
            mode = %config.query_mode,
            level = context.level(),
            "Querying graph index"
        );
        let query_obj = query_obj
            .with_runner(Arc::new(self.clone()))
            .with_recursive(inner.recursive)
            .with_use_async(inner.use_async)
            .with_postprocessors(inner.postprocessors.iter().cloned())
            .with_context(context)
            .with_verbose(inner.verbose || config.query_kwargs.verbose);

        if concurrent {
            query_obj.aquery(query).await
        } else {
            query_obj.query(query).await
        }
    }
}

#[async_trait]
impl NestedQueryRunner for ComposableGraphQueryEngine {
    async fn query_nested(
        &self,
        query: &QueryBundle,
        index_struct: &IndexStruct,
        context: QueryContext,
    ) -> Result<Response> {
        self.query_index(query, index_struct, context, false).await
    }

    async fn aquery_nested(
        &self,
        query: &QueryBundle,
        index_struct: &IndexStruct,
        context: QueryContext,
    ) -> Result<Response> {
        self.query_index(query, index_struct, context, true).await
    }
}

/// Builder for [`ComposableGraphQueryEngine`].
#[derive(Debug)]
pub struct GraphQueryEngineBuilder {
    graph: ComposableGraph,
    service_context: ServiceContext,
    registry: QueryRegistry,
    configs: Vec<QueryConfig>,
    custom_retrievers: HashMap<String, Arc<dyn Retriever>>,
    postprocessors: Vec<Arc<dyn NodePostprocessor>>,
    query_transform: Option<Arc<dyn QueryTransform>>,
    recursive: bool,
    use_async: bool,
    max_depth: usize,
    sources: IndexSources,
    stopwords: Option<Arc<dyn Stopwords>>,
    verbose: bool,
}

impl GraphQueryEngineBuilder {
    /// Create a builder; recursion is on by default.
    pub fn new(graph: ComposableGraph, service_context: ServiceContext) -> Self {
        Self {
            graph,
            service_context,
            registry: QueryRegistry::builtin(),
            configs: Vec::new(),
            custom_retrievers: HashMap::new(),
            postprocessors: Vec::new(),
            query_transform: None,
            recursive: true,
            use_async: false,
            max_depth: DEFAULT_MAX_DEPTH,
            sources: IndexSources::new(),
            stopwords: None,
            verbose: false,
        }
    }

    /// Add a query config.
    #[must_use]
    pub fn query_config(mut self, config: QueryConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Add several query configs.
    #[must_use]
    pub fn query_configs(mut self, configs: impl IntoIterator<Item = QueryConfig>) -> Self {
        self.configs.extend(configs);
        self
    }

    /// Retrieve from `index_id` with `retriever` instead of the registered one.
    #[must_use]
    pub fn retriever(mut self, index_id: impl Into<String>, retriever: Arc<dyn Retriever>) -> Self {
        self.custom_retrievers.insert(index_id.into(), retriever);
        self
    }

    /// Postprocessor applied after retrieval at every level.
    #[must_use]
    pub fn postprocessor(mut self, postprocessor: Arc<dyn NodePostprocessor>) -> Self {
        self.postprocessors.push(postprocessor);
        self
    }

    /// Transform applied once to the top-level query.
    #[must_use]
    pub fn query_transform(mut self, transform: Arc<dyn QueryTransform>) -> Self {
        self.query_transform = Some(transform);
        self
    }

    /// Resolve index nodes by querying the indices they reference.
    #[must_use]
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Use the concurrent path inside query objects.
    #[must_use]
    pub fn use_async(mut self, use_async: bool) -> Self {
        self.use_async = use_async;
        self
    }

    /// Deepest nesting level a query may reach.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Replace the dispatch table.
    #[must_use]
    pub fn registry(mut self, registry: QueryRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Vector store of one index.
    #[must_use]
    pub fn vector_store(mut self, index_id: impl Into<String>, store: Arc<dyn VectorStore>) -> Self {
        self.sources = self.sources.with_vector_store(index_id, store);
        self
    }

    /// Vector store of every index without its own.
    #[must_use]
    pub fn default_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.sources = self.sources.with_default_vector_store(store);
        self
    }

    /// Structured source of one table index.
    #[must_use]
    pub fn structured_source(
        mut self,
        index_id: impl Into<String>,
        source: Arc<dyn StructuredDataSource>,
    ) -> Self {
        self.sources = self.sources.with_structured_source(index_id, source);
        self
    }

    /// Stopwords for keyword extraction.
    #[must_use]
    pub fn stopwords(mut self, stopwords: Arc<dyn Stopwords>) -> Self {
        self.stopwords = Some(stopwords);
        self
    }

    /// Log retrieval diagnostics at every level.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the engine, checking every config against the registry.
    pub fn build(self) -> Result<ComposableGraphQueryEngine> {
        if self.max_depth == 0 {
            return Err(TrellisError::configuration("max_depth must be at least 1"));
        }
        for config in &self.configs {
            self.registry.get(config.index_struct_type, config.query_mode)?;
        }
        Ok(ComposableGraphQueryEngine {
            inner: Arc::new(EngineInner {
                graph: self.graph,
                service_context: self.service_context,
                registry: self.registry,
                configs: QueryConfigMap::new(self.configs),
                custom_retrievers: self.custom_retrievers,
                postprocessors: self.postprocessors,
                query_transform: self
                    .query_transform
                    .unwrap_or_else(|| Arc::new(IdentityQueryTransform)),
                recursive: self.recursive,
                use_async: self.use_async,
                max_depth: self.max_depth,
                sources: Arc::new(self.sources),
                stopwords: self.stopwords.unwrap_or_else(EnglishStopwords::shared),
                verbose: self.verbose,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::{IndexList, ScoredNode};
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    fn context(llm: Arc<MockLlmPredictor>) -> ServiceContext {
        ServiceContext::builder()
            .llm(llm)
            .embed_model(Arc::new(MockEmbedder::new(16)))
            .build()
            .unwrap()
    }

    fn two_level_graph() -> ComposableGraph {
        let docstore = Arc::new(DocumentStore::new());
        let child = IndexBuilder::new(Arc::clone(&docstore))
            .list([Node::new("Ferris is the Rust mascot.")])
            .unwrap();
        ComposableGraph::from_indices(
            docstore,
            IndexStructType::List,
            vec![child],
            vec!["facts about rust".to_string()],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_from_indices_sets_summaries_and_roots() {
        let graph = two_level_graph();
        let IndexStruct::List(root) = graph.root().unwrap() else {
            panic!("expected a list root");
        };
        assert_eq!(root.nodes.len(), 1);
        let index_node = graph.docstore().get_node(&root.nodes[0]).unwrap();
        let child = graph
            .docstore()
            .get_index_struct(index_node.index_id().unwrap())
            .unwrap();
        assert_eq!(child.summary(), Some("facts about rust"));
    }

    #[test]
    fn test_from_indices_rejects_bad_input() {
        let docstore = Arc::new(DocumentStore::new());
        let err = ComposableGraph::from_indices(
            Arc::clone(&docstore),
            IndexStructType::List,
            vec![IndexStruct::List(IndexList::new())],
            Vec::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrellisError::Validation { .. }));

        let err = ComposableGraph::from_indices(docstore, IndexStructType::Vector, Vec::new(), Vec::new(), None)
            .unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_recursive_query_cites_child_sources() {
        let llm = Arc::new(MockLlmPredictor::with_responses(["child answer", "root answer"]));
        let engine = ComposableGraphQueryEngine::builder(two_level_graph(), context(llm.clone()))
            .build()
            .unwrap();
        let response = engine.query("Who is Ferris?").await.unwrap();

        assert_eq!(response.to_string(), "root answer");
        let sources: Vec<&str> = response.source_nodes.iter().map(ScoredNode::text).collect();
        assert_eq!(sources, vec!["child answer", "Ferris is the Rust mascot."]);
        assert!(llm.prompts()[0].contains("Ferris is the Rust mascot."));
        assert!(llm.prompts()[1].contains("child answer"));
    }

    #[tokio::test]
    async fn test_non_recursive_query_uses_summary_text() {
        let llm = Arc::new(MockLlmPredictor::with_responses(["root answer"]));
        let engine = ComposableGraphQueryEngine::builder(two_level_graph(), context(llm.clone()))
            .recursive(false)
            .build()
            .unwrap();
        let response = engine.aquery("Who is Ferris?").await.unwrap();

        assert_eq!(llm.call_count(), 1);
        assert!(llm.prompts()[0].contains("facts about rust"));
        assert_eq!(response.source_nodes.len(), 1);
        assert!(response.source_nodes[0].node.is_index_node());
    }

    #[tokio::test]
    async fn test_cyclic_graph_is_rejected() {
        let docstore = Arc::new(DocumentStore::new());
        let mut first = IndexList::new();
        first.index_id = "first".into();
        let mut second = IndexList::new();
        second.index_id = "second".into();
        first.add_node(docstore.insert(Node::index("to second", "second")).unwrap());
        second.add_node(docstore.insert(Node::index("back to first", "first")).unwrap());
        docstore.insert(IndexStruct::List(first)).unwrap();
        docstore.insert(IndexStruct::List(second)).unwrap();

        let llm = Arc::new(MockLlmPredictor::echo());
        let engine = ComposableGraphQueryEngine::builder(ComposableGraph::new(docstore, "first"), context(llm.clone()))
            .build()
            .unwrap();
        let err = engine.query("loop").await.unwrap_err();
        assert!(matches!(err, TrellisError::CycleDetected { .. }));
        assert_eq!(llm.call_count(), 0);
    }
}
