//! The query runner.
//!
//! [`QueryRunner`] maps a (query, index struct) pair to an executable query object and
//! runs it. Config resolution prefers the config for the struct's id, then the one for
//! its type, then a `default`-mode config.
//!
//! The two entry points differ on purpose:
//!
//! - [`QueryRunner::query`] resolves the combiner (config override, runner default,
//!   then [`default_query_combiner`]) and lets it drive the query object.
//! - [`QueryRunner::aquery`] applies the transform once and calls the query object's
//!   async entry point directly; no combiner takes part.
//!
//! Index nodes met by a recursive query re-enter the runner for the referenced struct,
//! on the same path the top-level call took.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use trellis_core::config::{QuerySettings, RawQueryConfig};
use trellis_core::traits::{
    EnglishStopwords, NodePostprocessor, Stopwords, StructuredDataSource, VectorStore,
};
use trellis_core::{
    DocumentStore, IndexStruct, QueryBundle, QueryInput, Response, Result, ServiceContext,
    StreamingResponse, TrellisConfig, TrellisError,
};

use crate::combiners::{QueryCombiner, default_query_combiner};
use crate::query::{IndexQuery, IndexQueryObject};
use crate::query_config::{QueryConfig, QueryConfigMap};
use crate::recursion::{DEFAULT_MAX_DEPTH, NestedQueryRunner, QueryContext};
use crate::registry::{IndexSources, QueryArgs, QueryRegistry};
use crate::transforms::{IdentityQueryTransform, QueryTransform, TransformContext};

#[derive(Debug)]
struct RunnerInner {
    service_context: ServiceContext,
    docstore: Arc<DocumentStore>,
    registry: QueryRegistry,
    configs: QueryConfigMap,
    query_transform: Arc<dyn QueryTransform>,
    query_combiner: Option<Arc<dyn QueryCombiner>>,
    recursive: bool,
    use_async: bool,
    max_depth: usize,
    postprocessors: Vec<Arc<dyn NodePostprocessor>>,
    sources: Arc<IndexSources>,
    stopwords: Arc<dyn Stopwords>,
    verbose: bool,
}

/// Resolves query configs and runs queries against index structs.
///
/// Cloning is cheap; clones share the same immutable state.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use trellis_core::prelude::*;
/// use trellis_query::prelude::*;
///
/// # async fn example(service_context: ServiceContext, docstore: Arc<DocumentStore>, index: IndexStruct) -> Result<()> {
/// let runner = QueryRunner::builder(service_context, docstore)
///     .query_config(QueryConfig::new(IndexStructType::List, QueryMode::Embedding))
///     .recursive(true)
///     .build()?;
///
/// let response = runner.query("What did the author work on?", &index).await?;
/// println!("{response}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueryRunner {
    inner: Arc<RunnerInner>,
}

impl QueryRunner {
    /// Start building a runner over `docstore`.
    pub fn builder(service_context: ServiceContext, docstore: Arc<DocumentStore>) -> QueryRunnerBuilder {
        QueryRunnerBuilder::new(service_context, docstore)
    }

    /// The config that applies to `index_struct`.
    pub fn resolve_config(&self, index_struct: &IndexStruct) -> QueryConfig {
        self.inner.configs.resolve(index_struct)
    }

    /// The document store queries read from.
    pub fn docstore(&self) -> &Arc<DocumentStore> {
        &self.inner.docstore
    }

    /// Whether index nodes are resolved.
    pub fn is_recursive(&self) -> bool {
        self.inner.recursive
    }

    /// Answer `input` against `index_struct`, through the query combiner.
    #[instrument(skip_all, fields(index_id = index_struct.index_id(), struct_type = %index_struct.struct_type()))]
    pub async fn query(&self, input: impl Into<QueryInput>, index_struct: &IndexStruct) -> Result<Response> {
        let context = QueryContext::root(index_struct.index_id(), self.inner.max_depth);
        self.run(input.into(), index_struct, context).await
    }

    /// Answer `input` against `index_struct` on the concurrent path.
    ///
    /// The transform runs once and the query object answers directly.
    #[instrument(skip_all, fields(index_id = index_struct.index_id(), struct_type = %index_struct.struct_type()))]
    pub async fn aquery(&self, input: impl Into<QueryInput>, index_struct: &IndexStruct) -> Result<Response> {
        let context = QueryContext::root(index_struct.index_id(), self.inner.max_depth);
        self.arun(input.into(), index_struct, context).await
    }

    /// Answer with the text streamed as it is generated.
    ///
    /// Streaming bypasses the combiner, since a combiner may merge several answers.
    pub async fn query_streaming(
        &self,
        input: impl Into<QueryInput>,
        index_struct: &IndexStruct,
    ) -> Result<StreamingResponse> {
        let context = QueryContext::root(index_struct.index_id(), self.inner.max_depth);
        let config = self.resolve_config(index_struct);
        let bundle = self.transform(&config, input.into(), index_struct).await?;
        self.build_query(index_struct, &config, context)?
            .query_streaming(&bundle)
            .await
    }

    fn transform_for(&self, config: &QueryConfig) -> Arc<dyn QueryTransform> {
        config
            .query_transform
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.inner.query_transform))
    }

    async fn transform(&self, config: &QueryConfig, input: QueryInput, index_struct: &IndexStruct) -> Result<QueryBundle> {
        self.transform_for(config)
            .run(input, &TransformContext::for_index(index_struct))
            .await
    }

    fn build_query(
        &self,
        index_struct: &IndexStruct,
        config: &QueryConfig,
        context: QueryContext,
    ) -> Result<IndexQueryObject> {
        let inner = &self.inner;
        let args = QueryArgs::new(
            index_struct.clone(),
            Arc::clone(&inner.docstore),
            inner.service_context.clone(),
        )
        .with_kwargs(config.query_kwargs.clone())
        .with_sources(Arc::clone(&inner.sources))
        .with_stopwords(Arc::clone(&inner.stopwords));
        let query = inner
            .registry
            .build(config.query_mode, &args)?
            .with_runner(Arc::new(self.clone()))
            .with_recursive(inner.recursive)
            .with_use_async(inner.use_async)
            .with_postprocessors(inner.postprocessors.iter().cloned())
            .with_context(context)
            .with_verbose(inner.verbose || config.query_kwargs.verbose);
        Ok(query)
    }

    async fn run(&self, input: QueryInput, index_struct: &IndexStruct, context: QueryContext) -> Result<Response> {
        let config = self.resolve_config(index_struct);
        debug!(
            index_id = index_struct.index_id(),
            mode = %config.query_mode,
            level = context.level(),
            "Resolved query config"
        );
        let combiner = match (&config.query_combiner, &self.inner.query_combiner) {
            (Some(combiner), _) | (None, Some(combiner)) => Arc::clone(combiner),
            (None, None) => default_query_combiner(index_struct, self.transform_for(&config)),
        };
        let query = self.build_query(index_struct, &config, context)?;
        debug!(combiner = combiner.name(), "Running query through combiner");
        combiner.run(&query, input).await
    }

    async fn arun(&self, input: QueryInput, index_struct: &IndexStruct, context: QueryContext) -> Result<Response> {
        let config = self.resolve_config(index_struct);
        debug!(
            index_id = index_struct.index_id(),
            mode = %config.query_mode,
            level = context.level(),
            "Resolved query config"
        );
        let bundle = self.transform(&config, input, index_struct).await?;
        self.build_query(index_struct, &config, context)?
            .aquery(&bundle)
            .await
    }
}

#[async_trait]
impl NestedQueryRunner for QueryRunner {
    async fn query_nested(
        &self,
        query: &QueryBundle,
        index_struct: &IndexStruct,
        context: QueryContext,
    ) -> Result<Response> {
        self.run(QueryInput::from(query), index_struct, context).await
    }

    async fn aquery_nested(
        &self,
        query: &QueryBundle,
        index_struct: &IndexStruct,
        context: QueryContext,
    ) -> Result<Response> {
        self.arun(QueryInput::from(query), index_struct, context).await
    }
}

/// Builder for [`QueryRunner`].
#[derive(Debug)]
pub struct QueryRunnerBuilder {
    service_context: ServiceContext,
    docstore: Arc<DocumentStore>,
    registry: QueryRegistry,
    configs: Vec<QueryConfig>,
    raw_configs: Vec<RawQueryConfig>,
    query_transform: Option<Arc<dyn QueryTransform>>,
    query_combiner: Option<Arc<dyn QueryCombiner>>,
    recursive: bool,
    use_async: bool,
    max_depth: usize,
    postprocessors: Vec<Arc<dyn NodePostprocessor>>,
    sources: IndexSources,
    stopwords: Option<Arc<dyn Stopwords>>,
    verbose: bool,
}

impl QueryRunnerBuilder {
    /// Create a builder with the built-in registry and no configs.
    pub fn new(service_context: ServiceContext, docstore: Arc<DocumentStore>) -> Self {
        Self {
            service_context,
            docstore,
            registry: QueryRegistry::builtin(),
            configs: Vec::new(),
            raw_configs: Vec::new(),
            query_transform: None,
            query_combiner: None,
            recursive: false,
            use_async: false,
            max_depth: DEFAULT_MAX_DEPTH,
            postprocessors: Vec::new(),
            sources: IndexSources::new(),
            stopwords: None,
            verbose: false,
        }
    }

    /// Add a typed query config.
    #[must_use]
    pub fn query_config(mut self, config: QueryConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Add several typed query configs.
    #[must_use]
    pub fn query_configs(mut self, configs: impl IntoIterator<Item = QueryConfig>) -> Self {
        self.configs.extend(configs);
        self
    }

    /// Add configs as written in configuration; their tags are checked by [`Self::build`].
    #[must_use]
    pub fn raw_query_configs(mut self, configs: impl IntoIterator<Item = RawQueryConfig>) -> Self {
        self.raw_configs.extend(configs);
        self
    }

    /// Apply the query settings and query configs of a loaded configuration.
    #[must_use]
    pub fn config(self, config: &TrellisConfig) -> Self {
        self.settings(&config.query)
            .raw_query_configs(config.query_configs.iter().cloned())
    }

    /// Apply query execution settings.
    #[must_use]
    pub fn settings(mut self, settings: &QuerySettings) -> Self {
        self.recursive = settings.recursive;
        self.use_async = settings.use_async;
        self.max_depth = settings.max_depth;
        self.verbose = settings.verbose;
        self
    }

    /// Default transform. Identity when unset.
    #[must_use]
    pub fn query_transform(mut self, transform: Arc<dyn QueryTransform>) -> Self {
        self.query_transform = Some(transform);
        self
    }

    /// Default combiner. A passthrough matching the struct type when unset.
    #[must_use]
    pub fn query_combiner(mut self, combiner: Arc<dyn QueryCombiner>) -> Self {
        self.query_combiner = Some(combiner);
        self
    }

    /// Resolve index nodes by querying the structs they reference.
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

    /// Deepest nesting level a recursive query may reach.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Postprocessor applied after retrieval at every level.
    #[must_use]
    pub fn postprocessor(mut self, postprocessor: Arc<dyn NodePostprocessor>) -> Self {
        self.postprocessors.push(postprocessor);
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

    /// Structured source of every table index without its own.
    #[must_use]
    pub fn default_structured_source(mut self, source: Arc<dyn StructuredDataSource>) -> Self {
        self.sources = self.sources.with_default_structured_source(source);
        self
    }

    /// Stopwords for keyword extraction. English when unset.
    #[must_use]
    pub fn stopwords(mut self, stopwords: Arc<dyn Stopwords>) -> Self {
        self.stopwords = Some(stopwords);
        self
    }

    /// Log retrieval diagnostics for every query.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the runner.
    ///
    /// Fails when a config names an unregistered (type, mode) pair, when a raw config
    /// carries an unknown tag, or when `max_depth` is zero.
    pub fn build(self) -> Result<QueryRunner> {
        if self.max_depth == 0 {
            return Err(TrellisError::configuration("max_depth must be at least 1"));
        }
        let mut configs = Vec::with_capacity(self.raw_configs.len() + self.configs.len());
        for raw in &self.raw_configs {
            configs.push(QueryConfig::try_from(raw)?);
        }
        configs.extend(self.configs);
        for config in &configs {
            self.registry.get(config.index_struct_type, config.query_mode)?;
        }
        debug!(
            configs = configs.len(),
            recursive = self.recursive,
            use_async = self.use_async,
            max_depth = self.max_depth,
            "Built query runner"
        );

        Ok(QueryRunner {
            inner: Arc::new(RunnerInner {
                service_context: self.service_context,
                docstore: self.docstore,
                registry: self.registry,
                configs: QueryConfigMap::new(configs),
                query_transform: self
                    .query_transform
                    .unwrap_or_else(|| Arc::new(IdentityQueryTransform)),
                query_combiner: self.query_combiner,
                recursive: self.recursive,
                use_async: self.use_async,
                max_depth: self.max_depth,
                postprocessors: self.postprocessors,
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
    use serde_json::json;
    use trellis_core::{IndexList, IndexStructType, Node};
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    use crate::query_config::QueryMode;

    fn context(llm: Arc<MockLlmPredictor>) -> ServiceContext {
        ServiceContext::builder()
            .llm(llm)
            .embed_model(Arc::new(MockEmbedder::new(16)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unregistered_config_fails_at_build() {
        let llm = Arc::new(MockLlmPredictor::echo());
        let err = QueryRunner::builder(context(llm.clone()), Arc::new(DocumentStore::new()))
            .query_config(QueryConfig::new(IndexStructType::List, QueryMode::Sql))
            .build()
            .unwrap_err();
        assert!(matches!(err, TrellisError::UnknownQueryMode { .. }));
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn test_raw_configs_and_depth_are_checked() {
        let raw: RawQueryConfig =
            serde_json::from_value(json!({"index_struct_type": "list", "query_mode": "nope"})).unwrap();
        let err = QueryRunner::builder(context(Arc::new(MockLlmPredictor::echo())), Arc::new(DocumentStore::new()))
            .raw_query_configs([raw])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nope"));

        let err = QueryRunner::builder(context(Arc::new(MockLlmPredictor::echo())), Arc::new(DocumentStore::new()))
            .max_depth(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
    }

    #[test]
    fn test_settings_from_config() {
        let config = TrellisConfig::from_json_str(
            r#"{"query": {"recursive": true, "max_depth": 3},
                "query_configs": [{"index_struct_type": "list", "query_mode": "embedding"}]}"#,
        )
        .unwrap();
        let runner = QueryRunner::builder(context(Arc::new(MockLlmPredictor::echo())), Arc::new(DocumentStore::new()))
            .config(&config)
            .build()
            .unwrap();
        assert!(runner.is_recursive());
        let resolved = runner.resolve_config(&IndexStruct::List(IndexList::new()));
        assert_eq!(resolved.query_mode, QueryMode::Embedding);
    }

    #[tokio::test]
    async fn test_compact_list_query_makes_one_call() {
        let llm = Arc::new(MockLlmPredictor::with_responses(["three facts"]));
        let docstore = Arc::new(DocumentStore::new());
        let mut list = IndexList::new();
        for text in ["Rust was started at Mozilla.", "Cargo builds crates.", "Tokio runs futures."] {
            list.add_node(docstore.insert(Node::new(text)).unwrap());
        }
        let index = IndexStruct::List(list);
        let kwargs = crate::query_config::QueryKwargs::default()
            .with_response_mode(crate::synthesizer::ResponseMode::Compact);
        let runner = QueryRunner::builder(context(llm.clone()), docstore)
            .query_config(QueryConfig::new(IndexStructType::List, QueryMode::Default).with_kwargs(kwargs))
            .build()
            .unwrap();

        let response = runner.query("What do we know?", &index).await.unwrap();
        assert_eq!(response.to_string(), "three facts");
        assert_eq!(response.source_nodes.len(), 3);
        assert_eq!(llm.call_count(), 1);
    }
}
