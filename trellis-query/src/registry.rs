//! Dispatch table from (index struct type, query mode) to query construction.
//!
//! Each [`QueryRegistration`] pairs a retriever constructor with a synthesis policy.
//! [`QueryRegistry::builtin`] holds every built-in pair; callers may register more.
//! Looking up an unregistered pair fails with [`TrellisError::UnknownQueryMode`]
//! before any external call is made.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use trellis_core::traits::{EnglishStopwords, Retriever, Stopwords, StructuredDataSource, VectorStore};
use trellis_core::{
    DocumentStore, IndexGraph, IndexList, IndexStruct, IndexStructType, KeywordTable, Result,
    ServiceContext, StructTable, TrellisError, VectorIndexDict,
};

use crate::postprocessor::KeywordNodePostprocessor;
use crate::query::IndexQueryObject;
use crate::query_config::{QueryKwargs, QueryMode};
use crate::retrievers::{
    KeywordStrategy, KeywordTableRetriever, ListEmbeddingRetriever, ListRetriever,
    StructStoreRetriever, StructuredQueryMode, TreeAllLeafRetriever, TreeRootRetriever,
    TreeSelectLeafEmbeddingRetriever, TreeSelectLeafRetriever, VectorIndexRetriever,
};
use crate::synthesizer::{ResponseMode, ResponseSynthesizer};

/// External backends of vector and struct-store indices.
///
/// A backend registered for an index id wins over the default one.
#[derive(Debug, Clone, Default)]
pub struct IndexSources {
    vector_stores: HashMap<String, Arc<dyn VectorStore>>,
    default_vector_store: Option<Arc<dyn VectorStore>>,
    structured_sources: HashMap<String, Arc<dyn StructuredDataSource>>,
    default_structured_source: Option<Arc<dyn StructuredDataSource>>,
}

impl IndexSources {
    /// No backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector store of one index.
    #[must_use]
    pub fn with_vector_store(mut self, index_id: impl Into<String>, store: Arc<dyn VectorStore>) -> Self {
        self.vector_stores.insert(index_id.into(), store);
        self
    }

    /// Vector store of every index without its own.
    #[must_use]
    pub fn with_default_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.default_vector_store = Some(store);
        self
    }

    /// Structured source of one table index.
    #[must_use]
    pub fn with_structured_source(
        mut self,
        index_id: impl Into<String>,
        source: Arc<dyn StructuredDataSource>,
    ) -> Self {
        self.structured_sources.insert(index_id.into(), source);
        self
    }

    /// Structured source of every table index without its own.
    #[must_use]
    pub fn with_default_structured_source(mut self, source: Arc<dyn StructuredDataSource>) -> Self {
        self.default_structured_source = Some(source);
        self
    }

    /// The vector store backing `index_id`.
    pub fn vector_store_for(&self, index_id: &str) -> Result<Arc<dyn VectorStore>> {
        self.vector_stores
            .get(index_id)
            .or(self.default_vector_store.as_ref())
            .cloned()
            .ok_or_else(|| {
                TrellisError::configuration(format!("no vector store configured for index '{index_id}'"))
            })
    }

    /// The structured source backing `index_id`.
    pub fn structured_source_for(&self, index_id: &str) -> Result<Arc<dyn StructuredDataSource>> {
        self.structured_sources
            .get(index_id)
            .or(self.default_structured_source.as_ref())
            .cloned()
            .ok_or_else(|| {
                TrellisError::configuration(format!(
                    "no structured data source configured for index '{index_id}'"
                ))
            })
    }
}

/// Everything a retriever constructor may draw on.
#[derive(Debug, Clone)]
pub struct QueryArgs {
    /// Target index struct.
    pub index_struct: IndexStruct,
    /// Store holding the struct's nodes.
    pub docstore: Arc<DocumentStore>,
    /// Services with the kwargs overrides applied.
    pub service_context: ServiceContext,
    /// Query arguments.
    pub kwargs: QueryKwargs,
    /// Vector stores and structured sources.
    pub sources: Arc<IndexSources>,
    /// Stopwords for keyword extraction.
    pub stopwords: Arc<dyn Stopwords>,
}

impl QueryArgs {
    /// Args with default kwargs, no backends and the built-in stopwords.
    pub fn new(index_struct: IndexStruct, docstore: Arc<DocumentStore>, service_context: ServiceContext) -> Self {
        Self {
            index_struct,
            docstore,
            service_context,
            kwargs: QueryKwargs::default(),
            sources: Arc::new(IndexSources::default()),
            stopwords: EnglishStopwords::shared(),
        }
    }

    /// Set the kwargs, applying their service overrides to the current services.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: QueryKwargs) -> Self {
        self.service_context = kwargs.resolve_services(&self.service_context);
        self.kwargs = kwargs;
        self
    }

    /// Set the backends.
    #[must_use]
    pub fn with_sources(mut self, sources: Arc<IndexSources>) -> Self {
        self.sources = sources;
        self
    }

    /// Set the stopwords.
    #[must_use]
    pub fn with_stopwords(mut self, stopwords: Arc<dyn Stopwords>) -> Self {
        self.stopwords = stopwords;
        self
    }

    fn mismatch(&self, expected: IndexStructType) -> TrellisError {
        TrellisError::configuration(format!(
            "retriever for '{expected}' structs cannot query index '{}' of type '{}'",
            self.index_struct.index_id(),
            self.index_struct.struct_type()
        ))
    }

    fn tree(&self) -> Result<IndexGraph> {
        match &self.index_struct {
            IndexStruct::Tree(tree) => Ok(tree.clone()),
            _ => Err(self.mismatch(IndexStructType::Tree)),
        }
    }

    fn list(&self) -> Result<IndexList> {
        match &self.index_struct {
            IndexStruct::List(list) => Ok(list.clone()),
            _ => Err(self.mismatch(IndexStructType::List)),
        }
    }

    fn keyword_table(&self) -> Result<KeywordTable> {
        match &self.index_struct {
            IndexStruct::KeywordTable(table) => Ok(table.clone()),
            _ => Err(self.mismatch(IndexStructType::KeywordTable)),
        }
    }

    fn vector(&self) -> Result<VectorIndexDict> {
        match &self.index_struct {
            IndexStruct::Vector(index) => Ok(index.clone()),
            _ => Err(self.mismatch(IndexStructType::Vector)),
        }
    }

    fn table(&self) -> Result<StructTable> {
        match &self.index_struct {
            IndexStruct::Table(table) => Ok(table.clone()),
            _ => Err(self.mismatch(IndexStructType::Table)),
        }
    }
}

/// Builds the retriever of a registration.
pub type RetrieverConstructor = fn(&QueryArgs) -> Result<Arc<dyn Retriever>>;

/// How a registered query turns its nodes into an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisPolicy {
    /// Synthesize with this response mode unless the kwargs name another.
    Synthesize(ResponseMode),
    /// Answer with the retrieved text.
    Passthrough,
}

/// One entry of the dispatch table.
#[derive(Debug, Clone, Copy)]
pub struct QueryRegistration {
    /// Retriever constructor.
    pub retriever: RetrieverConstructor,
    /// Synthesis policy.
    pub synthesis: SynthesisPolicy,
}

impl QueryRegistration {
    /// Registration synthesizing with `response_mode` by default.
    pub fn synthesized(retriever: RetrieverConstructor, response_mode: ResponseMode) -> Self {
        Self {
            retriever,
            synthesis: SynthesisPolicy::Synthesize(response_mode),
        }
    }

    /// Registration answering with the retrieved text.
    pub fn passthrough(retriever: RetrieverConstructor) -> Self {
        Self {
            retriever,
            synthesis: SynthesisPolicy::Passthrough,
        }
    }
}

/// (index struct type, query mode) → [`QueryRegistration`].
#[derive(Debug, Clone)]
pub struct QueryRegistry {
    entries: HashMap<(IndexStructType, QueryMode), QueryRegistration>,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl QueryRegistry {
    /// A registry without entries.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The built-in registrations.
    pub fn builtin() -> Self {
        use IndexStructType as T;
        use QueryMode as M;
        use ResponseMode as R;

        let mut registry = Self::empty();
        registry.register(T::Tree, M::Default, QueryRegistration::synthesized(tree_select_leaf, R::Default));
        registry.register(T::Tree, M::Embedding, QueryRegistration::synthesized(tree_select_leaf_embedding, R::Default));
        registry.register(T::Tree, M::Retrieve, QueryRegistration::synthesized(tree_root, R::Default));
        registry.register(T::Tree, M::Summarize, QueryRegistration::synthesized(tree_all_leaf, R::TreeSummarize));
        registry.register(T::List, M::Default, QueryRegistration::synthesized(list, R::Default));
        registry.register(T::List, M::Embedding, QueryRegistration::synthesized(list_embedding, R::Default));
        registry.register(T::KeywordTable, M::Default, QueryRegistration::synthesized(keyword_llm, R::Default));
        registry.register(T::KeywordTable, M::Simple, QueryRegistration::synthesized(keyword_simple, R::Default));
        registry.register(T::KeywordTable, M::Rake, QueryRegistration::synthesized(keyword_rake, R::Default));
        registry.register(T::Vector, M::Default, QueryRegistration::synthesized(vector, R::Default));
        registry.register(T::Table, M::Default, QueryRegistration::passthrough(table_natural_language));
        registry.register(T::Table, M::Sql, QueryRegistration::passthrough(table_sql));
        registry
    }

    /// Add or replace a registration, returning the replaced one.
    pub fn register(
        &mut self,
        struct_type: IndexStructType,
        mode: QueryMode,
        registration: QueryRegistration,
    ) -> Option<QueryRegistration> {
        self.entries.insert((struct_type, mode), registration)
    }

    /// Whether a pair is registered.
    pub fn contains(&self, struct_type: IndexStructType, mode: QueryMode) -> bool {
        self.entries.contains_key(&(struct_type, mode))
    }

    /// The registration of a pair.
    pub fn get(&self, struct_type: IndexStructType, mode: QueryMode) -> Result<&QueryRegistration> {
        self.entries
            .get(&(struct_type, mode))
            .ok_or_else(|| TrellisError::UnknownQueryMode {
                struct_type: struct_type.to_string(),
                mode: mode.to_string(),
            })
    }

    /// Registered pairs, sorted by struct type then mode tag.
    pub fn registrations(&self) -> Vec<(IndexStructType, QueryMode)> {
        let mut pairs: Vec<_> = self.entries.keys().copied().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.as_ref().cmp(b.1.as_ref())));
        pairs
    }

    /// Build the query object for `mode` over `args.index_struct`.
    ///
    /// The kwargs choose the response mode and templates; required or excluded
    /// keywords add a keyword postprocessor.
    pub fn build(&self, mode: QueryMode, args: &QueryArgs) -> Result<IndexQueryObject> {
        let struct_type = args.index_struct.struct_type();
        let registration = self.get(struct_type, mode)?;
        let retriever = (registration.retriever)(args)?;
        debug!(%struct_type, %mode, retriever = retriever.name(), "Built retriever");

        let kwargs = &args.kwargs;
        let mut query = IndexQueryObject::new(args.index_struct.clone(), retriever, Arc::clone(&args.docstore))
            .with_verbose(kwargs.verbose);
        if let SynthesisPolicy::Synthesize(default_mode) = registration.synthesis {
            let mut synthesizer = ResponseSynthesizer::new(args.service_context.clone())
                .with_response_mode(kwargs.response_mode.unwrap_or(default_mode))
                .with_verbose(kwargs.verbose);
            if let Some(template) = &kwargs.text_qa_template {
                synthesizer = synthesizer.with_text_qa_template(template.clone());
            }
            if let Some(template) = &kwargs.refine_template {
                synthesizer = synthesizer.with_refine_template(template.clone());
            }
            if let Some(template) = &kwargs.summary_template {
                synthesizer = synthesizer.with_summary_template(template.clone());
            }
            query = query.with_synthesizer(synthesizer);
        }
        if !kwargs.required_keywords.is_empty() || !kwargs.exclude_keywords.is_empty() {
            let filter = KeywordNodePostprocessor::new(
                kwargs.required_keywords.clone(),
                kwargs.exclude_keywords.clone(),
            )?;
            query = query.with_postprocessor(Arc::new(filter));
        }
        Ok(query)
    }
}

fn tree_select_leaf(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    Ok(Arc::new(
        TreeSelectLeafRetriever::new(args.tree()?, Arc::clone(&args.docstore), args.service_context.clone())
            .with_child_branch_factor(args.kwargs.child_branch_factor)
            .with_verbose(args.kwargs.verbose),
    ))
}

fn tree_select_leaf_embedding(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    Ok(Arc::new(
        TreeSelectLeafEmbeddingRetriever::new(
            args.tree()?,
            Arc::clone(&args.docstore),
            args.service_context.clone(),
        )
        .with_child_branch_factor(args.kwargs.child_branch_factor)
        .with_verbose(args.kwargs.verbose),
    ))
}

fn tree_root(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    Ok(Arc::new(TreeRootRetriever::new(args.tree()?, Arc::clone(&args.docstore))))
}

fn tree_all_leaf(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    Ok(Arc::new(TreeAllLeafRetriever::new(args.tree()?, Arc::clone(&args.docstore))))
}

fn list(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    Ok(Arc::new(ListRetriever::new(args.list()?, Arc::clone(&args.docstore))))
}

fn list_embedding(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    Ok(Arc::new(
        ListEmbeddingRetriever::new(args.list()?, Arc::clone(&args.docstore), args.service_context.clone())
            .with_similarity_top_k(args.kwargs.similarity_top_k)
            .with_verbose(args.kwargs.verbose),
    ))
}

fn keyword_retriever(args: &QueryArgs, strategy: KeywordStrategy) -> Result<Arc<dyn Retriever>> {
    Ok(Arc::new(
        KeywordTableRetriever::new(
            args.keyword_table()?,
            Arc::clone(&args.docstore),
            args.service_context.clone(),
            Arc::clone(&args.stopwords),
            strategy,
        )
        .with_keyword_match(args.kwargs.keyword_match)
        .with_max_keywords_per_query(args.kwargs.max_keywords_per_query)
        .with_num_chunks_per_query(args.kwargs.num_chunks_per_query)
        .with_verbose(args.kwargs.verbose),
    ))
}

fn keyword_llm(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    keyword_retriever(args, KeywordStrategy::Llm)
}

fn keyword_simple(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    keyword_retriever(args, KeywordStrategy::Simple)
}

fn keyword_rake(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    keyword_retriever(args, KeywordStrategy::Rake)
}

fn vector(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    let index = args.vector()?;
    let store = args.sources.vector_store_for(&index.index_id)?;
    Ok(Arc::new(
        VectorIndexRetriever::new(index, Arc::clone(&args.docstore), args.service_context.clone(), store)
            .with_similarity_top_k(args.kwargs.similarity_top_k)
            .with_verbose(args.kwargs.verbose),
    ))
}

fn table_retriever(args: &QueryArgs, mode: StructuredQueryMode) -> Result<Arc<dyn Retriever>> {
    let table = args.table()?;
    let source = args.sources.structured_source_for(&table.index_id)?;
    Ok(Arc::new(
        StructStoreRetriever::new(table, source, args.service_context.clone(), mode)
            .with_verbose(args.kwargs.verbose),
    ))
}

fn table_natural_language(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    table_retriever(args, StructuredQueryMode::NaturalLanguage)
}

fn table_sql(args: &QueryArgs) -> Result<Arc<dyn Retriever>> {
    table_retriever(args, StructuredQueryMode::Raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;
    use test_case::test_case;
    use trellis_core::ColumnSchema;
    use trellis_integrations::SimpleVectorStore;
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    fn context() -> ServiceContext {
        ServiceContext::builder()
            .llm(Arc::new(MockLlmPredictor::echo()))
            .embed_model(Arc::new(MockEmbedder::new(8)))
            .build()
            .unwrap()
    }

    fn empty_struct(struct_type: IndexStructType) -> IndexStruct {
        match struct_type {
            IndexStructType::Tree => IndexGraph::new().into(),
            IndexStructType::List => IndexList::new().into(),
            IndexStructType::KeywordTable => KeywordTable::new().into(),
            IndexStructType::Vector => VectorIndexDict::new().into(),
            IndexStructType::Table => StructTable::new("t", vec![ColumnSchema::new("a", "TEXT")]).into(),
        }
    }

    #[derive(Debug)]
    struct NoRows;

    #[async_trait::async_trait]
    impl StructuredDataSource for NoRows {
        async fn execute(&self, _structured_query: &str) -> Result<trellis_core::traits::TableResult> {
            Ok(trellis_core::traits::TableResult::default())
        }
    }

    fn args(struct_type: IndexStructType) -> QueryArgs {
        let sources = IndexSources::new()
            .with_default_vector_store(Arc::new(SimpleVectorStore::new()))
            .with_default_structured_source(Arc::new(NoRows));
        QueryArgs::new(empty_struct(struct_type), Arc::new(DocumentStore::new()), context())
            .with_sources(Arc::new(sources))
    }

    #[test_case(IndexStructType::Tree, QueryMode::Default, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::Tree, QueryMode::Embedding, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::Tree, QueryMode::Retrieve, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::Tree, QueryMode::Summarize, Some(ResponseMode::TreeSummarize))]
    #[test_case(IndexStructType::List, QueryMode::Default, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::List, QueryMode::Embedding, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::KeywordTable, QueryMode::Default, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::KeywordTable, QueryMode::Simple, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::KeywordTable, QueryMode::Rake, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::Vector, QueryMode::Default, Some(ResponseMode::Default))]
    #[test_case(IndexStructType::Table, QueryMode::Default, None)]
    #[test_case(IndexStructType::Table, QueryMode::Sql, None)]
    fn test_builtin_pairs_build(struct_type: IndexStructType, mode: QueryMode, response_mode: Option<ResponseMode>) {
        let query = QueryRegistry::builtin().build(mode, &args(struct_type)).unwrap();
        assert_eq!(query.synthesizer().map(ResponseSynthesizer::response_mode), response_mode);
    }

    #[test]
    fn test_every_other_pair_is_unknown() {
        let registry = QueryRegistry::builtin();
        assert_eq!(registry.registrations().len(), 12);
        for struct_type in IndexStructType::iter() {
            for mode in QueryMode::iter() {
                if registry.contains(struct_type, mode) {
                    continue;
                }
                let err = registry.build(mode, &args(struct_type)).unwrap_err();
                assert!(
                    matches!(err, TrellisError::UnknownQueryMode { .. }),
                    "{struct_type}/{mode}: {err}"
                );
            }
        }
    }

    #[test]
    fn test_unknown_mode_names_pair() {
        let err = QueryRegistry::builtin()
            .get(IndexStructType::List, QueryMode::Sql)
            .unwrap_err();
        assert!(err.to_string().contains("'list'"));
        assert!(err.to_string().contains("'sql'"));
    }

    #[test]
    fn test_kwargs_override_response_mode_and_add_filter() {
        let mut kwargs = QueryKwargs::default().with_response_mode(ResponseMode::Compact);
        kwargs.required_keywords = vec!["rust".into()];
        let query = QueryRegistry::builtin()
            .build(QueryMode::Default, &args(IndexStructType::List).with_kwargs(kwargs))
            .unwrap();
        assert_eq!(
            query.synthesizer().map(ResponseSynthesizer::response_mode),
            Some(ResponseMode::Compact)
        );
        assert!(format!("{query:?}").contains("KeywordNodePostprocessor"));
    }

    #[test]
    fn test_missing_backends_are_configuration_errors() {
        let bare = QueryArgs::new(empty_struct(IndexStructType::Vector), Arc::new(DocumentStore::new()), context());
        let err = QueryRegistry::builtin().build(QueryMode::Default, &bare).unwrap_err();
        assert!(err.to_string().contains("no vector store"));

        let bare = QueryArgs::new(empty_struct(IndexStructType::Table), Arc::new(DocumentStore::new()), context());
        let err = QueryRegistry::builtin().build(QueryMode::Sql, &bare).unwrap_err();
        assert!(err.to_string().contains("no structured data source"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = QueryRegistry::empty();
        registry.register(
            IndexStructType::List,
            QueryMode::Retrieve,
            QueryRegistration::passthrough(list),
        );
        let query = registry
            .build(QueryMode::Retrieve, &args(IndexStructType::List))
            .unwrap();
        assert!(query.synthesizer().is_none());
        assert!(!registry.contains(IndexStructType::List, QueryMode::Default));
    }
}
