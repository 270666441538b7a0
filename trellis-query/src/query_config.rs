//! Per-index query configuration.
//!
//! A [`QueryConfig`] names the query mode for an index struct type, or for one index
//! id, plus the [`QueryKwargs`] and optional transform/combiner overrides the runner
//! applies when it builds the query object.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::debug;

use trellis_core::config::RawQueryConfig;
use trellis_core::prompts::{PromptTemplate, PromptType};
use trellis_core::traits::{Embedder, LlmPredictor};
use trellis_core::{IndexStruct, IndexStructType, PromptHelper, Result, ServiceContext, TrellisError};

use crate::combiners::QueryCombiner;
use crate::synthesizer::ResponseMode;
use crate::transforms::QueryTransform;

/// Query mode tags.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueryMode {
    /// The struct type's primary mode.
    #[default]
    Default,
    /// Tree: answer from the root nodes.
    Retrieve,
    /// Embedding similarity instead of LLM selection.
    Embedding,
    /// Tree: summarize every leaf.
    Summarize,
    /// Keyword table: frequency-based query keywords.
    Simple,
    /// Keyword table: RAKE query keywords.
    Rake,
    /// Table: the query string is the structured query.
    Sql,
}

/// How a keyword-table query combines the postings of several keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeywordMatch {
    /// Nodes hit by any keyword, ranked by hit count.
    #[default]
    Any,
    /// Nodes hit by every matched keyword.
    All,
}

/// Arguments for building a query object.
///
/// The service fields are filled from the runner's [`ServiceContext`] only when left
/// unset.
#[derive(Debug, Clone)]
pub struct QueryKwargs {
    /// LLM override.
    pub llm_predictor: Option<Arc<dyn LlmPredictor>>,
    /// Embedding model override.
    pub embed_model: Option<Arc<dyn Embedder>>,
    /// Prompt budget override.
    pub prompt_helper: Option<PromptHelper>,
    /// Response mode override; the registration's mode otherwise.
    pub response_mode: Option<ResponseMode>,
    /// Top-k for embedding and vector retrieval.
    pub similarity_top_k: usize,
    /// Children followed per level of a tree.
    pub child_branch_factor: usize,
    /// Keywords extracted from the query.
    pub max_keywords_per_query: usize,
    /// Nodes a keyword-table query returns.
    pub num_chunks_per_query: usize,
    /// How keyword postings combine.
    pub keyword_match: KeywordMatch,
    /// Nodes must contain every one of these.
    pub required_keywords: Vec<String>,
    /// Nodes must contain none of these.
    pub exclude_keywords: Vec<String>,
    /// Log retrieval diagnostics.
    pub verbose: bool,
    /// Answer template.
    pub text_qa_template: Option<PromptTemplate>,
    /// Refine template.
    pub refine_template: Option<PromptTemplate>,
    /// Tree summarize template.
    pub summary_template: Option<PromptTemplate>,
}

impl Default for QueryKwargs {
    fn default() -> Self {
        Self {
            llm_predictor: None,
            embed_model: None,
            prompt_helper: None,
            response_mode: None,
            similarity_top_k: 1,
            child_branch_factor: 1,
            max_keywords_per_query: 10,
            num_chunks_per_query: 10,
            keyword_match: KeywordMatch::Any,
            required_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            verbose: false,
            text_qa_template: None,
            refine_template: None,
            summary_template: None,
        }
    }
}

/// The JSON-expressible subset of [`QueryKwargs`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SerializedKwargs {
    response_mode: Option<ResponseMode>,
    similarity_top_k: Option<usize>,
    child_branch_factor: Option<usize>,
    max_keywords_per_query: Option<usize>,
    num_chunks_per_query: Option<usize>,
    keyword_match: Option<KeywordMatch>,
    required_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
    verbose: bool,
    text_qa_template: Option<String>,
    refine_template: Option<String>,
    summary_template: Option<String>,
}

impl QueryKwargs {
    /// Parse kwargs from a JSON object. Unknown keys are a configuration error.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let parsed: SerializedKwargs =
            serde_json::from_value(serde_json::Value::Object(map.clone()))
                .map_err(|e| TrellisError::configuration(format!("invalid query kwargs: {e}")))?;
        let defaults = Self::default();
        Ok(Self {
            response_mode: parsed.response_mode,
            similarity_top_k: parsed.similarity_top_k.unwrap_or(defaults.similarity_top_k),
            child_branch_factor: parsed
                .child_branch_factor
                .unwrap_or(defaults.child_branch_factor),
            max_keywords_per_query: parsed
                .max_keywords_per_query
                .unwrap_or(defaults.max_keywords_per_query),
            num_chunks_per_query: parsed
                .num_chunks_per_query
                .unwrap_or(defaults.num_chunks_per_query),
            keyword_match: parsed.keyword_match.unwrap_or_default(),
            required_keywords: parsed.required_keywords,
            exclude_keywords: parsed.exclude_keywords,
            verbose: parsed.verbose,
            text_qa_template: parsed
                .text_qa_template
                .map(|t| PromptTemplate::new(t, PromptType::QuestionAnswer)),
            refine_template: parsed
                .refine_template
                .map(|t| PromptTemplate::new(t, PromptType::Refine)),
            summary_template: parsed
                .summary_template
                .map(|t| PromptTemplate::new(t, PromptType::Summary)),
            ..defaults
        })
    }

    /// Set the response mode.
    #[must_use]
    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = Some(mode);
        self
    }

    /// Set the similarity top-k.
    #[must_use]
    pub fn with_similarity_top_k(mut self, k: usize) -> Self {
        self.similarity_top_k = k;
        self
    }

    /// Set the tree branch factor.
    #[must_use]
    pub fn with_child_branch_factor(mut self, factor: usize) -> Self {
        self.child_branch_factor = factor;
        self
    }

    /// Set the LLM override.
    #[must_use]
    pub fn with_llm_predictor(mut self, llm: Arc<dyn LlmPredictor>) -> Self {
        self.llm_predictor = Some(llm);
        self
    }

    /// Set the embedding model override.
    #[must_use]
    pub fn with_embed_model(mut self, embed_model: Arc<dyn Embedder>) -> Self {
        self.embed_model = Some(embed_model);
        self
    }

    /// Set the prompt budget override.
    #[must_use]
    pub fn with_prompt_helper(mut self, prompt_helper: PromptHelper) -> Self {
        self.prompt_helper = Some(prompt_helper);
        self
    }

    /// Set the keyword combination mode.
    #[must_use]
    pub fn with_keyword_match(mut self, keyword_match: KeywordMatch) -> Self {
        self.keyword_match = keyword_match;
        self
    }

    /// The runner's services with this config's overrides applied.
    pub fn resolve_services(&self, base: &ServiceContext) -> ServiceContext {
        let mut ctx = base.clone();
        if let Some(llm) = &self.llm_predictor {
            ctx = ctx.with_llm(Arc::clone(llm));
        }
        if let Some(embed_model) = &self.embed_model {
            ctx = ctx.with_embed_model(Arc::clone(embed_model));
        }
        if let Some(prompt_helper) = &self.prompt_helper {
            ctx = ctx.with_prompt_helper(prompt_helper.clone());
        }
        ctx
    }
}

/// Query settings for one struct type, or one index id.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Struct type the config applies to.
    pub index_struct_type: IndexStructType,
    /// Query mode.
    pub query_mode: QueryMode,
    /// When set, the config applies to this index id only.
    pub index_struct_id: Option<String>,
    /// Query arguments.
    pub query_kwargs: QueryKwargs,
    /// Transform override.
    pub query_transform: Option<Arc<dyn QueryTransform>>,
    /// Combiner override.
    pub query_combiner: Option<Arc<dyn QueryCombiner>>,
}

impl QueryConfig {
    /// Config for every index of `index_struct_type`.
    pub fn new(index_struct_type: IndexStructType, query_mode: QueryMode) -> Self {
        Self {
            index_struct_type,
            query_mode,
            index_struct_id: None,
            query_kwargs: QueryKwargs::default(),
            query_transform: None,
            query_combiner: None,
        }
    }

    /// The `default`-mode config used when nothing else matches.
    pub fn default_for(index_struct_type: IndexStructType) -> Self {
        Self::new(index_struct_type, QueryMode::Default)
    }

    /// Restrict to one index id.
    #[must_use]
    pub fn for_index(mut self, index_struct_id: impl Into<String>) -> Self {
        self.index_struct_id = Some(index_struct_id.into());
        self
    }

    /// Set the kwargs.
    #[must_use]
    pub fn with_kwargs(mut self, query_kwargs: QueryKwargs) -> Self {
        self.query_kwargs = query_kwargs;
        self
    }

    /// Set the transform override.
    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn QueryTransform>) -> Self {
        self.query_transform = Some(transform);
        self
    }

    /// Set the combiner override.
    #[must_use]
    pub fn with_combiner(mut self, combiner: Arc<dyn QueryCombiner>) -> Self {
        self.query_combiner = Some(combiner);
        self
    }
}

impl TryFrom<&RawQueryConfig> for QueryConfig {
    type Error = TrellisError;

    fn try_from(raw: &RawQueryConfig) -> Result<Self> {
        let index_struct_type = IndexStructType::from_str(raw.index_struct_type.trim()).map_err(|_| {
            TrellisError::configuration(format!(
                "unknown index struct type '{}'",
                raw.index_struct_type
            ))
        })?;
        let mode_tag = raw.query_mode.trim();
        let query_mode = if mode_tag.is_empty() {
            QueryMode::Default
        } else {
            QueryMode::from_str(mode_tag).map_err(|_| {
                TrellisError::configuration(format!("unknown query mode '{}'", raw.query_mode))
            })?
        };
        Ok(Self {
            index_struct_type,
            query_mode,
            index_struct_id: raw.index_struct_id.clone(),
            query_kwargs: QueryKwargs::from_json(&raw.query_kwargs)?,
            query_transform: None,
            query_combiner: None,
        })
    }
}

/// Query configs keyed for lookup.
///
/// Resolution order is the config for the index id, then the config for the struct
/// type, then a `default`-mode config. When two configs share a key the later one wins.
#[derive(Debug, Clone, Default)]
pub struct QueryConfigMap {
    by_id: HashMap<String, QueryConfig>,
    by_type: HashMap<IndexStructType, QueryConfig>,
}

impl QueryConfigMap {
    /// Index `configs` by id and by type.
    pub fn new(configs: impl IntoIterator<Item = QueryConfig>) -> Self {
        let mut map = Self::default();
        for config in configs {
            map.insert(config);
        }
        map
    }

    /// Add one config, replacing any with the same key.
    pub fn insert(&mut self, config: QueryConfig) {
        match config.index_struct_id.clone() {
            Some(id) => {
                self.by_id.insert(id, config);
            }
            None => {
                self.by_type.insert(config.index_struct_type, config);
            }
        }
    }

    /// The config that applies to `index_struct`.
    pub fn resolve(&self, index_struct: &IndexStruct) -> QueryConfig {
        if let Some(config) = self.by_id.get(index_struct.index_id()) {
            debug!(index_id = index_struct.index_id(), mode = %config.query_mode, "Using per-id query config");
            return config.clone();
        }
        let struct_type = index_struct.struct_type();
        if let Some(config) = self.by_type.get(&struct_type) {
            debug!(%struct_type, mode = %config.query_mode, "Using per-type query config");
            return config.clone();
        }
        QueryConfig::default_for(struct_type)
    }

    /// Every stored config.
    pub fn iter(&self) -> impl Iterator<Item = &QueryConfig> {
        self.by_id.values().chain(self.by_type.values())
    }

    /// Number of stored configs.
    pub fn len(&self) -> usize {
        self.by_id.len() + self.by_type.len()
    }

    /// Whether no config is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
