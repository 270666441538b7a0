//! Query transforms.
//!
//! A transform rewrites the incoming query into the [`QueryBundle`] that retrieval and
//! synthesis see. Transforms never modify their input; they return a new bundle.

use async_trait::async_trait;
use tracing::{debug, info};

use trellis_core::prompts::{PromptTemplate, PromptType, default_prompt, prompt_vars, step_decompose_prompt};
use trellis_core::{IndexStruct, QueryBundle, QueryInput, Result, ServiceContext};

/// Extra information a transform may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformContext {
    /// Summary of the index about to be queried.
    pub index_summary: Option<String>,
    /// Reasoning accumulated by earlier steps of a multi-step query.
    pub prev_reasoning: Option<String>,
}

impl TransformContext {
    /// Context describing `index_struct`.
    pub fn for_index(index_struct: &IndexStruct) -> Self {
        Self {
            index_summary: index_struct.summary().map(str::to_string),
            prev_reasoning: None,
        }
    }

    /// Attach previous reasoning.
    #[must_use]
    pub fn with_prev_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.prev_reasoning = Some(reasoning.into());
        self
    }

    fn summary_or_none(&self) -> &str {
        self.index_summary.as_deref().unwrap_or("None")
    }
}

/// Rewrites a query before retrieval.
#[async_trait]
pub trait QueryTransform: Send + Sync + std::fmt::Debug {
    /// Produce the bundle to run.
    async fn run(&self, query: QueryInput, context: &TransformContext) -> Result<QueryBundle>;

    /// Get a human-readable name for this transform.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Leaves the query as it is.
///
/// A plain string becomes a bundle whose only embedding string is the query itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityQueryTransform;

#[async_trait]
impl QueryTransform for IdentityQueryTransform {
    async fn run(&self, query: QueryInput, _context: &TransformContext) -> Result<QueryBundle> {
        Ok(query.into_bundle())
    }
}

/// Hypothetical document embeddings.
///
/// The LLM writes a passage answering the query; the passage becomes the first
/// embedding string, optionally followed by the original ones.
#[derive(Debug, Clone)]
pub struct HydeQueryTransform {
    service_context: ServiceContext,
    prompt: PromptTemplate,
    include_original: bool,
}

impl HydeQueryTransform {
    /// Create the transform.
    pub fn new(service_context: ServiceContext) -> Self {
        Self {
            service_context,
            prompt: default_prompt(PromptType::Hyde),
            include_original: true,
        }
    }

    /// Keep the original embedding strings after the hypothetical passage.
    #[must_use]
    pub fn with_include_original(mut self, include: bool) -> Self {
        self.include_original = include;
        self
    }

    /// Replace the passage prompt. Variable: `context_str` (the query).
    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }
}

#[async_trait]
impl QueryTransform for HydeQueryTransform {
    async fn run(&self, query: QueryInput, _context: &TransformContext) -> Result<QueryBundle> {
        let bundle = query.into_bundle();
        let passage = self
            .service_context
            .predict(
                &self.prompt,
                &prompt_vars([("context_str", bundle.query_str.as_str())]),
            )
            .await?;
        debug!(chars = passage.len(), "Generated hypothetical document");
        let mut strs = vec![passage];
        if self.include_original {
            strs.extend(bundle.embedding_strs());
        }
        Ok(QueryBundle::new(bundle.query_str).with_embedding_strs(strs))
    }
}

/// Rewrites the query into a sub-question the target index can answer.
#[derive(Debug, Clone)]
pub struct DecomposeQueryTransform {
    service_context: ServiceContext,
    prompt: PromptTemplate,
    verbose: bool,
}

impl DecomposeQueryTransform {
    /// Create the transform.
    pub fn new(service_context: ServiceContext) -> Self {
        Self {
            service_context,
            prompt: default_prompt(PromptType::Decompose),
            verbose: false,
        }
    }

    /// Log the rewritten query.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[async_trait]
impl QueryTransform for DecomposeQueryTransform {
    async fn run(&self, query: QueryInput, context: &TransformContext) -> Result<QueryBundle> {
        let original = query.into_bundle();
        let vars = prompt_vars([
            ("query_str", original.query_str.as_str()),
            ("context_str", context.summary_or_none()),
        ]);
        let new_query = self.service_context.predict(&self.prompt, &vars).await?;
        let new_query = new_query.trim().to_string();
        if self.verbose {
            info!(query = %new_query, "Transformed query");
        }
        Ok(QueryBundle::new(new_query.clone()).with_embedding_strs(vec![new_query]))
    }
}

/// Produces the next sub-question of a multi-step query from the reasoning so far.
///
/// An answer of `None` means no further step is needed; see [`is_stop_answer`].
#[derive(Debug, Clone)]
pub struct StepDecomposeQueryTransform {
    service_context: ServiceContext,
    prompt: PromptTemplate,
    verbose: bool,
}

impl StepDecomposeQueryTransform {
    /// Create the transform.
    pub fn new(service_context: ServiceContext) -> Self {
        Self {
            service_context,
            prompt: step_decompose_prompt(),
            verbose: false,
        }
    }

    /// Log each sub-question.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[async_trait]
impl QueryTransform for StepDecomposeQueryTransform {
    async fn run(&self, query: QueryInput, context: &TransformContext) -> Result<QueryBundle> {
        let original = query.into_bundle();
        let vars = prompt_vars([
            ("query_str", original.query_str.as_str()),
            ("context_str", context.summary_or_none()),
            (
                "prev_reasoning",
                context.prev_reasoning.as_deref().unwrap_or("None"),
            ),
        ]);
        let next = self.service_context.predict(&self.prompt, &vars).await?;
        let next = next.trim().to_string();
        if self.verbose {
            info!(query = %next, "Next sub-question");
        }
        Ok(QueryBundle::new(next.clone()).with_embedding_strs(vec![next]))
    }
}

/// Whether a decomposition answer signals that no further question is needed.
pub fn is_stop_answer(query_str: &str) -> bool {
    let trimmed = query_str.trim().trim_end_matches('.');
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none")
}
