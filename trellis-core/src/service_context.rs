//! The services a query runs against.
//!
//! A [`ServiceContext`] bundles the LLM, the embedding model, the prompt budget and the
//! tokenizer, and wraps every call out to the LLM or embedding model in the configured
//! timeout. It is passed explicitly; there is no process-global default.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::TrellisConfig;
use crate::error::{Result, TrellisError};
use crate::prompt_helper::PromptHelper;
use crate::prompts::{PromptTemplate, PromptVars};
use crate::traits::{Embedder, LlmPredictor, Tokenizer, WhitespaceTokenizer};
use crate::types::TokenStream;
use crate::utils::with_timeout;

/// LLM, embedding model, prompt budget and tokenizer for one query.
#[derive(Clone)]
pub struct ServiceContext {
    llm: Arc<dyn LlmPredictor>,
    embed_model: Arc<dyn Embedder>,
    prompt_helper: PromptHelper,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("llm", &self.llm.name())
            .field("embed_model", &self.embed_model.model_name())
            .field("max_input_size", &self.prompt_helper.max_input_size())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ServiceContext {
    /// Start building a context.
    pub fn builder() -> ServiceContextBuilder {
        ServiceContextBuilder::default()
    }

    /// Build from configuration around the given services.
    pub fn from_config(
        config: &TrellisConfig,
        llm: Arc<dyn LlmPredictor>,
        embed_model: Arc<dyn Embedder>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        Self::builder()
            .llm(llm)
            .embed_model(embed_model)
            .prompt_helper(PromptHelper::from_config(&config.prompt_helper, tokenizer))
            .request_timeout(config.query.timeout())
            .build()
    }

    /// The language model.
    pub fn llm(&self) -> &Arc<dyn LlmPredictor> {
        &self.llm
    }

    /// The embedding model.
    pub fn embed_model(&self) -> &Arc<dyn Embedder> {
        &self.embed_model
    }

    /// The prompt budget.
    pub fn prompt_helper(&self) -> &PromptHelper {
        &self.prompt_helper
    }

    /// The tokenizer behind the prompt budget.
    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        self.prompt_helper.tokenizer()
    }

    /// Limit applied to external calls.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Same context with another LLM.
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LlmPredictor>) -> Self {
        self.llm = llm;
        self
    }

    /// Same context with another embedding model.
    #[must_use]
    pub fn with_embed_model(mut self, embed_model: Arc<dyn Embedder>) -> Self {
        self.embed_model = embed_model;
        self
    }

    /// Same context with another prompt budget.
    #[must_use]
    pub fn with_prompt_helper(mut self, prompt_helper: PromptHelper) -> Self {
        self.prompt_helper = prompt_helper;
        self
    }

    /// Render `prompt` and complete it.
    pub async fn predict(&self, prompt: &PromptTemplate, vars: &PromptVars) -> Result<String> {
        with_timeout(self.request_timeout, "llm.predict", self.llm.predict(prompt, vars))
            .await
            .map_err(|e| e.in_stage("llm"))
    }

    /// Render `prompt` and stream its completion.
    pub async fn stream(&self, prompt: &PromptTemplate, vars: &PromptVars) -> Result<TokenStream> {
        with_timeout(self.request_timeout, "llm.stream", self.llm.stream(prompt, vars))
            .await
            .map_err(|e| e.in_stage("llm"))
    }

    /// Embed a query string.
    pub async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        with_timeout(
            self.request_timeout,
            "embedding.query",
            self.embed_model.get_query_embedding(query),
        )
        .await
        .map_err(|e| e.in_stage("embedding"))
    }

    /// Mean embedding over several query strings.
    pub async fn agg_query_embedding(&self, queries: &[String]) -> Result<Vec<f32>> {
        with_timeout(
            self.request_timeout,
            "embedding.query",
            self.embed_model.get_agg_embedding_from_queries(queries),
        )
        .await
        .map_err(|e| e.in_stage("embedding"))
    }

    /// Embed a batch of texts.
    pub async fn text_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        with_timeout(
            self.request_timeout,
            "embedding.text",
            self.embed_model.get_text_embeddings(texts),
        )
        .await
        .map_err(|e| e.in_stage("embedding"))
    }
}

/// Builder for [`ServiceContext`].
#[derive(Default)]
pub struct ServiceContextBuilder {
    llm: Option<Arc<dyn LlmPredictor>>,
    embed_model: Option<Arc<dyn Embedder>>,
    prompt_helper: Option<PromptHelper>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    max_chunk_overlap: Option<usize>,
    request_timeout: Option<Duration>,
}

impl ServiceContextBuilder {
    /// Set the language model.
    #[must_use]
    pub fn llm(mut self, llm: Arc<dyn LlmPredictor>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the embedding model.
    #[must_use]
    pub fn embed_model(mut self, embed_model: Arc<dyn Embedder>) -> Self {
        self.embed_model = Some(embed_model);
        self
    }

    /// Set the prompt budget explicitly.
    #[must_use]
    pub fn prompt_helper(mut self, prompt_helper: PromptHelper) -> Self {
        self.prompt_helper = Some(prompt_helper);
        self
    }

    /// Tokenizer for a budget derived from the LLM's metadata.
    #[must_use]
    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Overlap budget for a budget derived from the LLM's metadata.
    #[must_use]
    pub fn max_chunk_overlap(mut self, overlap: usize) -> Self {
        self.max_chunk_overlap = Some(overlap);
        self
    }

    /// Limit for every external call.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the context.
    ///
    /// Without an explicit prompt helper, one is sized from the LLM's metadata using the
    /// configured tokenizer (whitespace if none).
    pub fn build(self) -> Result<ServiceContext> {
        let llm = self
            .llm
            .ok_or_else(|| TrellisError::configuration("service context requires an LLM"))?;
        let embed_model = self.embed_model.ok_or_else(|| {
            TrellisError::configuration("service context requires an embedding model")
        })?;
        let prompt_helper = match self.prompt_helper {
            Some(helper) => helper,
            None => PromptHelper::from_llm_metadata(
                &llm.metadata(),
                self.max_chunk_overlap.unwrap_or(20),
                self.tokenizer.unwrap_or_else(WhitespaceTokenizer::shared),
            ),
        };
        debug!(
            llm = llm.name(),
            embed_model = embed_model.model_name(),
            max_input_size = prompt_helper.max_input_size(),
            "Built service context"
        );
        Ok(ServiceContext {
            llm,
            embed_model,
            prompt_helper,
            request_timeout: self.request_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LlmMetadata;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct SlowLlm;

    #[async_trait]
    impl LlmPredictor for SlowLlm {
        fn metadata(&self) -> LlmMetadata {
            LlmMetadata {
                context_window: 2048,
                ..LlmMetadata::default()
            }
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    #[derive(Debug)]
    struct ZeroEmbedder;

    #[async_trait]
    impl Embedder for ZeroEmbedder {
        async fn get_query_embedding(&self, _query: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 2])
        }

        async fn get_text_embedding(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 2])
        }

        fn model_name(&self) -> &str {
            "zero"
        }
    }

    #[test]
    fn test_build_requires_services() {
        let err = ServiceContext::builder().build().unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
        let err = ServiceContext::builder()
            .llm(Arc::new(SlowLlm))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("embedding model"));
    }

    #[test]
    fn test_prompt_helper_sized_from_llm() {
        let ctx = ServiceContext::builder()
            .llm(Arc::new(SlowLlm))
            .embed_model(Arc::new(ZeroEmbedder))
            .build()
            .unwrap();
        assert_eq!(ctx.prompt_helper().max_input_size(), 2048);
        assert_eq!(ctx.prompt_helper().num_output(), 256);
    }

    #[tokio::test]
    async fn test_llm_calls_are_bounded() {
        let ctx = ServiceContext::builder()
            .llm(Arc::new(SlowLlm))
            .embed_model(Arc::new(ZeroEmbedder))
            .request_timeout(Some(Duration::from_millis(10)))
            .build()
            .unwrap();
        let prompt = PromptTemplate::new("{query_str}", crate::prompts::PromptType::SimpleInput);
        let vars = crate::prompts::prompt_vars([("query_str", "hi")]);
        let err = ctx.predict(&prompt, &vars).await.unwrap_err();
        assert!(matches!(err.root_cause(), TrellisError::Timeout { .. }));
    }
}
