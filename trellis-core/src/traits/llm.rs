//! Language model predictor trait.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::prompts::{PromptTemplate, PromptVars};
use crate::types::TokenStream;

/// Budget-relevant facts about a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMetadata {
    /// Total context window in tokens.
    pub context_window: usize,
    /// Tokens reserved for the completion.
    pub num_output: usize,
    /// Whether the model is chat-style.
    pub is_chat_model: bool,
    /// Model identifier.
    pub model_name: String,
}

impl Default for LlmMetadata {
    fn default() -> Self {
        Self {
            context_window: 4096,
            num_output: 256,
            is_chat_model: false,
            model_name: "unknown".to_string(),
        }
    }
}

/// Completes prompts with a language model.
///
/// Implementors provide [`complete`](LlmPredictor::complete); template rendering and the
/// single-chunk streaming fallback come for free.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use trellis_core::traits::{LlmMetadata, LlmPredictor};
/// use trellis_core::Result;
///
/// #[derive(Debug)]
/// struct Echo;
///
/// #[async_trait]
/// impl LlmPredictor for Echo {
///     fn metadata(&self) -> LlmMetadata {
///         LlmMetadata::default()
///     }
///
///     async fn complete(&self, prompt: &str) -> Result<String> {
///         Ok(prompt.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait LlmPredictor: Send + Sync + std::fmt::Debug {
    /// Context window and output budget of the model.
    fn metadata(&self) -> LlmMetadata;

    /// Complete a fully rendered prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Stream a completion. Defaults to one chunk holding the whole answer.
    async fn stream_complete(&self, prompt: &str) -> Result<TokenStream> {
        let text = self.complete(prompt).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }

    /// Render `prompt` with `vars` and complete it.
    async fn predict(&self, prompt: &PromptTemplate, vars: &PromptVars) -> Result<String> {
        let rendered = prompt.format(vars)?;
        debug!(
            prompt_type = %prompt.prompt_type(),
            chars = rendered.len(),
            "Calling LLM"
        );
        self.complete(&rendered).await
    }

    /// Render `prompt` with `vars` and stream the completion.
    async fn stream(&self, prompt: &PromptTemplate, vars: &PromptVars) -> Result<TokenStream> {
        let rendered = prompt.format(vars)?;
        self.stream_complete(&rendered).await
    }

    /// Get a human-readable name for this predictor.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
