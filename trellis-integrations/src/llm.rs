//! siumai-backed LLM predictor.

use async_trait::async_trait;
use siumai::prelude::*;
use std::fmt;
use tracing::{debug, info, instrument, warn};

use trellis_core::config::LlmConfig;
use trellis_core::traits::{LlmMetadata, LlmPredictor};
use trellis_core::{Result, TrellisError};

/// Completes prompts through a siumai chat client.
///
/// Each prompt is sent as a single user message.
///
/// # Examples
///
/// ```rust,no_run
/// use trellis_core::config::LlmConfig;
/// use trellis_integrations::SiumaiPredictor;
///
/// # async fn example() -> trellis_core::Result<()> {
/// let config = LlmConfig::ollama("llama3.2");
/// let llm = SiumaiPredictor::from_config(&config).await?;
/// # let _ = llm;
/// # Ok(())
/// # }
/// ```
pub struct SiumaiPredictor {
    client: Siumai,
    metadata: LlmMetadata,
}

impl fmt::Debug for SiumaiPredictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiumaiPredictor")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl SiumaiPredictor {
    /// Wrap an existing client; `metadata` describes its model's budget.
    pub fn new(client: Siumai, metadata: LlmMetadata) -> Self {
        Self { client, metadata }
    }

    /// Build a client for the provider named in `config`.
    ///
    /// `openai` and `anthropic` need an API key; `ollama` defaults to a local server.
    pub async fn from_config(config: &LlmConfig) -> Result<Self> {
        config.validate()?;
        info!("Creating siumai client for provider: {}", config.provider);
        let max_tokens = u32::try_from(config.num_output).unwrap_or(u32::MAX);
        let temperature = config.temperature.unwrap_or(0.0);

        let client = match config.provider.to_lowercase().as_str() {
            "openai" => {
                let api_key = required_api_key(config, "OpenAI")?;
                let mut builder = Siumai::builder()
                    .openai()
                    .api_key(api_key)
                    .model(&config.model)
                    .temperature(temperature)
                    .max_tokens(max_tokens);
                if let Some(base_url) = &config.base_url {
                    builder = builder.base_url(base_url);
                }
                builder.build().await
            }
            "anthropic" => {
                let api_key = required_api_key(config, "Anthropic")?;
                let mut builder = Siumai::builder()
                    .anthropic()
                    .api_key(api_key)
                    .model(&config.model)
                    .temperature(temperature)
                    .max_tokens(max_tokens);
                if let Some(base_url) = &config.base_url {
                    builder = builder.base_url(base_url);
                }
                builder.build().await
            }
            "ollama" => {
                let base_url = config.base_url.as_deref().unwrap_or("http://localhost:11434");
                Siumai::builder()
                    .ollama()
                    .base_url(base_url)
                    .model(&config.model)
                    .temperature(temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .await
            }
            provider => {
                warn!("Unsupported LLM provider: {}", provider);
                return Err(TrellisError::configuration(format!(
                    "unsupported LLM provider '{provider}'"
                )));
            }
        }
        .map_err(|e| TrellisError::llm(format!("failed to create {} client: {e}", config.provider)))?;

        Ok(Self::new(client, config.metadata()))
    }
}

fn required_api_key<'a>(config: &'a LlmConfig, provider: &str) -> Result<&'a str> {
    config
        .api_key
        .as_deref()
        .ok_or_else(|| TrellisError::configuration(format!("{provider} requires an api_key")))
}

#[async_trait]
impl LlmPredictor for SiumaiPredictor {
    fn metadata(&self) -> LlmMetadata {
        self.metadata.clone()
    }

    #[instrument(skip_all, fields(model = %self.metadata.model_name, chars = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage::user(prompt).build()];
        let response = self
            .client
            .chat(messages)
            .await
            .map_err(|e| TrellisError::llm(format!("siumai chat failed: {e}")))?;
        match &response.content {
            siumai::MessageContent::Text(text) => {
                debug!("Completed prompt with {} characters", text.len());
                Ok(text.clone())
            }
            _ => Err(TrellisError::llm("unsupported content type in LLM response")),
        }
    }
}
