//! LLM backend configuration.
//!
//! The predictor built from this lives in `trellis-integrations` and talks to the
//! provider through siumai.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};
use crate::traits::LlmMetadata;

/// Which provider and model answers prompts, and how large its window is.
///
/// # Examples
///
/// ```rust
/// use trellis_core::config::LlmConfig;
///
/// let config = LlmConfig::openai("gpt-4o-mini", "sk-test")
///     .with_temperature(0.0)
///     .with_context_window(128_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (`openai`, `anthropic`, `ollama`).
    pub provider: String,

    /// Model identifier.
    pub model: String,

    /// API key; not needed for local providers.
    pub api_key: Option<String>,

    /// Custom endpoint.
    pub base_url: Option<String>,

    /// Sampling temperature (0.0 to 2.0).
    pub temperature: Option<f32>,

    /// Context window in tokens.
    pub context_window: usize,

    /// Tokens reserved for each completion.
    pub num_output: usize,

    /// Per-request limit in seconds.
    pub timeout_seconds: Option<u64>,
}

impl LlmConfig {
    /// Create a configuration with the default 4096/256 window.
    pub fn new<S1: Into<String>, S2: Into<String>>(provider: S1, model: S2) -> Self {
        let window = LlmMetadata::default();
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            base_url: None,
            temperature: None,
            context_window: window.context_window,
            num_output: window.num_output,
            timeout_seconds: None,
        }
    }

    /// `OpenAI` model with a key.
    pub fn openai<S: Into<String>>(model: S, api_key: S) -> Self {
        Self::new("openai", model).with_api_key(api_key)
    }

    /// Anthropic model with a key.
    pub fn anthropic<S: Into<String>>(model: S, api_key: S) -> Self {
        Self::new("anthropic", model).with_api_key(api_key)
    }

    /// Ollama model on the default local port.
    pub fn ollama<S: Into<String>>(model: S) -> Self {
        Self::new("ollama", model).with_base_url("http://localhost:11434")
    }

    /// Set the API key.
    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the context window.
    #[must_use]
    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    /// Set the completion budget.
    #[must_use]
    pub fn with_num_output(mut self, num_output: usize) -> Self {
        self.num_output = num_output;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Whether the provider runs without credentials.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.provider.as_str(), "local" | "ollama")
    }

    /// Budget facts for the configured model.
    #[must_use]
    pub fn metadata(&self) -> LlmMetadata {
        LlmMetadata {
            context_window: self.context_window,
            num_output: self.num_output,
            is_chat_model: true,
            model_name: self.model.clone(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.provider.is_empty() {
            return Err(TrellisError::configuration("Provider cannot be empty"));
        }
        if self.model.is_empty() {
            return Err(TrellisError::configuration("Model cannot be empty"));
        }
        if !self.is_local() && self.api_key.is_none() {
            return Err(TrellisError::configuration(format!(
                "API key is required for provider: {}",
                self.provider
            )));
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(TrellisError::configuration(
                    "Temperature must be between 0.0 and 2.0",
                ));
            }
        }
        if self.num_output >= self.context_window {
            return Err(TrellisError::configuration(
                "num_output must be smaller than context_window",
            ));
        }
        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(TrellisError::configuration(
                    "Base URL must start with http:// or https://",
                ));
            }
        }
        Ok(())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::new("openai", "gpt-4o-mini")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_providers_need_no_key() {
        let config = LlmConfig::ollama("llama3");
        assert!(config.is_local());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        assert!(LlmConfig::new("", "model").validate().is_err());
        assert!(LlmConfig::new("openai", "").validate().is_err());
        assert!(LlmConfig::new("openai", "gpt-4").validate().is_err());
        assert!(LlmConfig::ollama("m").with_temperature(3.0).validate().is_err());
        assert!(LlmConfig::ollama("m").with_base_url("localhost").validate().is_err());
        assert!(LlmConfig::ollama("m").with_num_output(5000).validate().is_err());
    }

    #[test]
    fn test_metadata_reflects_window() {
        let metadata = LlmConfig::ollama("m").with_context_window(8192).metadata();
        assert_eq!(metadata.context_window, 8192);
        assert_eq!(metadata.num_output, 256);
        assert_eq!(metadata.model_name, "m");
    }
}
