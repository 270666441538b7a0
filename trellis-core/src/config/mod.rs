//! Configuration for the Trellis query engine.
//!
//! [`TrellisConfig`] gathers every knob the engine reads: the prompt budget, query
//! execution settings, per-index query configs, the LLM backend and logging. It is
//! loaded from a file layered under `TRELLIS__`-prefixed environment variables, or
//! parsed directly from JSON or TOML text.
//!
//! ```toml
//! [prompt_helper]
//! max_input_size = 4096
//! num_output = 256
//!
//! [query]
//! max_depth = 8
//!
//! [[query_configs]]
//! index_struct_type = "keyword_table"
//! query_mode = "rake"
//! ```

pub mod llm;

pub use llm::LlmConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TrellisError};

/// Environment variable prefix for overrides, e.g. `TRELLIS__QUERY__MAX_DEPTH=4`.
pub const ENV_PREFIX: &str = "TRELLIS";

/// Separator between nested keys in environment overrides.
pub const ENV_SEPARATOR: &str = "__";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    /// Context-window budget.
    pub prompt_helper: PromptHelperConfig,
    /// Query execution settings.
    pub query: QuerySettings,
    /// Per-index query configs, resolved by id then by struct type.
    pub query_configs: Vec<RawQueryConfig>,
    /// LLM backend, if one is configured.
    pub llm: Option<LlmConfig>,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl TrellisConfig {
    /// Load from an optional file, then apply environment overrides.
    ///
    /// The file format is inferred from its extension.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );
        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let loaded: Self = serde_json::from_str(json)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let loaded: Self = toml::from_str(text)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.prompt_helper.validate()?;
        self.query.validate()?;
        for raw in &self.query_configs {
            if raw.index_struct_type.trim().is_empty() {
                return Err(TrellisError::configuration(
                    "query config is missing index_struct_type",
                ));
            }
        }
        if let Some(llm) = &self.llm {
            llm.validate()?;
        }
        Ok(())
    }
}

/// Context-window budget settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptHelperConfig {
    /// Total context window in tokens.
    pub max_input_size: usize,
    /// Tokens reserved for the completion.
    pub num_output: usize,
    /// Overlap budget shared by the chunks of one call.
    pub max_chunk_overlap: usize,
    /// Upper bound on chunk size imposed by the embedding model.
    pub embedding_limit: Option<usize>,
    /// Upper bound on chunk size chosen by the user.
    pub chunk_size_limit: Option<usize>,
    /// Separator used when splitting text.
    pub separator: String,
}

impl Default for PromptHelperConfig {
    fn default() -> Self {
        Self {
            max_input_size: 4096,
            num_output: 256,
            max_chunk_overlap: 20,
            embedding_limit: None,
            chunk_size_limit: None,
            separator: " ".to_string(),
        }
    }
}

impl PromptHelperConfig {
    fn validate(&self) -> Result<()> {
        if self.num_output >= self.max_input_size {
            return Err(TrellisError::configuration(format!(
                "num_output ({}) must be smaller than max_input_size ({})",
                self.num_output, self.max_input_size
            )));
        }
        if self.embedding_limit == Some(0) || self.chunk_size_limit == Some(0) {
            return Err(TrellisError::configuration("chunk limits must be positive"));
        }
        Ok(())
    }
}

/// Query execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Follow index nodes into the indices they reference.
    pub recursive: bool,
    /// Use the concurrent query path.
    pub use_async: bool,
    /// Deepest nesting level a recursive query may reach.
    pub max_depth: usize,
    /// Limit for every external call, in seconds. `None` disables the limit.
    pub timeout_secs: Option<u64>,
    /// Log intermediate prompts and answers at info level.
    pub verbose: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            recursive: false,
            use_async: false,
            max_depth: 32,
            timeout_secs: Some(60),
            verbose: false,
        }
    }
}

impl QuerySettings {
    /// The external-call limit as a duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(TrellisError::configuration("max_depth must be at least 1"));
        }
        if self.timeout_secs == Some(0) {
            return Err(TrellisError::configuration("timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// A query config as written in configuration, before its tags are checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawQueryConfig {
    /// Index struct type tag, e.g. `tree` or `keyword_table`.
    pub index_struct_type: String,
    /// Query mode tag. Empty means `default`.
    pub query_mode: String,
    /// Restrict the config to one index.
    pub index_struct_id: Option<String>,
    /// Extra query arguments.
    pub query_kwargs: serde_json::Map<String, serde_json::Value>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
