//! Error types for the Trellis query engine.
//!
//! Errors fall into three families: configuration errors (unknown struct/mode pairs,
//! missing services, recursion guards), data errors (absent or duplicate ids) and
//! external-call errors (LLM, embedding, vector store, structured data sources).

use thiserror::Error;

/// Core error type for Trellis.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// I/O related errors (config files, persisted stores)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration validation errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Detailed error message
        message: String,
    },

    /// Input validation errors
    #[error("Validation error: {message}")]
    Validation {
        /// Detailed error message
        message: String,
    },

    /// No query constructor is registered for a struct type and mode.
    #[error("Configuration error: no query registered for index struct type '{struct_type}' with mode '{mode}'")]
    UnknownQueryMode {
        /// Index struct type tag
        struct_type: String,
        /// Query mode tag
        mode: String,
    },

    /// A stored entry carries a type tag the registry does not know.
    #[error("Configuration error: type tag '{type_tag}' not found in type registry")]
    UnknownType {
        /// The offending `__type__` value
        type_tag: String,
    },

    /// Resource not found errors
    #[error("Not found: {resource}")]
    NotFound {
        /// Name of the missing resource
        resource: String,
    },

    /// An insert collided with an existing id and overwriting was not allowed.
    #[error("Duplicate id: {id}")]
    DuplicateId {
        /// The colliding id
        id: String,
    },

    /// A nested query tried to re-enter an index that is already being queried.
    #[error("Configuration error: cycle detected at index '{index_id}' (path: {})", .path.join(" -> "))]
    CycleDetected {
        /// The index id that closed the cycle
        index_id: String,
        /// Index ids from the root down to the offending descent
        path: Vec<String>,
    },

    /// A nested query went deeper than the configured limit.
    #[error("Configuration error: max depth {max_depth} exceeded at index '{index_id}'")]
    MaxDepthExceeded {
        /// The configured limit
        max_depth: usize,
        /// The index id that would have exceeded it
        index_id: String,
    },

    /// LLM/Response generation errors
    #[error("LLM error: {message}")]
    Llm {
        /// Detailed error message
        message: String,
    },

    /// Embedding generation errors
    #[error("Embedding error: {message}")]
    Embedding {
        /// Detailed error message
        message: String,
    },

    /// Vector store operation errors
    #[error("Vector store error: {message}")]
    VectorStore {
        /// Detailed error message
        message: String,
    },

    /// Structured (SQL/dataframe) source errors
    #[error("Structured query error: {message}")]
    StructuredQuery {
        /// Detailed error message
        message: String,
    },

    /// Operation timeout errors
    #[error("Timeout: {operation}")]
    Timeout {
        /// Name of the operation that timed out
        operation: String,
    },

    /// An error raised inside a named query stage.
    #[error("{stage} failed: {source}")]
    Stage {
        /// Stage name, e.g. `retrieve` or `synthesize`
        stage: String,
        /// The underlying error
        #[source]
        source: Box<TrellisError>,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Detailed error message
        message: String,
    },

    /// Generic errors from external dependencies
    #[error("External error: {source}")]
    External {
        /// The underlying error
        #[source]
        source: anyhow::Error,
    },
}

impl TrellisError {
    /// Create a new configuration error with a message.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new validation error with a message.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new not found error with a resource name.
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a new LLM error with a message.
    pub fn llm<S: Into<String>>(message: S) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create a new embedding error with a message.
    pub fn embedding<S: Into<String>>(message: S) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a new vector store error with a message.
    pub fn vector_store<S: Into<String>>(message: S) -> Self {
        Self::VectorStore {
            message: message.into(),
        }
    }

    /// Create a new structured query error with a message.
    pub fn structured_query<S: Into<String>>(message: S) -> Self {
        Self::StructuredQuery {
            message: message.into(),
        }
    }

    /// Create a new timeout error with an operation name.
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a new internal error with a message.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap this error with the name of the query stage that produced it.
    #[must_use]
    pub fn in_stage<S: Into<String>>(self, stage: S) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Create a new external error from any error that implements `Into<anyhow::Error>`.
    pub fn external<E: Into<anyhow::Error>>(error: E) -> Self {
        Self::External {
            source: error.into(),
        }
    }

    /// Strip any [`TrellisError::Stage`] wrappers.
    pub fn root_cause(&self) -> &TrellisError {
        match self {
            Self::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only external-call failures are; configuration and data errors never are.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Stage { source, .. } => source.is_retryable(),
            other => matches!(
                other,
                Self::Timeout { .. }
                    | Self::Llm { .. }
                    | Self::Embedding { .. }
                    | Self::VectorStore { .. }
                    | Self::Io(_)
            ),
        }
    }

    /// Check if this error is caused by the caller's input or configuration.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Stage { source, .. } => source.is_client_error(),
            other => matches!(
                other,
                Self::Validation { .. }
                    | Self::Configuration { .. }
                    | Self::UnknownQueryMode { .. }
                    | Self::UnknownType { .. }
                    | Self::NotFound { .. }
                    | Self::DuplicateId { .. }
                    | Self::CycleDetected { .. }
                    | Self::MaxDepthExceeded { .. }
            ),
        }
    }
}

/// Convert from `anyhow::Error` to `TrellisError`.
impl From<anyhow::Error> for TrellisError {
    fn from(error: anyhow::Error) -> Self {
        Self::External { source: error }
    }
}

impl From<config::ConfigError> for TrellisError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(error.to_string())
    }
}

impl From<toml::de::Error> for TrellisError {
    fn from(error: toml::de::Error) -> Self {
        Self::configuration(error.to_string())
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, TrellisError>;
