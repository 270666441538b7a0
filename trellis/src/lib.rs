//! # Trellis
//!
//! Trellis answers questions over composable LLM indices: trees, lists, keyword
//! tables, vector and struct-store indices, and graphs built from them. Queries are
//! routed through an explicit registry, resolve nested indices recursively and
//! synthesize answers within the model's context window.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis::prelude::*;
//! use trellis::integrations::mock::{MockEmbedder, MockLlmPredictor};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let service_context = ServiceContext::builder()
//!     .llm(Arc::new(MockLlmPredictor::with_responses(["Ferris."])))
//!     .embed_model(Arc::new(MockEmbedder::new(32)))
//!     .build()?;
//! let docstore = Arc::new(DocumentStore::new());
//! let index = IndexBuilder::new(Arc::clone(&docstore))
//!     .list([Node::new("Ferris is the Rust mascot.")])?;
//!
//! let runner = QueryRunner::builder(service_context, docstore).build()?;
//! let response = runner.query("Who is the Rust mascot?", &index).await?;
//! assert_eq!(response.to_string(), "Ferris.");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **trellis-core**: data model, document store, collaborator traits, prompts and config
//! - **trellis-query**: registry, runner, retrievers, synthesis and composable graphs
//! - **trellis-integrations**: in-memory vector store, siumai LLM, tiktoken tokenizer, mocks

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use tracing_subscriber::EnvFilter;

// Re-export all public APIs from sub-crates
pub use trellis_core as core;
pub use trellis_integrations as integrations;
pub use trellis_query as query;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and traits
/// from all Trellis crates.
pub mod prelude {
    pub use trellis_core::prelude::*;
    pub use trellis_integrations::{SimpleVectorStore, SiumaiPredictor, TiktokenTokenizer};
    pub use trellis_query::prelude::*;
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`, falling back to `filter`.
///
/// Calling it again after a subscriber is installed does nothing.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

/// Version information for the Trellis framework.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
