//! # Trellis Core
//!
//! Core types, collaborator traits and storage for the Trellis query engine.
//!
//! This crate provides the pieces every query mode shares:
//!
//! - **Data structures**: [`Node`], [`Document`], index structs, [`QueryBundle`] and [`Response`]
//! - **Collaborator traits**: LLM predictor, embedder, vector store, retriever, tokenizer,
//!   stopwords, keyword extraction and structured data sources
//! - **Document store**: id-keyed storage with `__type__`-tagged persistence
//! - **Prompt budgeting**: [`PromptHelper`] and the default prompt templates
//! - **Configuration**: [`TrellisConfig`], loaded from files and environment
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis_core::prelude::*;
//!
//! # fn main() -> trellis_core::Result<()> {
//! let store = DocumentStore::new();
//! let id = store.insert(Node::new("Rust has no garbage collector"))?;
//! assert!(store.document_exists(&id)?);
//!
//! let helper = PromptHelper::new(4096, 256, 20, WhitespaceTokenizer::shared());
//! assert_eq!(helper.chunk_size_for_prompt_tokens(50, 2, 1)?, 1894);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude;

pub mod config;
pub mod docstore;
pub mod error;
pub mod prompt_helper;
pub mod prompts;
pub mod service_context;
pub mod text_splitter;
pub mod traits;
pub mod types;
pub mod utils;

pub use config::TrellisConfig;
pub use docstore::{AddOptions, DocumentStore, StoreEntry, TypeRegistry};
pub use error::{Result, TrellisError};
pub use prompt_helper::PromptHelper;
pub use service_context::{ServiceContext, ServiceContextBuilder};
pub use types::{
    ColumnSchema, Document, IndexGraph, IndexList, IndexStruct, IndexStructType, KeywordTable,
    Node, NodeKind, NodeRelationship, NodeRelationships, QueryBundle, QueryInput, Response,
    ScoredNode, StreamingResponse, StructTable, VectorIndexDict,
};

pub use traits::*;

/// Version information for the Trellis core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the Trellis core library.
pub const NAME: &str = env!("CARGO_PKG_NAME");
