//! External service integrations for Trellis.
//!
//! This crate provides the concrete collaborators the query engine runs against:
//!
//! - [`SimpleVectorStore`]: an exact-scan in-memory vector store
//! - [`SiumaiPredictor`]: an LLM predictor over the siumai multi-provider client
//! - [`TiktokenTokenizer`]: BPE token counting for prompt budgeting
//! - [`mock`]: deterministic LLM and embedding stand-ins for tests and demos

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod llm;
pub mod mock;
pub mod tokenizer;
pub mod vector_stores;

// Re-export commonly used types
pub use llm::SiumaiPredictor;
pub use tokenizer::TiktokenTokenizer;
pub use vector_stores::SimpleVectorStore;
