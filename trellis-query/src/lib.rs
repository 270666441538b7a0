//! Query execution for Trellis indices.
//!
//! This crate turns a question and an index struct into a [`Response`](trellis_core::Response):
//!
//! - **Registry**: an explicit (struct type, query mode) → retriever table
//! - **Runner**: config resolution, transforms, combiners and recursive queries
//! - **Retrievers**: tree, list, keyword table, vector and struct-store retrieval
//! - **Synthesis**: budget-aware response synthesis over retrieved nodes
//! - **Graphs**: composable graphs of indices and their query engine
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trellis_core::prelude::*;
//! use trellis_query::prelude::*;
//!
//! # async fn example(service_context: ServiceContext) -> Result<()> {
//! let docstore = Arc::new(DocumentStore::new());
//! let index = IndexBuilder::new(Arc::clone(&docstore)).list([
//!     Node::new("Rust 1.0 shipped in May 2015."),
//!     Node::new("Cargo is the Rust package manager."),
//! ])?;
//!
//! let runner = QueryRunner::builder(service_context, docstore).build()?;
//! let response = runner.query("When did Rust 1.0 ship?", &index).await?;
//! println!("{response}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! QueryRunner → QueryConfig → QueryRegistry → IndexQueryObject
//!                                                ↓
//!                       Retriever → Postprocessors → (nested queries) → ResponseSynthesizer
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod combiners;
pub mod graph;
pub mod indices;
pub mod keywords;
pub mod postprocessor;
pub mod query;
pub mod query_config;
pub mod recursion;
pub mod registry;
pub mod retrievers;
pub mod runner;
pub mod synthesizer;
pub mod transforms;

/// Re-export commonly used types and traits.
pub mod prelude {
    pub use crate::combiners::{
        MultiStepQueryCombiner, QueryCombiner, SingleQueryCombiner, default_query_combiner,
    };
    pub use crate::graph::{ComposableGraph, ComposableGraphQueryEngine, GraphQueryEngineBuilder};
    pub use crate::indices::IndexBuilder;
    pub use crate::keywords::{RakeKeywordExtractor, SimpleKeywordExtractor};
    pub use crate::postprocessor::{KeywordNodePostprocessor, SimilarityPostprocessor};
    pub use crate::query::{IndexQuery, IndexQueryObject};
    pub use crate::query_config::{KeywordMatch, QueryConfig, QueryKwargs, QueryMode};
    pub use crate::recursion::{NestedQueryRunner, QueryContext};
    pub use crate::registry::{IndexSources, QueryArgs, QueryRegistration, QueryRegistry};
    pub use crate::runner::{QueryRunner, QueryRunnerBuilder};
    pub use crate::synthesizer::{ResponseMode, ResponseSynthesizer};
    pub use crate::transforms::{
        DecomposeQueryTransform, HydeQueryTransform, IdentityQueryTransform, QueryTransform,
        StepDecomposeQueryTransform, TransformContext,
    };
}
