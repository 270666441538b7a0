//! Prelude module for convenient imports.
//!
//! ```rust
//! use trellis_core::prelude::*;
//!
//! let node = Node::new("Hello, world!");
//! let bundle = QueryInput::from("What is this about?").into_bundle();
//! assert_eq!(bundle.embedding_strs(), vec!["What is this about?".to_string()]);
//! # let _ = node;
//! ```

pub use crate::error::{Result, TrellisError};

pub use crate::types::{
    ColumnSchema, Document, IndexGraph, IndexList, IndexStruct, IndexStructType, KeywordTable,
    Node, NodeKind, NodeRelationship, NodeRelationships, QueryBundle, QueryInput, Response,
    ScoredNode, StreamingResponse, StructTable, TokenStream, VectorIndexDict,
};

pub use crate::traits::{
    Embedder, EnglishStopwords, KeywordExtractionConfig, KeywordExtractor, LlmMetadata,
    LlmPredictor, MetadataFilters, NodePostprocessor, Retriever, SimilarityMode, Stopwords, StructuredDataSource,
    TableResult, Tokenizer, VectorStore, VectorStoreQuery, VectorStoreQueryResult,
    WhitespaceTokenizer,
};

pub use crate::config::{LoggingConfig, PromptHelperConfig, QuerySettings, TrellisConfig};
pub use crate::docstore::{AddOptions, DocumentStore, StoreEntry, TypeRegistry};
pub use crate::prompt_helper::PromptHelper;
pub use crate::prompts::{PromptTemplate, PromptType, PromptVars, prompt_vars};
pub use crate::service_context::ServiceContext;
pub use crate::text_splitter::TokenTextSplitter;
