//! Collaborator traits consumed by the query engine.
//!
//! Each external service (LLM, embedding model, vector store, structured source) and
//! each injected capability (tokenizer, stopwords, keyword extraction) sits behind one
//! trait, so concrete backends plug in without touching orchestration code.

pub mod embedder;
pub mod keyword;
pub mod llm;
pub mod postprocessor;
pub mod retriever;
pub mod structured;
pub mod tokenizer;
pub mod vector_store;

pub use embedder::{Embedder, SimilarityMode, mean_embedding, similarity, top_k_similar};
pub use keyword::{EnglishStopwords, KeywordExtractionConfig, KeywordExtractor, Stopwords};
pub use llm::{LlmMetadata, LlmPredictor};
pub use postprocessor::NodePostprocessor;
pub use retriever::Retriever;
pub use structured::{StructuredDataSource, TableResult};
pub use tokenizer::{Tokenizer, WhitespaceTokenizer};
pub use vector_store::{
    ExactMatchFilter, MetadataFilters, VectorStore, VectorStoreQuery, VectorStoreQueryResult,
};
