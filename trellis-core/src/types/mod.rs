//! Core data types.

pub mod document;
pub mod index_struct;
pub mod node;
pub mod query;
pub mod relationships;

pub use document::Document;
pub use index_struct::{
    ColumnSchema, IndexGraph, IndexList, IndexStruct, IndexStructType, KeywordTable, StructTable,
    VectorIndexDict,
};
pub use node::{Node, NodeKind, ScoredNode};
pub use query::{QueryBundle, QueryInput, Response, StreamingResponse, TokenStream};
pub use relationships::{NodeRelationship, NodeRelationships};
