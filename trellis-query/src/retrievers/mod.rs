//! Retrievers, one family per index struct type.
//!
//! A retriever returns ranked nodes from a single index struct. Index nodes come back
//! untouched; resolving them is left to the query object that owns the retriever.

pub mod keyword_table;
pub mod list;
pub mod struct_store;
pub mod tree;
pub mod vector;

pub use keyword_table::{KeywordStrategy, KeywordTableRetriever};
pub use list::{ListEmbeddingRetriever, ListRetriever};
pub use struct_store::{StructStoreRetriever, StructuredQueryMode};
pub use tree::{TreeAllLeafRetriever, TreeRootRetriever, TreeSelectLeafEmbeddingRetriever, TreeSelectLeafRetriever};
pub use vector::VectorIndexRetriever;

use trellis_core::{Node, QueryBundle, Result, ServiceContext};

/// Embedding of the query: the precomputed one, else the mean of its embedding strings.
pub(crate) async fn query_embedding(
    service_context: &ServiceContext,
    query: &QueryBundle,
) -> Result<Vec<f32>> {
    match &query.embedding {
        Some(embedding) => Ok(embedding.clone()),
        None => {
            service_context
                .agg_query_embedding(&query.embedding_strs())
                .await
        }
    }
}

/// Embeddings of `nodes` in order, computing the missing ones in one batch.
pub(crate) async fn node_embeddings(
    service_context: &ServiceContext,
    nodes: &[Node],
) -> Result<Vec<Vec<f32>>> {
    let missing: Vec<String> = nodes
        .iter()
        .filter(|n| n.embedding.is_none())
        .map(|n| n.get_text().to_string())
        .collect();
    let mut computed = if missing.is_empty() {
        Vec::new()
    } else {
        service_context.text_embeddings(&missing).await?
    }
    .into_iter();
    nodes
        .iter()
        .map(|n| match &n.embedding {
            Some(embedding) => Ok(embedding.clone()),
            None => computed.next().ok_or_else(|| {
                trellis_core::TrellisError::embedding("embedding model returned too few vectors")
            }),
        })
        .collect()
}

/// First characters of a node's text, for verbose traces.
pub(crate) fn snippet(text: &str) -> String {
    text.chars().take(80).collect::<String>().replace('\n', " ")
}
