//! Embedding model trait and similarity helpers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};

/// Generates dense embeddings for queries and texts.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Embed a query string.
    async fn get_query_embedding(&self, query: &str) -> Result<Vec<f32>>;

    /// Embed a document text.
    async fn get_text_embedding(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts. The default embeds them one at a time.
    async fn get_text_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.get_text_embedding(text).await?);
        }
        Ok(embeddings)
    }

    /// Mean of the query embeddings of several strings.
    async fn get_agg_embedding_from_queries(&self, queries: &[String]) -> Result<Vec<f32>> {
        let mut embeddings = Vec::with_capacity(queries.len());
        for query in queries {
            embeddings.push(self.get_query_embedding(query).await?);
        }
        mean_embedding(&embeddings)
    }

    /// Model identifier.
    fn model_name(&self) -> &str;

    /// Get a human-readable name for this embedder.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// How to compare two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMode {
    /// Cosine similarity.
    #[default]
    Cosine,
    /// Raw dot product.
    DotProduct,
    /// Negated euclidean distance, so larger is closer.
    Euclidean,
}

/// Similarity of two equally sized vectors. Zero vectors have cosine similarity 0.
pub fn similarity(a: &[f32], b: &[f32], mode: SimilarityMode) -> f32 {
    match mode {
        SimilarityMode::DotProduct => dot(a, b),
        SimilarityMode::Euclidean => {
            let dist: f32 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
            -dist.sqrt()
        }
        SimilarityMode::Cosine => {
            let norm = dot(a, a).sqrt() * dot(b, b).sqrt();
            if norm == 0.0 { 0.0 } else { dot(a, b) / norm }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Element-wise mean of embeddings of equal dimension.
pub fn mean_embedding(embeddings: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = embeddings.first() else {
        return Err(TrellisError::embedding("cannot average zero embeddings"));
    };
    let dimension = first.len();
    let mut mean = vec![0.0_f32; dimension];
    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(TrellisError::embedding(format!(
                "embedding dimension mismatch: {} vs {dimension}",
                embedding.len()
            )));
        }
        for (acc, value) in mean.iter_mut().zip(embedding) {
            *acc += value;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let count = embeddings.len() as f32;
    for value in &mut mean {
        *value /= count;
    }
    Ok(mean)
}

/// Indices and scores of the `top_k` most similar candidates, best first.
///
/// Ties keep candidate order.
pub fn top_k_similar(
    query: &[f32],
    candidates: &[Vec<f32>],
    top_k: usize,
    mode: SimilarityMode,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, similarity(query, c, mode)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_k);
    scored
}
