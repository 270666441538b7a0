//! Similarity-based filtering postprocessor.

use async_trait::async_trait;
use tracing::debug;

use trellis_core::traits::NodePostprocessor;
use trellis_core::{QueryBundle, Result, ScoredNode};

/// Drops nodes scored below a cutoff.
///
/// Unscored nodes are kept, and the retrieval order is preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityPostprocessor {
    similarity_cutoff: f32,
    max_nodes: Option<usize>,
}

impl SimilarityPostprocessor {
    /// Create with a similarity cutoff.
    pub fn with_cutoff(similarity_cutoff: f32) -> Self {
        Self {
            similarity_cutoff,
            max_nodes: None,
        }
    }

    /// Also keep at most `max_nodes` nodes.
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = Some(max_nodes);
        self
    }
}

#[async_trait]
impl NodePostprocessor for SimilarityPostprocessor {
    async fn postprocess(
        &self,
        nodes: Vec<ScoredNode>,
        _query: &QueryBundle,
    ) -> Result<Vec<ScoredNode>> {
        if nodes.is_empty() {
            return Ok(nodes);
        }

        debug!(
            "Filtering {} nodes with similarity cutoff: {:.3}",
            nodes.len(),
            self.similarity_cutoff
        );

        let mut filtered: Vec<ScoredNode> = nodes
            .into_iter()
            .filter(|n| n.score.is_none_or(|s| s >= self.similarity_cutoff))
            .collect();

        if let Some(max_nodes) = self.max_nodes {
            filtered.truncate(max_nodes);
        }

        debug!("After similarity filtering: {} nodes", filtered.len());
        Ok(filtered)
    }
}
