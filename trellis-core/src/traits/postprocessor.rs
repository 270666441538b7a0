//! Node postprocessing trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{QueryBundle, ScoredNode};

/// Filters or reorders retrieved nodes before synthesis.
///
/// Postprocessors run after every retrieval, including each nested level of a
/// recursive query.
#[async_trait]
pub trait NodePostprocessor: Send + Sync + std::fmt::Debug {
    /// Process `nodes` retrieved for `query`.
    async fn postprocess(
        &self,
        nodes: Vec<ScoredNode>,
        query: &QueryBundle,
    ) -> Result<Vec<ScoredNode>>;

    /// Get a human-readable name for this postprocessor.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
