//! Retrieval trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{QueryBundle, ScoredNode};

/// Returns ranked nodes from one index structure.
///
/// Retrievers know nothing about other indices: an index node comes back as-is and the
/// caller decides whether to resolve it.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use trellis_core::traits::Retriever;
/// use trellis_core::{QueryBundle, Result, ScoredNode};
///
/// #[derive(Debug)]
/// struct Nothing;
///
/// #[async_trait]
/// impl Retriever for Nothing {
///     async fn retrieve(&self, _query: &QueryBundle) -> Result<Vec<ScoredNode>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait Retriever: Send + Sync + std::fmt::Debug {
    /// Retrieve nodes, awaiting each external call in sequence.
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>>;

    /// Retrieve nodes on the async path.
    ///
    /// Defaults to [`retrieve`](Retriever::retrieve); override only when the retriever
    /// can overlap its external calls.
    async fn aretrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        self.retrieve(query).await
    }

    /// Get a human-readable name for this retriever.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
