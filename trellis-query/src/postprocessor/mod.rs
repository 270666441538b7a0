//! Node postprocessors applied between retrieval and synthesis.
//!
//! Every query object runs its postprocessors in order after each retrieval, at every
//! level of a recursive query.

pub mod keyword_filter;
pub mod similarity_filter;

pub use keyword_filter::KeywordNodePostprocessor;
pub use similarity_filter::SimilarityPostprocessor;
pub use trellis_core::traits::NodePostprocessor;
