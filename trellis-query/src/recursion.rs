//! Nested query protocol.
//!
//! A query object that meets an index node hands the referenced struct to a
//! [`NestedQueryRunner`] together with a [`QueryContext`]. The context carries the path
//! of index ids from the root, so re-entering an index on the path and descending past
//! the depth limit both fail before any further call is made.

use async_trait::async_trait;

use trellis_core::{IndexStruct, QueryBundle, Response, Result, TrellisError};

/// Deepest nesting level allowed unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Position of one query inside a recursive resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    level: usize,
    path: Vec<String>,
    max_depth: usize,
}

impl QueryContext {
    /// Context of a top-level query against `index_id`.
    pub fn root(index_id: impl Into<String>, max_depth: usize) -> Self {
        Self {
            level: 0,
            path: vec![index_id.into()],
            max_depth,
        }
    }

    /// Context one level below this one, inside `child_id`.
    ///
    /// Fails with [`TrellisError::CycleDetected`] when `child_id` is already on the
    /// path and with [`TrellisError::MaxDepthExceeded`] when the new level would pass
    /// the limit.
    pub fn descend(&self, child_id: &str) -> Result<Self> {
        let mut path = self.path.clone();
        path.push(child_id.to_string());
        if self.path.iter().any(|id| id == child_id) {
            return Err(TrellisError::CycleDetected {
                index_id: child_id.to_string(),
                path,
            });
        }
        let level = self.level + 1;
        if level > self.max_depth {
            return Err(TrellisError::MaxDepthExceeded {
                max_depth: self.max_depth,
                index_id: child_id.to_string(),
            });
        }
        Ok(Self {
            level,
            path,
            max_depth: self.max_depth,
        })
    }

    /// Nesting level, 0 at the top.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Index ids from the root down to the current index.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The depth limit.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Id of the index currently being queried.
    pub fn current(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }
}

/// Runs the query for an index struct referenced by an index node.
///
/// Implemented by the query runner, which re-enters its full configuration pipeline,
/// and by the graph query engine, which reuses the already transformed bundle.
#[async_trait]
pub trait NestedQueryRunner: Send + Sync + std::fmt::Debug {
    /// Resolve `index_struct` on the sequential path.
    async fn query_nested(
        &self,
        query: &QueryBundle,
        index_struct: &IndexStruct,
        context: QueryContext,
    ) -> Result<Response>;

    /// Resolve `index_struct` on the async path.
    async fn aquery_nested(
        &self,
        query: &QueryBundle,
        index_struct: &IndexStruct,
        context: QueryContext,
    ) -> Result<Response> {
        self.query_nested(query, index_struct, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descend_tracks_level_and_path() {
        let root = QueryContext::root("root", DEFAULT_MAX_DEPTH);
        let child = root.descend("child").unwrap();
        assert_eq!(child.level(), 1);
        assert_eq!(child.path(), ["root".to_string(), "child".to_string()]);
        assert_eq!(child.current(), Some("child"));
        assert_eq!(root.level(), 0);
    }

    #[test]
    fn test_revisiting_an_index_is_a_cycle() {
        let ctx = QueryContext::root("a", 8).descend("b").unwrap();
        let err = ctx.descend("a").unwrap_err();
        match err {
            TrellisError::CycleDetected { index_id, path } => {
                assert_eq!(index_id, "a");
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_depth_limit() {
        let ctx = QueryContext::root("l0", 2)
            .descend("l1")
            .unwrap()
            .descend("l2")
            .unwrap();
        let err = ctx.descend("l3").unwrap_err();
        assert!(matches!(
            err,
            TrellisError::MaxDepthExceeded { max_depth: 2, .. }
        ));
        assert!(err.is_client_error());
    }
}
