//! Small async helpers shared across crates.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, TrellisError};

/// Await `fut`, failing with [`TrellisError::Timeout`] if it runs longer than `limit`.
///
/// `None` waits indefinitely.
pub async fn with_timeout<F, T>(limit: Option<Duration>, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, limit_ms = limit.as_millis(), "External call timed out");
                Err(TrellisError::timeout(operation))
            }
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_fires() {
        let err = with_timeout(Some(Duration::from_millis(5)), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TrellisError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_no_limit_passes_result_through() {
        let value = with_timeout(None, "fast", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
