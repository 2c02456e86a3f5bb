//! Timeout helpers for remote calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;
use voyage_core::VoyageError;

/// Race `future` against `timeout`.
///
/// The future is dropped when the deadline passes, so a late result is never
/// observed.
///
/// # Errors
/// Returns `VoyageError::Timeout` naming `operation` if the deadline passes,
/// otherwise whatever the future returns
pub async fn with_timeout<F, T>(
    operation: &str,
    timeout: Duration,
    future: F,
) -> Result<T, VoyageError>
where
    F: Future<Output = Result<T, VoyageError>>,
{
    if let Ok(result) = tokio::time::timeout(timeout, future).await {
        result
    } else {
        warn!(
            operation,
            timeout_ms = timeout.as_millis(),
            "Operation timed out"
        );
        Err(VoyageError::timeout(operation, timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_success() {
        let result = with_timeout("intent", Duration::from_secs(1), async {
            sleep(Duration::from_millis(10)).await;
            Ok(42)
        })
        .await;

        assert_eq!(result.expect("completes in time"), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exceeded() {
        let result: Result<u32, VoyageError> =
            with_timeout("discovery", Duration::from_secs(45), async {
                sleep(Duration::from_secs(60)).await;
                Ok(42)
            })
            .await;

        match result {
            Err(VoyageError::Timeout {
                operation,
                duration,
            }) => {
                assert_eq!(operation, "discovery");
                assert_eq!(duration, Duration::from_secs(45));
            }
            other => panic!("Expected timeout error, got {other:?}"),
        }
    }
}
