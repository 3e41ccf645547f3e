//! Compensation helper for multi-statement creations.

use std::future::Future;

use tally_common::AppResult;

/// Run `action`; on failure, run `compensate` to undo writes that already
/// landed, then return the original error.
///
/// There is no cross-table transaction around poll-and-options creation, so
/// the caller supplies an explicit compensating action instead. A failed
/// compensation leaves an orphaned aggregate root behind; that is logged at
/// error level with the root id so it can be cleaned up manually.
pub async fn run_with_compensation<T, A, C, F>(
    aggregate_id: &str,
    action: A,
    compensate: F,
) -> AppResult<T>
where
    A: Future<Output = AppResult<T>>,
    C: Future<Output = AppResult<()>>,
    F: FnOnce() -> C,
{
    match action.await {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Err(comp_err) = compensate().await {
                tracing::error!(
                    aggregate_id = %aggregate_id,
                    error = %comp_err,
                    "Compensation failed, orphaned row left behind"
                );
            }
            Err(err)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tally_common::AppError;

    #[tokio::test]
    async fn test_success_skips_compensation() {
        let compensated = AtomicBool::new(false);

        let result = run_with_compensation(
            "root1",
            async { Ok::<_, AppError>(42) },
            || async {
                compensated.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert!(!compensated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_runs_compensation() {
        let compensated = AtomicBool::new(false);

        let result: AppResult<i32> = run_with_compensation(
            "root1",
            async { Err(AppError::Database("insert failed".to_string())) },
            || async {
                compensated.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert!(result.is_err());
        assert!(compensated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_compensation_failure_keeps_original_error() {
        let result: AppResult<i32> = run_with_compensation(
            "root1",
            async { Err(AppError::Database("insert failed".to_string())) },
            || async { Err(AppError::Database("delete also failed".to_string())) },
        )
        .await;

        match result {
            Err(AppError::Database(msg)) => assert_eq!(msg, "insert failed"),
            _ => panic!("Expected original Database error"),
        }
    }
}
