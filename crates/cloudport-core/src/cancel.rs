//! Cancellation of network-bound operations.

use crate::{Error, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `future` unless `cancel` fires first, in which case the future is
/// dropped and `Error::Cancelled` names `operation`.
pub async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: &str,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled(operation.to_string()));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled(operation.to_string())),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let value = cancellable(&cancel, "noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_future() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut polled = false;
        let err = cancellable(&cancel, "vault login", async {
            polled = true;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!polled);
        assert_eq!(err.to_string(), "Operation cancelled: vault login");
    }

    #[tokio::test]
    async fn test_cancel_during_blocking_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = cancellable(&cancel, "push", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
    }
}
