//! Retry helper for platform calls.

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use crate::source::SourceError;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

/// Retry a Telegram API operation with exponential backoff.
///
/// Only transient failures ([`SourceError::is_transient`]) are retried.
/// Rate-limit signals are returned immediately: the caller knows how long the
/// platform wants it to wait and decides what to restart.
///
/// The retry strategy uses exponential backoff with jitter to avoid a
/// thundering herd:
/// - Initial delay: 500ms
/// - Max delay: 8s
/// - Max retries: 3
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-transient error.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    RetryIf::spawn(retry_strategy, operation, SourceError::is_transient)
        .await
        .map_err(|e| {
            if e.is_transient() {
                warn!(
                    "Telegram API operation failed after {} attempts: {}",
                    TELEGRAM_API_MAX_RETRIES, e
                );
            }
            e
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = retry_telegram_operation(move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SourceError::Network("reset".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_telegram_operation(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Unauthorized("nope".to_string()))
        })
        .await;

        assert!(matches!(result, Err(SourceError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_telegram_operation(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Network("down".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), TELEGRAM_API_MAX_RETRIES + 1);
    }
}
