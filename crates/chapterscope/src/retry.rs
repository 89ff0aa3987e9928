//! Attempt-level retry with linear backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::types::{EngineResult, ExtractionError};

/// Re-runs a whole attempt until it succeeds or attempts run out.
#[derive(Debug, Clone, Copy)]
pub struct RetryManager {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryManager {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause after failed attempt `attempt` (1-based): `base_delay * attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `op` with the 1-based attempt number.
    ///
    /// `Cancelled` is returned immediately and never retried. When attempts
    /// are exhausted the last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, mut op: F) -> EngineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 1;
        loop {
            if token.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                "Attempt {}/{} failed ({}), retrying in {:?}",
                attempt,
                self.max_attempts,
                err,
                delay
            );
            tokio::select! {
                _ = token.cancelled() => return Err(ExtractionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_until_success() {
        let retry = RetryManager::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let value = retry
            .run(&CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(ExtractionError::NoResultsFound)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let retry = RetryManager::new(2, Duration::from_millis(10));
        let err = retry
            .run(&CancellationToken::new(), |attempt| async move {
                Err::<(), _>(ExtractionError::Network {
                    url: format!("attempt-{attempt}"),
                    message: "reset".into(),
                })
            })
            .await
            .unwrap_err();
        match err {
            ExtractionError::Network { url, .. } => assert_eq!(url, "attempt-2"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_never_retried() {
        let retry = RetryManager::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let err = retry
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ExtractionError::Cancelled) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let retry = RetryManager::new(3, Duration::from_secs(60));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });
        let err = retry
            .run(&token, |_| async { Err::<(), _>(ExtractionError::NoResultsFound) })
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Cancelled));
    }
}
