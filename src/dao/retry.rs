//! Retry policy for store writes: a handful of attempts with exponential backoff
//! and jitter, applied only to transient failures.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::dao::storage::StorageResult;

struct RetryPolicy;

impl RetryPolicy {
    const MAX_ATTEMPTS: u32 = 3;
    const INITIAL_DELAY_MS: u64 = 100;

    fn initial_delay() -> Duration {
        Duration::from_millis(Self::INITIAL_DELAY_MS)
    }

    fn next_delay(current: Duration) -> Duration {
        (current * 2).min(Duration::from_secs(2))
    }

    fn jittered(delay: Duration) -> Duration {
        let jitter = rand::rng().random_range(0..=delay.as_millis() as u64 / 2);
        delay + Duration::from_millis(jitter)
    }
}

/// Run `operation` until it succeeds, fails permanently, or exhausts its attempts.
pub async fn with_retry<F, Fut, T>(operation: &'static str, mut attempt_fn: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 1;
    let mut delay = RetryPolicy::initial_delay();

    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < RetryPolicy::MAX_ATTEMPTS => {
                warn!(operation, attempt, error = %err, "store write failed; retrying");
                sleep(RetryPolicy::jittered(delay)).await;
                delay = RetryPolicy::next_delay(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::dao::storage::StorageError;

    fn transient() -> StorageError {
        StorageError::unavailable(
            "boom".into(),
            std::io::Error::new(std::io::ErrorKind::Other, "down"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry("test", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: StorageResult<()> = with_retry("test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), RetryPolicy::MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn missing_documents_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: StorageResult<()> = with_retry("test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::MissingDocument {
                    collection: "questions".into(),
                    id: "q".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(StorageError::MissingDocument { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
