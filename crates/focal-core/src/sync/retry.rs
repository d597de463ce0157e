//! Exponential-backoff retry wrapper and batched processing
//!
//! `with_retry` bounds worst-case latency per remote call; the persisted
//! per-item retry counter in the queue handles retries across drain passes.

use crate::error::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff configuration for `with_retry`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Cap applied to the computed delay
    pub max_delay: Duration,
    /// Exponential growth factor
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following `attempt` (1-based):
    /// `min(base_delay * backoff_multiplier^(attempt-1), max_delay)`
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX));
        let ms = (self.base_delay.as_millis() as f64 * exp).round() as u64;
        Duration::from_millis(ms).min(self.max_delay)
    }
}

/// Invoke `f` up to `config.max_attempts` times, sleeping with exponential
/// backoff between attempts. The last error is returned after the final
/// attempt. Errors classified as permanent are returned immediately since
/// repeating the call cannot change the outcome.
pub async fn with_retry<T, F, Fut>(operation: &str, config: &RetryConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_permanent_sync_error() => {
                tracing::warn!(operation, attempt, error = %e, "Permanent error, not retrying");
                return Err(e);
            }
            Err(e) if attempt < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    ?delay,
                    error = %e,
                    "Attempt failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(operation, attempt, error = %e, "All attempts exhausted");
                return Err(e);
            }
        }
    }
}

/// Process `items` in fixed-size batches, each item wrapped in `with_retry`.
///
/// Items within a batch run concurrently; one item's failure never aborts
/// the rest. Per-item results come back in input order. Control is yielded
/// between batches and `on_progress(processed, total)` fires after each.
pub async fn process_batch_with_retry<I, T, F, Fut, P>(
    operation: &str,
    items: Vec<I>,
    batch_size: usize,
    config: &RetryConfig,
    processor: F,
    mut on_progress: P,
) -> Vec<Result<T>>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(usize, usize),
{
    let total = items.len();
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(total);
    let mut remaining = items.into_iter();

    loop {
        let batch: Vec<I> = remaining.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }

        let futures = batch.into_iter().map(|item| {
            let processor = &processor;
            with_retry(operation, config, move || processor(item.clone()))
        });
        results.extend(join_all(futures).await);

        on_progress(results.len(), total);
        tokio::task::yield_now().await;
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn delay_follows_exponential_curve_with_cap() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(2000));
        // Capped at max_delay
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn with_retry_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = with_retry("test-op", &fast_config(3), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Remote("timeout".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn with_retry_returns_last_error_when_exhausted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = with_retry("test-op", &fast_config(3), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Remote(format!("failure {n}")))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Remote(ref msg)) if msg == "failure 2"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn with_retry_stops_immediately_on_permanent_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = with_retry("test-op", &fast_config(3), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Remote("permission denied for table bookings".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_collects_per_item_results_in_order() {
        let results = process_batch_with_retry(
            "test-batch",
            vec![1_u32, 2, 3, 4, 5],
            2,
            &fast_config(1),
            |n| async move {
                if n == 3 {
                    Err(Error::Remote("boom".to_string()))
                } else {
                    Ok(n * 10)
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(results.len(), 5);
        assert_eq!(*results[0].as_ref().unwrap(), 10);
        assert_eq!(*results[1].as_ref().unwrap(), 20);
        assert!(results[2].is_err());
        assert_eq!(*results[3].as_ref().unwrap(), 40);
        assert_eq!(*results[4].as_ref().unwrap(), 50);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_reports_progress_after_each_chunk() {
        let mut progress = Vec::new();
        let _ = process_batch_with_retry(
            "test-batch",
            vec![(); 5],
            2,
            &fast_config(1),
            |()| async { Ok(()) },
            |done, total| progress.push((done, total)),
        )
        .await;

        assert_eq!(progress, vec![(2, 5), (4, 5), (5, 5)]);
    }
}
