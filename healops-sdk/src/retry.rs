//! Retrying of transport operations with exponential backoff and jitter.
//!
//! The `RetryPolicy` struct defines the configuration for the retry behavior,
//! including the maximum number of retries, initial delay, maximum delay, and
//! jitter.
//!
//! The `retry_with_exponential_backoff` function retries the given operation
//! according to the specified retry policy, doubling the delay between
//! attempts until either the operation succeeds or the maximum number of
//! retries is reached.

use std::future::Future;
use std::time::{Duration, SystemTime};

use healops::healops_warn;

/// Configuration for retry policy.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub(crate) max_retries: usize,
    /// Initial delay in milliseconds before the first retry.
    pub(crate) initial_delay_ms: u64,
    /// Maximum delay in milliseconds between retries.
    pub(crate) max_delay_ms: u64,
    /// Maximum jitter in milliseconds to add to the delay.
    pub(crate) jitter_ms: u64,
}

impl Default for RetryPolicy {
    /// The ingestion-endpoint cadence: three total attempts with delays of
    /// 200 ms and 400 ms between them.
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 200,
            max_delay_ms: 400,
            jitter_ms: 0,
        }
    }
}

// Generates a random jitter value up to max_jitter
fn generate_jitter(max_jitter: u64) -> u64 {
    if max_jitter == 0 {
        return 0;
    }
    let now = SystemTime::now();
    let nanos = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos as u64 % (max_jitter + 1)
}

/// Retries the given operation with exponential backoff and jitter.
///
/// Returns the operation's result, or the last error once the maximum number
/// of retries is reached.
pub(crate) async fn retry_with_exponential_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    E: std::fmt::Debug,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay_ms;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                healops_warn!(name: "Transport.Retry", operation = operation_name, error = format!("{err:?}"));
                let jitter = generate_jitter(policy.jitter_ms);
                let delay_with_jitter = std::cmp::min(delay + jitter, policy.max_delay_ms);
                tokio::time::sleep(Duration::from_millis(delay_with_jitter)).await;
                delay = std::cmp::min(delay * 2, policy.max_delay_ms);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::time::timeout;

    #[test]
    fn generated_jitter_stays_in_range() {
        let max_jitter = 100;
        let jitter = generate_jitter(max_jitter);
        assert!(jitter <= max_jitter);
        assert_eq!(generate_jitter(0), 0);
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let result = retry_with_exponential_backoff(RetryPolicy::default(), "test_operation", || {
            Box::pin(async { Ok::<_, ()>("success") })
        })
        .await;

        assert_eq!(result, Ok("success"));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicUsize::new(0);

        let result = retry_with_exponential_backoff(RetryPolicy::default(), "test_operation", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if attempt < 2 {
                    Err::<&str, &str>("error")
                } else {
                    Ok::<&str, &str>("success")
                }
            })
        })
        .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fails_after_max_retries_with_expected_cadence() {
        let attempts = AtomicUsize::new(0);
        let started = Instant::now();

        let result = retry_with_exponential_backoff(RetryPolicy::default(), "test_operation", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<(), _>("error") })
        })
        .await;

        assert_eq!(result, Err("error"));
        // Initial attempt plus two retries, separated by 200 ms and 400 ms.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn long_retry_sequences_can_be_timed_out() {
        let policy = RetryPolicy {
            max_retries: 12,
            initial_delay_ms: 100,
            max_delay_ms: 1600,
            jitter_ms: 100,
        };

        let result = timeout(
            Duration::from_secs(1),
            retry_with_exponential_backoff(policy, "test_operation", || {
                Box::pin(async { Err::<(), _>("error") })
            }),
        )
        .await;

        assert!(result.is_err());
    }
}
