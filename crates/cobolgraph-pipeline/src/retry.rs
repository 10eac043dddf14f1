use cobolgraph_core::{PipelineError, RetryConfig};
use cobolgraph_llm::is_rate_limited;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Maps an error surfaced by a provider call into the closed error taxonomy,
/// distinguishing a 429 response (`UpstreamRateLimited`, exempt from the
/// retry attempt budget) from any other transient failure
/// (`UpstreamUnavailable`, which is not).
pub fn upstream_error(e: anyhow::Error) -> PipelineError {
    if is_rate_limited(&e) {
        PipelineError::UpstreamRateLimited(e.to_string())
    } else {
        PipelineError::UpstreamUnavailable(e.to_string())
    }
}

/// Generalizes the per-provider retry loop (exponential backoff starting at
/// `initial_backoff_secs`, doubling per attempt, bounded by `max_attempts`)
/// into one executor every stage's outbound call shares. A rate-limited
/// response does not count against the attempt budget, matching
/// `UpstreamRateLimited`'s retry-without-counting semantics.
pub async fn retry_with_backoff<F, Fut, T>(
    target: &str,
    policy: &RetryConfig,
    mut f: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if matches!(e, PipelineError::UpstreamRateLimited(_)) => {
                warn!(target, attempt, "rate limited, retrying without charging attempt budget");
                sleep_for_attempt(policy, attempt).await;
            }
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                warn!(target, attempt, error = %e, "retrying after transient failure");
                sleep_for_attempt(policy, attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn sleep_for_attempt(policy: &RetryConfig, attempt: u32) {
    let delay = policy.initial_backoff_secs.saturating_mul(1u64 << attempt.min(16));
    tokio::time::sleep(Duration::from_secs(delay.max(policy.initial_backoff_secs))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_secs: 0,
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retrying() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", &fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PipelineError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", &fast_policy(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(PipelineError::UpstreamUnavailable("down".to_string()))
            } else {
                Ok(99)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_propagates_final_error() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, _> = retry_with_backoff("test", &fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::UpstreamUnavailable("down".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_does_not_count_against_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", &fast_policy(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 5 {
                Err(PipelineError::UpstreamRateLimited("429".to_string()))
            } else {
                Ok(1)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn upstream_error_maps_rate_limit_distinctly_from_other_failures() {
        let rate_limited = upstream_error(anyhow::Error::new(cobolgraph_llm::RateLimited));
        assert!(matches!(rate_limited, PipelineError::UpstreamRateLimited(_)));

        let other = upstream_error(anyhow::anyhow!("connection reset"));
        assert!(matches!(other, PipelineError::UpstreamUnavailable(_)));
    }

    #[test]
    fn first_backoff_equals_initial_delay_then_doubles() {
        let policy = RetryConfig {
            max_attempts: 4,
            initial_backoff_secs: 1,
        };
        let delay = |attempt: u32| policy.initial_backoff_secs.saturating_mul(1u64 << attempt.min(16));
        assert_eq!(delay(0), 1);
        assert_eq!(delay(1), 2);
        assert_eq!(delay(2), 4);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, _> = retry_with_backoff("test", &fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::SchemaViolation("bad enum".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
