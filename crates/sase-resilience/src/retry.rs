//! Retry with exponential backoff
//!
//! Wraps a single external call. Only transient failures are retried; a
//! rate-limited failure waits for the provider's `Retry-After` hint instead of
//! the backoff schedule.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Failure classification consumed by [`RetryPolicy`]
pub trait RetryableError {
    /// Timeouts, connection failures, 5xx
    fn is_transient(&self) -> bool;

    /// HTTP 429 or an equivalent provider signal
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// Provider-supplied delay before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry
    pub base_delay: Duration,
    /// Upper bound for any backoff or provider `Retry-After` wait
    pub max_delay: Duration,
    /// Wait used for rate-limited failures without a hint; not capped by `max_delay`
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            default_retry_after: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based): `base × 2^attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay to wait after `error`, or `None` if it must be surfaced now
    fn delay_for<E: RetryableError>(&self, error: &E, attempt: u32) -> Option<Duration> {
        if error.is_rate_limited() {
            // An authoritative hint longer than we may wait ends the call
            return match error.retry_after() {
                Some(hint) => (hint <= self.max_delay).then_some(hint),
                None => Some(self.default_retry_after),
            };
        }

        if error.is_transient() {
            return Some(self.backoff_delay(attempt));
        }

        None
    }

    /// Run `operation`, retrying per policy; the last error is returned on exhaustion
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        E: RetryableError + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;

        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.max_retries {
                tracing::debug!(operation, attempts = attempt + 1, error = %error, "retries exhausted");
                return Err(error);
            }

            let Some(delay) = self.delay_for(&error, attempt) else {
                tracing::debug!(operation, error = %error, "non-retryable failure");
                return Err(error);
            };

            tracing::debug!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying external call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Timeout,
        Auth,
        Limited(Option<Duration>),
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl RetryableError for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, Self::Timeout)
        }

        fn is_rate_limited(&self) -> bool {
            matches!(self, Self::Limited(_))
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                Self::Limited(hint) => *hint,
                _ => None,
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(50),
            default_retry_after: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, TestError> = fast_policy(3)
            .execute("lookup", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Timeout)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, TestError> = fast_policy(2)
            .execute("lookup", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Timeout)
            })
            .await;

        assert_eq!(result, Err(TestError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, TestError> = fast_policy(5)
            .execute("lookup", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Auth)
            })
            .await;

        assert_eq!(result, Err(TestError::Auth));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_honours_hint() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            default_retry_after: Duration::from_secs(60),
        };

        let start = tokio::time::Instant::now();
        let result: Result<u32, TestError> = policy
            .execute("lookup", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::Limited(Some(Duration::from_secs(7))))
                } else {
                    Ok(1)
                }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_rate_limit_hint_beyond_max_delay_surfaces() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, TestError> = fast_policy(3)
            .execute("lookup", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Limited(Some(Duration::from_secs(3600))))
            })
            .await;

        assert!(matches!(result, Err(TestError::Limited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rate_limited_without_hint_uses_default() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, TestError> = tokio_test::block_on(fast_policy(1).execute("lookup", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TestError::Limited(None))
            } else {
                Ok(9)
            }
        }));

        assert_eq!(result, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_retries_unhinted_rate_limit() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let start = tokio::time::Instant::now();
        let result: Result<u32, TestError> = RetryPolicy::default()
            .execute("lookup", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::Limited(None))
                } else {
                    Ok(3)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= RetryPolicy::default().default_retry_after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_wait_not_capped_by_max_delay() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            default_retry_after: Duration::from_secs(20),
        };

        let start = tokio::time::Instant::now();
        let result: Result<u32, TestError> = policy
            .execute("lookup", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::Limited(None))
                } else {
                    Ok(4)
                }
            })
            .await;

        assert_eq!(result, Ok(4));
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[test]
    fn test_none_policy() {
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
