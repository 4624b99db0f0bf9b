//! Retry with capped exponential backoff.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::Retryable;

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

// == Retry Policy ==
/// Backoff parameters and retry predicate.
///
/// The delay before retry `n` (counting from 0) is
/// `min(base_delay * 2^n, max_delay)`. At most `max_retries + 1` attempts
/// are made.
pub struct RetryPolicy<E> {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    should_retry: RetryPredicate<E>,
}

impl<E: Retryable + 'static> RetryPolicy<E> {
    /// Policy that only retries errors classified as transient.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self::with_predicate(max_retries, base_delay, max_delay, |err: &E| {
            err.is_retryable()
        })
    }
}

impl<E> RetryPolicy<E> {
    pub fn with_predicate(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        should_retry: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            should_retry: Arc::new(should_retry),
        }
    }

    /// Replaces the retry predicate.
    pub fn with_should_retry(
        mut self,
        should_retry: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(should_retry);
        self
    }

    pub fn should_retry(&self, err: &E) -> bool {
        (self.should_retry)(err)
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

impl<E: Retryable + 'static> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            should_retry: Arc::clone(&self.should_retry),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

// == Execute With Retry ==
/// Runs `f` until it succeeds, the policy declines to retry, or retries are
/// exhausted. The last error is returned as-is.
pub async fn execute_with_retry<T, E, F, Fut>(policy: &RetryPolicy<E>, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !policy.should_retry(&err) {
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy<CacheError> {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        )
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = policy(10);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_failures() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let started = Instant::now();

        let result = execute_with_retry(&policy(3), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CacheError::Timeout("slow upstream".into()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<(), _> = execute_with_retry(&policy(3), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Network(format!("attempt {n}")))
        })
        .await;

        assert_eq!(result, Err(CacheError::Network("attempt 3".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_false_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let started = Instant::now();
        let policy = policy(3).with_should_retry(|_| false);

        let result: Result<(), _> = execute_with_retry(&policy, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Timeout("slow".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_predicate_skips_permanent_errors() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<(), _> = execute_with_retry(&policy(3), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Loader("validation failed".into()))
        })
        .await;

        assert_eq!(result, Err(CacheError::Loader("validation failed".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_attempt() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let result: Result<(), _> = execute_with_retry(&policy(0), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Timeout("slow".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
