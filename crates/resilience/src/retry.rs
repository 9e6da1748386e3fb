// crates/resilience/src/retry.rs
//! Retry policies with exponential backoff

use crate::error::RetriesExhausted;
use std::future::Future;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first attempt)
    max_attempts: usize,
    /// Initial delay between retries
    initial_delay: Duration,
    /// Maximum delay between retries
    max_delay: Duration,
    /// Backoff multiplier
    multiplier: f64,
    /// Whether to use jitter
    use_jitter: bool,
}

impl RetryPolicy {
    /// Creates a new retry policy
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            use_jitter: true,
        }
    }

    /// Sets the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets whether to use jitter
    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Calculates the delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.use_jitter {
            // Deterministic 75%..100% spread so attempts don't align
            let jitter_factor = 0.75 + (attempt as f64 * 0.1 % 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Returns the maximum number of attempts
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Returns true once `failures` consecutive failures used up the budget
    pub fn is_exhausted(&self, failures: usize) -> bool {
        failures >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Runs an async operation, retrying every failure with the policy's backoff
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_async_if(policy, operation, |_| true).await
}

/// Like `retry_async`, but stops at the first error `should_retry` rejects
pub async fn retry_async_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let budget_spent = policy.is_exhausted(attempt);
        if budget_spent || !should_retry(&error) {
            return Err(RetriesExhausted {
                attempts: attempt,
                budget_spent,
                last_error: error,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        log::debug!("Attempt {} failed ({}); retrying in {:?}", attempt, error, delay);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(60))
            .with_multiplier(3.0)
            .with_jitter(false);

        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 3.0);
        assert!(!policy.use_jitter);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(4)
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(0));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_capping() {
        let policy = RetryPolicy::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_multiplier(2.0)
            .with_jitter(false);

        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_below_base() {
        let policy = RetryPolicy::new(5).with_initial_delay(Duration::from_millis(1000));
        for attempt in 1..5 {
            let jittered = policy.delay_for_attempt(attempt);
            let plain = policy.clone().with_jitter(false).delay_for_attempt(attempt);
            assert!(jittered <= plain);
            assert!(jittered >= plain * 3 / 4);
        }
    }

    #[test]
    fn test_is_exhausted() {
        let policy = RetryPolicy::new(3);
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_success_after_failures() {
        let policy = RetryPolicy::new(3).with_initial_delay(Duration::from_millis(10));
        let mut call_count = 0;

        let result = retry_async(&policy, || {
            call_count += 1;
            let attempt = call_count;
            async move {
                if attempt < 3 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(call_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_all_attempts_fail() {
        let policy = RetryPolicy::new(3).with_initial_delay(Duration::from_millis(10));
        let mut call_count = 0;

        let result = retry_async(&policy, || {
            call_count += 1;
            async { Err::<i32, _>("persistent error") }
        })
        .await;

        assert_eq!(call_count, 3);
        let err = result.expect_err("Should give up");
        assert_eq!(err.attempts, 3);
        assert!(err.budget_spent);
        assert_eq!(err.last_error, "persistent error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_error_stops_immediately() {
        let policy = RetryPolicy::new(5).with_initial_delay(Duration::from_millis(10));
        let mut call_count = 0;

        let result = retry_async_if(
            &policy,
            || {
                call_count += 1;
                async { Err::<i32, _>("document rejected") }
            },
            |e| !e.contains("rejected"),
        )
        .await;

        assert_eq!(call_count, 1);
        let err = result.expect_err("Should stop");
        assert_eq!(err.attempts, 1);
        assert!(!err.budget_spent);
    }
}
