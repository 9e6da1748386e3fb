// crates/resilience/src/timeout.rs
//! Timeout handling utilities

use crate::error::{TimedOut, TimeoutResult};
use std::future::Future;
use std::time::Duration;

/// Awaits `operation`, failing with `TimedOut` after `duration`
pub async fn with_timeout<F, T>(duration: Duration, operation: F) -> TimeoutResult<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| TimedOut(duration))
}

/// Timeout wrapper for operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Creates a new timeout
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Gets the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Executes an operation with this timeout
    pub async fn execute<F, T>(&self, operation: F) -> TimeoutResult<T>
    where
        F: Future<Output = T>,
    {
        with_timeout(self.duration, operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        })
        .await;

        assert_eq!(result.ok(), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exceeded() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            42
        })
        .await;

        assert_eq!(result, Err(TimedOut(Duration::from_millis(10))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_wrapper() {
        let timeout = Timeout::new(Duration::from_millis(100));
        let result = timeout.execute(async { 42 }).await;
        assert_eq!(result.ok(), Some(42));
    }

    #[test]
    fn test_timeout_duration() {
        let timeout = Timeout::new(Duration::from_secs(5));
        assert_eq!(timeout.duration(), Duration::from_secs(5));
    }
}
