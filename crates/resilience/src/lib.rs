// crates/resilience/src/lib.rs
//! Resilience patterns for remote settings calls
//!
//! This module provides:
//! - Retry policies with exponential backoff
//! - Timeouts for async operations
//!
//! # Example
//!
//! ```rust
//! use kpiboard_resilience::{RetryPolicy, Timeout};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3)
//!     .with_initial_delay(Duration::from_millis(500));
//! assert_eq!(policy.max_attempts(), 3);
//!
//! let timeout = Timeout::new(Duration::from_secs(10));
//! assert_eq!(timeout.duration(), Duration::from_secs(10));
//! ```

mod error;
mod retry;
mod timeout;

pub use error::{RetriesExhausted, TimedOut, TimeoutResult};
pub use retry::{retry_async, retry_async_if, RetryPolicy};
pub use timeout::{with_timeout, Timeout};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_exports_accessible() {
        let _: RetryPolicy = RetryPolicy::default();
        let _: Timeout = Timeout::new(std::time::Duration::from_secs(5));
    }
}
