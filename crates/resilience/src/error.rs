// crates/resilience/src/error.rs
//! Failures reported by the timeout and retry wrappers
//!
//! Neither type flattens the caller's error: `RetriesExhausted` hands back
//! the last error untouched so its kind survives the retry loop.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A call that did not finish within its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Remote call timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Result of a call wrapped in a deadline
pub type TimeoutResult<T> = Result<T, TimedOut>;

/// Retrying stopped without a success
#[derive(Debug, Clone, PartialEq)]
pub struct RetriesExhausted<E> {
    /// Calls made, including the first
    pub attempts: usize,

    /// False when the loop stopped because the error was not worth retrying
    pub budget_spent: bool,

    pub last_error: E,
}

impl<E> RetriesExhausted<E> {
    /// Drops the attempt count, keeping the caller's error
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetriesExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.budget_spent {
            write!(f, "Gave up after {} attempts: {}", self.attempts, self.last_error)
        } else {
            write!(f, "Not retried after attempt {}: {}", self.attempts, self.last_error)
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetriesExhausted<E> {}
