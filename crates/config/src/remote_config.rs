// crates/config/src/remote_config.rs
//! Preferences server configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use kpiboard_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote call limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Deadline for each remote call in seconds (1-120)
    pub timeout_secs: u64,

    /// Attempts per failed cycle before giving up until the next poll (1-10)
    pub max_retries: usize,

    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RemoteConfig {
    /// Builds the backoff policy described by this section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
    }
}

impl ConfigSection for RemoteConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(self.timeout_secs, 1, 120, "remote.timeout_secs"),
            Validator::in_range(self.max_retries, 1, 10, "remote.max_retries"),
            Validator::positive(self.initial_backoff_ms, "remote.initial_backoff_ms"),
            Validator::ordered(
                self.initial_backoff_ms,
                self.max_backoff_ms,
                "remote.max_backoff_ms",
            ),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.timeout_secs = other.timeout_secs;
        self.max_retries = other.max_retries;
        self.initial_backoff_ms = other.initial_backoff_ms;
        self.max_backoff_ms = other.max_backoff_ms;
    }

    fn section_name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RemoteConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_retries() {
        let mut config = RemoteConfig::default();
        config.max_retries = 0;
        assert!(config.validate().is_err());
        config.max_retries = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_ceiling_below_start() {
        let config = RemoteConfig {
            initial_backoff_ms: 5000,
            max_backoff_ms: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy() {
        let policy = RemoteConfig::default().retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.delay_for_attempt(1) <= Duration::from_millis(500));
        assert!(policy.delay_for_attempt(20) <= Duration::from_secs(30));
    }
}
