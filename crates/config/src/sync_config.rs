// crates/config/src/sync_config.rs
//! Sync manager configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use kpiboard_sync_engine::ResolutionStrategy;
use serde::{Deserialize, Serialize};

/// Background sync behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Resolution strategy for conflicting snapshots
    pub strategy: ResolutionStrategy,

    /// Seconds between background cycles (5-3600)
    pub poll_interval_secs: u64,

    /// Quiet period after an edit before it is saved, in milliseconds (100-60000)
    pub debounce_ms: u64,

    /// Minimum confidence for applying a resolution without review (0.0-1.0)
    pub auto_apply_threshold: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::HybridMetadata,
            poll_interval_secs: 30,
            debounce_ms: 1500,
            auto_apply_threshold: 0.8,
        }
    }
}

impl ConfigSection for SyncConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(self.poll_interval_secs, 5, 3600, "sync.poll_interval_secs"),
            Validator::in_range(self.debounce_ms, 100, 60_000, "sync.debounce_ms"),
            Validator::in_range(
                self.auto_apply_threshold,
                0.0,
                1.0,
                "sync.auto_apply_threshold",
            ),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.strategy = other.strategy;
        self.poll_interval_secs = other.poll_interval_secs;
        self.debounce_ms = other.debounce_ms;
        self.auto_apply_threshold = other.auto_apply_threshold;
    }

    fn section_name(&self) -> &'static str {
        "sync"
    }
}
