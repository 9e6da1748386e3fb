// crates/config/src/lib.rs
//! KPI dashboard engine configuration
//!
//! Loads the sync engine's tunables from `config.toml`.
//!
//! - **Trait-based**: each section implements `ConfigSection`
//! - **Graceful degradation**: `load_or_default` falls back to defaults with a warning
//! - **Atomic writes**: the config file is never left half-written
//! - **Overrides**: `KPIBOARD_*` environment variables win over the file
//!
//! # Example
//!
//! ```rust
//! use kpiboard_config::{Config, ConfigManager};
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let manager = ConfigManager::with_directory(dir.path().to_path_buf()).unwrap();
//! let config = manager.load_or_default();
//!
//! let options = config.sync_options();
//! assert_eq!(options.poll_interval.as_secs(), 30);
//! ```

mod error;
mod manager;
mod persistence;
mod remote_config;
mod storage_config;
mod sync_config;
mod validation;

pub use error::{ConfigError, ConfigResult, FileAction};
pub use manager::{apply_overrides, ConfigManager, ENV_PREFIX};
pub use persistence::{ConfigFile, LoadedConfig};
pub use remote_config::RemoteConfig;
pub use storage_config::StorageConfig;
pub use sync_config::SyncConfig;
pub use validation::{ConfigSection, ValidationError, Validator};

use kpiboard_sync_engine::SyncOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    pub sync: SyncConfig,

    pub remote: RemoteConfig,

    pub storage: StorageConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates every section, collecting all errors
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.sync.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.remote.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.storage.validate() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Replaces each section that fails validation with its defaults
    ///
    /// Returns the sanitized config and the problems that caused a section
    /// to be replaced.
    pub fn sanitized(mut self) -> (Self, Vec<ValidationError>) {
        let mut replaced = Vec::new();
        sanitize_section(&mut self.sync, &mut replaced);
        sanitize_section(&mut self.remote, &mut replaced);
        sanitize_section(&mut self.storage, &mut replaced);
        (self, replaced)
    }

    /// Merges this config with another, preferring values from `other`
    ///
    /// Used for override chains: defaults < file < env vars.
    pub fn merge(&mut self, other: Config) {
        self.sync.merge(other.sync);
        self.remote.merge(other.remote);
        self.storage.merge(other.storage);
    }

    /// Runtime options for the sync manager
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::default()
            .with_strategy(self.sync.strategy)
            .with_poll_interval(Duration::from_secs(self.sync.poll_interval_secs))
            .with_debounce(Duration::from_millis(self.sync.debounce_ms))
            .with_auto_apply_threshold(self.sync.auto_apply_threshold)
            .with_remote_timeout(Duration::from_secs(self.remote.timeout_secs))
            .with_retry_policy(self.remote.retry_policy())
    }
}

fn sanitize_section<S: ConfigSection>(section: &mut S, replaced: &mut Vec<ValidationError>) {
    if let Err(mut errors) = section.validate() {
        log::warn!(
            "[{}] is invalid, using its defaults: {:?}",
            section.section_name(),
            errors
        );
        *section = S::default();
        replaced.append(&mut errors);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sync: SyncConfig::default(),
            remote: RemoteConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpiboard_sync_engine::ResolutionStrategy;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, CONFIG_VERSION);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        let mut override_config = Config::default();
        override_config.sync.strategy = ResolutionStrategy::FieldLevelLww;

        base.merge(override_config);
        assert_eq!(base.sync.strategy, ResolutionStrategy::FieldLevelLww);
    }

    #[test]
    fn test_sync_options_follow_config() {
        let mut config = Config::default();
        config.sync.poll_interval_secs = 120;
        config.sync.debounce_ms = 400;
        config.sync.auto_apply_threshold = 0.9;
        config.remote.timeout_secs = 3;
        config.remote.max_retries = 5;

        let options = config.sync_options();
        assert_eq!(options.strategy, ResolutionStrategy::HybridMetadata);
        assert_eq!(options.poll_interval, Duration::from_secs(120));
        assert_eq!(options.debounce, Duration::from_millis(400));
        assert_eq!(options.auto_apply_threshold, 0.9);
        assert_eq!(options.remote_timeout, Duration::from_secs(3));
        assert_eq!(options.retry_policy.max_attempts(), 5);
    }

    #[test]
    fn test_sanitized_keeps_valid_sections() {
        let mut config = Config::default();
        config.sync.strategy = ResolutionStrategy::StrictTimestamp;
        config.remote.max_retries = 0;
        config.remote.timeout_secs = 60;

        let (sanitized, replaced) = config.sanitized();
        assert_eq!(sanitized.sync.strategy, ResolutionStrategy::StrictTimestamp);
        assert_eq!(sanitized.remote, RemoteConfig::default());
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].field, "remote.max_retries");
        assert!(sanitized.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        assert_eq!(Config::default().sync_options(), SyncOptions::default());
    }
}
