// crates/config/src/storage_config.rs
//! Local storage configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use crate::{ConfigError, ConfigResult};
use kpiboard_persistence::{FileStore, DEFAULT_QUOTA_BYTES};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the local settings cache lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Cache directory; the platform data directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Byte budget of the local store
    pub quota_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: None,
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

impl StorageConfig {
    /// Resolves the cache directory
    pub fn resolve_directory(&self) -> ConfigResult<PathBuf> {
        match &self.directory {
            Some(directory) => Ok(directory.clone()),
            None => FileStore::default_directory().map_err(|e| {
                log::warn!("Could not resolve the settings cache directory: {}", e);
                ConfigError::NoPlatformDirectory("data")
            }),
        }
    }

    /// Opens the file-backed local store described by this section
    pub fn open_store(&self) -> ConfigResult<FileStore> {
        let directory = self.resolve_directory()?;
        log::debug!(
            "Local settings store at {} ({} byte quota)",
            directory.display(),
            self.quota_bytes
        );
        Ok(FileStore::with_quota(directory, self.quota_bytes))
    }
}

impl ConfigSection for StorageConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = vec![Validator::positive(self.quota_bytes, "storage.quota_bytes")];
        if let Some(directory) = &self.directory {
            if directory.as_os_str().is_empty() {
                results.push(Err(ValidationError::new(
                    "storage.directory",
                    "must not be empty",
                )));
            }
        }
        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        if other.directory.is_some() {
            self.directory = other.directory;
        }
        self.quota_bytes = other.quota_bytes;
    }

    fn section_name(&self) -> &'static str {
        "storage"
    }
}
