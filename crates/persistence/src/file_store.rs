//! File system key/value store
//!
//! Each key is stored in its own file inside a single directory:
//! - Atomic writes (temp file + rename, no partial files)
//! - Directory creation on first write
//! - Quota enforced over the total size of stored values
//! - NO PANICS - all errors are handled via Result types

use crate::error::{StoreError, StoreResult};
use crate::store::{KeyValueStore, DEFAULT_QUOTA_BYTES};
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const VALUE_EXTENSION: &str = "json";

/// Stores values as files under one directory
pub struct FileStore {
    directory: PathBuf,
    quota_bytes: u64,
}

impl FileStore {
    /// Creates a store rooted at `directory` with the default quota
    pub fn new(directory: PathBuf) -> Self {
        Self::with_quota(directory, DEFAULT_QUOTA_BYTES)
    }

    /// Creates a store rooted at `directory` with a custom quota
    pub fn with_quota(directory: PathBuf, quota_bytes: u64) -> Self {
        Self {
            directory,
            quota_bytes,
        }
    }

    /// Returns the platform data directory for the dashboard
    ///
    /// - Linux: `~/.local/share/kpiboard/`
    /// - macOS: `~/Library/Application Support/kpiboard/`
    /// - Windows: `%APPDATA%\kpiboard\data\`
    pub fn default_directory() -> StoreResult<PathBuf> {
        ProjectDirs::from("", "", "kpiboard")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                StoreError::Unavailable("Could not determine user data directory".to_string())
            })
    }

    /// Returns the store directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Maps a key to its file, replacing characters unsafe in file names
    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory
            .join(format!("{}.{}", file_name, VALUE_EXTENSION))
    }

    fn ensure_directory_exists(&self) -> StoreResult<()> {
        if !self.directory.exists() {
            fs::create_dir_all(&self.directory).map_err(|e| StoreError::WriteError {
                path: self.directory.clone(),
                source: e,
            })?;
            log::info!("Created settings directory: {}", self.directory.display());
        }
        Ok(())
    }

    /// Sums the size of stored values, skipping `exclude`
    fn used_bytes_excluding(&self, exclude: &Path) -> StoreResult<u64> {
        if !self.directory.exists() {
            return Ok(0);
        }

        let mut total = 0;
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if path == exclude
                || path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXTENSION)
            {
                continue;
            }
            total += entry.metadata()?.len();
        }
        Ok(total)
    }

    fn write_atomic(&self, path: &Path, content: &str) -> StoreResult<()> {
        let mut temp_file = NamedTempFile::new_in(&self.directory)?;

        temp_file
            .write_all(content.as_bytes())
            .map_err(StoreError::IoError)?;
        temp_file.flush().map_err(StoreError::IoError)?;

        temp_file.persist(path).map_err(|e| StoreError::WriteError {
            path: path.to_path_buf(),
            source: e.error,
        })?;

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| StoreError::ReadError { path, source: e })
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_directory_exists()?;

        let path = self.path_for(key);
        let needed = self.used_bytes_excluding(&path)? + value.len() as u64;
        if needed > self.quota_bytes {
            log::warn!(
                "Refusing to write {}: {} bytes exceeds quota of {} bytes",
                path.display(),
                needed,
                self.quota_bytes
            );
            return Err(StoreError::QuotaExceeded {
                needed,
                quota: self.quota_bytes,
            });
        }

        self.write_atomic(&path, value)?;
        log::debug!("Stored {} ({} bytes)", path.display(), value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::WriteError { path, source: e }),
        }
    }

    fn is_available(&self) -> bool {
        if self.directory.exists() {
            return self.directory.is_dir();
        }
        self.directory
            .parent()
            .map(|parent| parent.exists() || fs::create_dir_all(parent).is_ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_store(quota: u64) -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::with_quota(temp_dir.path().join("settings"), quota);
        (temp_dir, store)
    }

    #[test]
    fn test_missing_key_returns_none() {
        let (_temp_dir, store) = setup_store(1024);
        assert_eq!(store.get("absent").unwrap(), None);
    }

    #[test]
    fn test_set_creates_directory() {
        let (_temp_dir, store) = setup_store(1024);
        store.set("kpiboard.settings.user-1", "{}").unwrap();
        assert!(store.directory().exists());
        assert_eq!(
            store.get("kpiboard.settings.user-1").unwrap(),
            Some("{}".to_string())
        );
    }

    #[test]
    fn test_unsafe_key_characters_are_replaced() {
        let (_temp_dir, store) = setup_store(1024);
        let path = store.path_for("../escape/attempt");
        assert_eq!(path.parent(), Some(store.directory()));
    }

    #[test]
    fn test_quota_exceeded_keeps_previous_value() {
        let (_temp_dir, store) = setup_store(16);
        store.set("k", "0123456789").unwrap();

        let result = store.set("k", "0123456789abcdefXYZ");
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));
        assert_eq!(store.get("k").unwrap(), Some("0123456789".to_string()));
    }

    #[test]
    fn test_quota_counts_other_keys() {
        let (_temp_dir, store) = setup_store(16);
        store.set("a", "0123456789").unwrap();
        assert!(store.set("b", "0123456789").is_err());
    }

    #[test]
    fn test_remove() {
        let (_temp_dir, store) = setup_store(1024);
        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert!(store.remove("k").is_ok());
    }

    #[test]
    fn test_is_available() {
        let (_temp_dir, store) = setup_store(1024);
        assert!(store.is_available());
    }
}
