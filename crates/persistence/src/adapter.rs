// crates/persistence/src/adapter.rs
//! Typed save/load/clear of a user's settings document
//!
//! The adapter never returns an error and never panics: every failure is
//! reported through the outcome structs so callers can decide between an
//! actionable message (quota) and silent degradation (unavailable store).

use crate::error::StoreError;
use crate::store::KeyValueStore;
use kpiboard_settings::UserSettings;
use std::fmt;
use std::sync::Arc;

const KEY_PREFIX: &str = "kpiboard.settings";

/// Failure modes reported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// The store is full
    QuotaExceeded,
    /// The store cannot be accessed
    Unavailable,
    /// The document could not be serialized (or is structurally invalid)
    SerializationError,
    /// The stored document could not be parsed or failed validation
    Corrupted,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded => write!(f, "QUOTA_EXCEEDED"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::SerializationError => write!(f, "SERIALIZATION_ERROR"),
            Self::Corrupted => write!(f, "CORRUPTED"),
        }
    }
}

impl From<&StoreError> for StorageErrorKind {
    fn from(err: &StoreError) -> Self {
        if err.is_quota_exceeded() {
            StorageErrorKind::QuotaExceeded
        } else {
            StorageErrorKind::Unavailable
        }
    }
}

/// Result of a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub available: bool,
    pub error: Option<StorageErrorKind>,
}

impl SaveOutcome {
    fn saved() -> Self {
        Self {
            available: true,
            error: None,
        }
    }

    fn failed(error: StorageErrorKind) -> Self {
        Self {
            available: false,
            error: Some(error),
        }
    }

    /// Returns true if the document was persisted
    pub fn is_ok(&self) -> bool {
        self.available && self.error.is_none()
    }
}

/// Result of a load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub available: bool,
    pub settings: Option<UserSettings>,
    pub error: Option<StorageErrorKind>,
}

/// Result of a clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOutcome {
    pub available: bool,
}

/// Persists one user's settings document in a `KeyValueStore`
#[derive(Clone)]
pub struct PersistenceAdapter {
    store: Arc<dyn KeyValueStore>,
    user_id: String,
    key: String,
}

impl PersistenceAdapter {
    /// Creates an adapter for `user_id`
    pub fn new(store: Arc<dyn KeyValueStore>, user_id: &str) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
            key: format!("{}.{}", KEY_PREFIX, user_id),
        }
    }

    /// Returns the user whose document this adapter stores
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the storage key used for the document
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if the underlying store is usable
    pub fn is_available(&self) -> bool {
        self.store.is_available()
    }

    /// Saves the document
    pub fn save(&self, settings: &UserSettings) -> SaveOutcome {
        if !self.store.is_available() {
            log::debug!("Local store unavailable, skipping save of {}", self.key);
            return SaveOutcome::failed(StorageErrorKind::Unavailable);
        }

        if let Err(errors) = settings.validate() {
            let error_msg = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            log::warn!("Refusing to cache invalid settings: {}", error_msg);
            return SaveOutcome::failed(StorageErrorKind::SerializationError);
        }

        let serialized = match serde_json::to_string(settings) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Failed to serialize settings for {}: {}", self.key, e);
                return SaveOutcome::failed(StorageErrorKind::SerializationError);
            }
        };

        match self.store.set(&self.key, &serialized) {
            Ok(()) => {
                log::debug!(
                    "Cached settings {} (version {})",
                    self.key,
                    settings.metadata.version
                );
                SaveOutcome::saved()
            }
            Err(e) => {
                log::warn!("Failed to cache settings {}: {}", self.key, e);
                SaveOutcome::failed(StorageErrorKind::from(&e))
            }
        }
    }

    /// Loads the document
    ///
    /// A missing document is not an error: `settings` is `None` with
    /// `available = true`.
    pub fn load(&self) -> LoadOutcome {
        if !self.store.is_available() {
            return LoadOutcome {
                available: false,
                settings: None,
                error: Some(StorageErrorKind::Unavailable),
            };
        }

        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return LoadOutcome {
                    available: true,
                    settings: None,
                    error: None,
                }
            }
            Err(e) => {
                log::warn!("Failed to read cached settings {}: {}", self.key, e);
                return LoadOutcome {
                    available: false,
                    settings: None,
                    error: Some(StorageErrorKind::from(&e)),
                };
            }
        };

        match self.decode(&raw) {
            Some(settings) => LoadOutcome {
                available: true,
                settings: Some(settings),
                error: None,
            },
            None => LoadOutcome {
                available: true,
                settings: None,
                error: Some(StorageErrorKind::Corrupted),
            },
        }
    }

    /// Removes the document
    pub fn clear(&self) -> ClearOutcome {
        match self.store.remove(&self.key) {
            Ok(()) => ClearOutcome { available: true },
            Err(e) => {
                log::warn!("Failed to clear cached settings {}: {}", self.key, e);
                ClearOutcome { available: false }
            }
        }
    }

    fn decode(&self, raw: &str) -> Option<UserSettings> {
        let mut settings: UserSettings = match serde_json::from_str(raw) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Cached settings {} are unreadable: {}", self.key, e);
                return None;
            }
        };

        match settings.sanitize() {
            Ok(repaired) => {
                if !repaired.is_empty() {
                    log::warn!("Clamped cached settings {}: {:?}", self.key, repaired);
                }
                Some(settings)
            }
            Err(errors) => {
                log::warn!(
                    "Cached settings {} failed validation: {:?}",
                    self.key,
                    errors
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use kpiboard_settings::ConfigEntry;

    fn adapter_with(store: MemoryStore) -> PersistenceAdapter {
        PersistenceAdapter::new(Arc::new(store), "user-1")
    }

    #[test]
    fn test_key_includes_user() {
        let adapter = adapter_with(MemoryStore::new());
        assert_eq!(adapter.key(), "kpiboard.settings.user-1");
    }

    #[test]
    fn test_save_and_load() {
        let adapter = adapter_with(MemoryStore::new());
        let settings = UserSettings::new_default("user-1");

        assert!(adapter.save(&settings).is_ok());
        let loaded = adapter.load();
        assert!(loaded.available);
        assert_eq!(loaded.settings, Some(settings));
    }

    #[test]
    fn test_load_empty_store() {
        let adapter = adapter_with(MemoryStore::new());
        let loaded = adapter.load();
        assert!(loaded.available);
        assert!(loaded.settings.is_none());
        assert!(loaded.error.is_none());
    }

    #[test]
    fn test_save_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        let adapter = adapter_with(store);

        let outcome = adapter.save(&UserSettings::new_default("user-1"));
        assert!(!outcome.available);
        assert_eq!(outcome.error, Some(StorageErrorKind::Unavailable));
        assert!(!adapter.load().available);
    }

    #[test]
    fn test_quota_exceeded() {
        let adapter = adapter_with(MemoryStore::with_quota(64));
        let outcome = adapter.save(&UserSettings::new_default("user-1"));
        assert_eq!(
            outcome,
            SaveOutcome {
                available: false,
                error: Some(StorageErrorKind::QuotaExceeded),
            }
        );
    }

    #[test]
    fn test_corrupted_payload() {
        let store = MemoryStore::new();
        store.set("kpiboard.settings.user-1", "{\"userId\": 12").unwrap();
        let loaded = adapter_with(store).load();
        assert!(loaded.available);
        assert!(loaded.settings.is_none());
        assert_eq!(loaded.error, Some(StorageErrorKind::Corrupted));
    }

    #[test]
    fn test_invalid_document_not_saved() {
        let adapter = adapter_with(MemoryStore::new());
        let mut settings = UserSettings::new_default("user-1");
        settings
            .peg_configurations
            .push(ConfigEntry::with_id("p1", "dangling").with_dependency("nope"));

        let outcome = adapter.save(&settings);
        assert_eq!(outcome.error, Some(StorageErrorKind::SerializationError));
        assert!(adapter.load().settings.is_none());
    }

    #[test]
    fn test_clear() {
        let adapter = adapter_with(MemoryStore::new());
        adapter.save(&UserSettings::new_default("user-1"));
        assert!(adapter.clear().available);
        assert!(adapter.load().settings.is_none());
    }
}
