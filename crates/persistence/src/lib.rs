// crates/persistence/src/lib.rs
//! Local persistence for user settings
//!
//! This crate provides the local side of settings synchronization:
//! - A `KeyValueStore` abstraction over quota-constrained local storage
//! - `MemoryStore` and `FileStore` implementations
//! - `PersistenceAdapter`, a typed save/load/clear layer that never fails
//!   loudly: every failure mode is reported in the returned outcome
//!
//! # Example
//!
//! ```rust
//! use kpiboard_persistence::{MemoryStore, PersistenceAdapter};
//! use kpiboard_settings::UserSettings;
//! use std::sync::Arc;
//!
//! let adapter = PersistenceAdapter::new(Arc::new(MemoryStore::new()), "user-1");
//! let outcome = adapter.save(&UserSettings::new_default("user-1"));
//! assert!(outcome.is_ok());
//! assert!(adapter.load().settings.is_some());
//! ```

mod adapter;
mod error;
mod file_store;
mod store;

pub use adapter::{ClearOutcome, LoadOutcome, PersistenceAdapter, SaveOutcome, StorageErrorKind};
pub use error::{StoreError, StoreResult};
pub use file_store::FileStore;
pub use store::{KeyValueStore, MemoryStore, DEFAULT_QUOTA_BYTES};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_all_exports_accessible() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let _: PersistenceAdapter = PersistenceAdapter::new(store, "user-1");
        let _: StorageErrorKind = StorageErrorKind::QuotaExceeded;
    }
}
