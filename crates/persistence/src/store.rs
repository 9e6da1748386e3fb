// crates/persistence/src/store.rs
//! Key/value store abstraction and the in-memory implementation

use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Default quota for local stores (5 MiB, the usual browser storage budget)
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Quota-aware string key/value storage
///
/// Operations are synchronous and bounded. A failed `set` must leave any
/// previously stored value for the key intact.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Returns false when the store cannot currently be used
    fn is_available(&self) -> bool {
        true
    }
}

/// In-memory store with a byte quota
///
/// Usage counts the bytes of every key and value. Cloning shares the
/// underlying storage.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    quota_bytes: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates a store with the default quota
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    /// Creates a store with a custom quota
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            quota_bytes: Arc::new(AtomicU64::new(quota_bytes)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Marks the store as (un)available
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of bytes currently used
    pub fn used_bytes(&self) -> u64 {
        self.entries
            .lock()
            .map(|entries| usage(&entries))
            .unwrap_or(0)
    }

    /// Returns the configured quota
    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes.load(Ordering::SeqCst)
    }

    /// Changes the quota; existing entries are kept even if they exceed it
    pub fn set_quota(&self, quota_bytes: u64) {
        self.quota_bytes.store(quota_bytes, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store disabled".to_string()))
        }
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("Lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn usage(entries: &HashMap<String, String>) -> u64 {
    entries
        .iter()
        .map(|(k, v)| (k.len() + v.len()) as u64)
        .sum()
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_available()?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_available()?;
        let mut entries = self.lock()?;

        let current = usage(&entries);
        let replaced = entries
            .get(key)
            .map(|old| (key.len() + old.len()) as u64)
            .unwrap_or(0);
        let needed = current - replaced + (key.len() + value.len()) as u64;
        let quota = self.quota_bytes();
        if needed > quota {
            return Err(StoreError::QuotaExceeded { needed, quota });
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.ensure_available()?;
        self.lock()?.remove(key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
