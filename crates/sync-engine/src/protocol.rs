// crates/sync-engine/src/protocol.rs
//! Remote store protocol
//!
//! The server is an opaque document store reached through three calls.
//! Transport failures are reported in the returned structs rather than
//! raised, and every call must be idempotent so it can be retried.

use async_trait::async_trait;
use kpiboard_settings::BackendDocument;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Response to a preferences fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFetch {
    /// Whether the call succeeded
    pub success: bool,
    /// The server has no document for this user yet
    pub is_new: bool,
    /// Raw backend document; decoded by the analyzer so corruption is visible
    pub data: Option<serde_json::Value>,
    /// Error message if any
    pub error: Option<String>,
}

impl RemoteFetch {
    /// Creates a response carrying a document
    pub fn found(data: serde_json::Value) -> Self {
        Self {
            success: true,
            is_new: false,
            data: Some(data),
            error: None,
        }
    }

    /// Creates a response for a user without a document
    pub fn new_user() -> Self {
        Self {
            success: true,
            is_new: true,
            data: None,
            error: None,
        }
    }

    /// Creates an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            is_new: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Response to a save or create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWrite {
    pub success: bool,
    pub error: Option<String>,
}

impl RemoteWrite {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Preferences server
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the user's document
    async fn get_preferences(&self, user_id: &str) -> RemoteFetch;

    /// Replaces the user's document
    async fn save_preferences(&self, user_id: &str, document: &BackendDocument) -> RemoteWrite;

    /// Creates the first document for `document.user_id`
    async fn create_preferences(&self, document: &BackendDocument) -> RemoteWrite;
}

/// In-memory remote store with failure injection
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    documents: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    failing: Arc<AtomicBool>,
    fail_next: Arc<AtomicUsize>,
    latency: Arc<Mutex<Option<Duration>>>,
    fetches: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document as the server would
    pub fn insert(&self, user_id: &str, document: &BackendDocument) {
        match document.to_json() {
            Ok(value) => self.insert_raw(user_id, value),
            Err(e) => log::warn!("Cannot encode document for {}: {}", user_id, e),
        }
    }

    /// Stores arbitrary JSON, e.g. a damaged document
    pub fn insert_raw(&self, user_id: &str, value: serde_json::Value) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(user_id.to_string(), value);
        }
    }

    pub fn raw(&self, user_id: &str) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(user_id).cloned())
    }

    /// Decodes the stored document, if it is readable
    pub fn document(&self, user_id: &str) -> Option<BackendDocument> {
        self.raw(user_id)
            .and_then(|value| BackendDocument::from_json(value).ok())
    }

    /// Makes every call fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes the next `count` calls fail
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delays every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of save and create calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<(), String> {
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err("server unreachable".to_string());
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err("injected failure".to_string());
        }
        Ok(())
    }

    fn store(&self, user_id: &str, document: &BackendDocument) -> RemoteWrite {
        let value = match document.to_json() {
            Ok(value) => value,
            Err(e) => return RemoteWrite::error(e.to_string()),
        };
        match self.documents.lock() {
            Ok(mut documents) => {
                documents.insert(user_id.to_string(), value);
                RemoteWrite::ok()
            }
            Err(_) => RemoteWrite::error("Lock poisoned"),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_preferences(&self, user_id: &str) -> RemoteFetch {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.begin_call().await {
            return RemoteFetch::error(e);
        }
        match self.raw(user_id) {
            Some(value) => RemoteFetch::found(value),
            None => RemoteFetch::new_user(),
        }
    }

    async fn save_preferences(&self, user_id: &str, document: &BackendDocument) -> RemoteWrite {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.begin_call().await {
            return RemoteWrite::error(e);
        }
        self.store(user_id, document)
    }

    async fn create_preferences(&self, document: &BackendDocument) -> RemoteWrite {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.begin_call().await {
            return RemoteWrite::error(e);
        }
        // Creating twice is a no-op replace, keeping retries idempotent
        self.store(&document.user_id, document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpiboard_settings::{to_backend, UserSettings};

    #[tokio::test]
    async fn test_new_user_then_found() {
        let store = MemoryRemoteStore::new();
        let fetch = store.get_preferences("user-1").await;
        assert!(fetch.success);
        assert!(fetch.is_new);

        let doc = to_backend(&UserSettings::new_default("user-1"));
        assert!(store.create_preferences(&doc).await.success);

        let fetch = store.get_preferences("user-1").await;
        assert!(!fetch.is_new);
        assert_eq!(store.document("user-1"), Some(doc));
        assert_eq!(store.fetch_count(), 2);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let store = MemoryRemoteStore::new();
        store.fail_next(2);

        assert!(!store.get_preferences("user-1").await.success);
        assert!(!store.get_preferences("user-1").await.success);
        assert!(store.get_preferences("user-1").await.success);
    }

    #[tokio::test]
    async fn test_failing_store_reports_error() {
        let store = MemoryRemoteStore::new();
        store.set_failing(true);
        let doc = to_backend(&UserSettings::new_default("user-1"));

        let write = store.save_preferences("user-1", &doc).await;
        assert!(!write.success);
        assert!(write.error.is_some());
        assert!(store.raw("user-1").is_none());
    }

    #[test]
    fn test_fetch_serializes_camel_case() {
        let json = serde_json::to_value(RemoteFetch::new_user()).unwrap();
        assert_eq!(json["isNew"], true);
    }
}
