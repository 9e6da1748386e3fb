// crates/persistence/src/error.rs
//! Error types for local stores

use std::path::PathBuf;
use thiserror::Error;

/// Result type for key/value store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a `KeyValueStore`
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store cannot be accessed at all
    #[error("Local store unavailable: {0}")]
    Unavailable(String),

    /// Write would exceed the store's quota
    #[error("Local store quota exceeded (needed {needed} bytes, quota {quota} bytes)")]
    QuotaExceeded { needed: u64, quota: u64 },

    /// Failed to read a stored value
    #[error("Failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a stored value
    #[error("Failed to write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    /// Returns true if this error is a quota failure
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}
