// crates/sync-engine/src/error.rs
//! Error types for sync operations

use kpiboard_persistence::StorageErrorKind;
use kpiboard_resilience::TimedOut;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse error taxonomy surfaced to the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unavailable,
    QuotaExceeded,
    SerializationError,
    NetworkError,
    CorruptionDetected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::CorruptionDetected => "CORRUPTION_DETECTED",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store inaccessible
    #[error("Local store unavailable: {0}")]
    Unavailable(String),

    /// Local store full
    #[error("Local storage quota exceeded")]
    QuotaExceeded,

    /// Document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Remote call failed
    #[error("Network error: {0}")]
    Network(String),

    /// Document failed structural validation
    #[error("Corrupted settings document: {0}")]
    Corruption(String),

    /// An update would make the document invalid
    #[error("Invalid settings: {0}")]
    Invalid(String),

    /// No settings loaded yet
    #[error("Sync engine not initialized")]
    NotInitialized,

    /// Remote call exceeded its deadline
    #[error("Remote call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A cycle is already running
    #[error("Sync already in progress")]
    AlreadySyncing,

    /// The manager was stopped
    #[error("Sync manager stopped")]
    Stopped,

    /// Internal state could not be accessed
    #[error("{0}")]
    Custom(String),
}

impl SyncError {
    /// Maps the error onto the UI-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_)
            | Self::AlreadySyncing
            | Self::Stopped
            | Self::NotInitialized
            | Self::Custom(_) => ErrorKind::Unavailable,
            Self::QuotaExceeded => ErrorKind::QuotaExceeded,
            Self::Serialization(_) => ErrorKind::SerializationError,
            Self::Network(_) | Self::Timeout(_) => ErrorKind::NetworkError,
            Self::Corruption(_) | Self::Invalid(_) => ErrorKind::CorruptionDetected,
        }
    }

    /// Corruption is never retried; the manager resets instead
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Corruption(_) | Self::Invalid(_))
    }

    pub(crate) fn lock_poisoned() -> Self {
        Self::Custom("Lock poisoned".to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StorageErrorKind> for SyncError {
    fn from(kind: StorageErrorKind) -> Self {
        match kind {
            StorageErrorKind::QuotaExceeded => Self::QuotaExceeded,
            StorageErrorKind::Unavailable => Self::Unavailable("local store".to_string()),
            StorageErrorKind::SerializationError => {
                Self::Serialization("local document".to_string())
            }
            StorageErrorKind::Corrupted => Self::Corruption("local document".to_string()),
        }
    }
}

impl From<TimedOut> for SyncError {
    fn from(TimedOut(duration): TimedOut) -> Self {
        Self::Timeout(duration)
    }
}
