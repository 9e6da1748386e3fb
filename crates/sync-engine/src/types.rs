// crates/sync-engine/src/types.rs
//! Core sync types and data structures

use crate::conflict::ConflictReport;
use crate::error::ErrorKind;
use crate::resolution::{Resolution, ResolutionAction};
use chrono::{DateTime, Utc};
use kpiboard_settings::UserSettings;
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle status of the background sync manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

/// Observable sync state published to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    /// Set by network observation; preempts any cycle
    pub offline: bool,
    /// Consecutive failed cycles
    pub retry_count: usize,
    /// Last cycle that finished without error
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorKind>,
    /// Local edits not yet reconciled with the server
    pub pending_changes: usize,
    /// A resolution is waiting for the user
    pub awaiting_review: bool,
}

impl SyncState {
    /// Creates a new sync state
    pub fn new(offline: bool) -> Self {
        Self {
            status: SyncStatus::Idle,
            offline,
            retry_count: 0,
            last_sync: None,
            last_error: None,
            pending_changes: 0,
            awaiting_review: false,
        }
    }

    /// Returns true if a cycle is in progress
    pub fn is_syncing(&self) -> bool {
        self.status == SyncStatus::Syncing
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Why a cycle did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadySyncing,
    NotInitialized,
}

/// Which store received a propagated document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ToRemote,
    ToLocal,
}

/// Result of one sync cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The cycle did not run
    Skipped(SkipReason),
    /// Both sides already agree
    InSync,
    /// One side was absent and received the other
    Propagated(SyncDirection),
    /// A resolution was applied automatically
    Applied {
        action: ResolutionAction,
        confidence: f64,
    },
    /// A resolution fell below the auto-apply threshold and waits for the user
    AwaitingReview {
        action: ResolutionAction,
        confidence: f64,
    },
    /// A corrupted document was replaced
    CorruptionReset,
    /// The cycle hit an I/O error
    Failed(ErrorKind),
    /// The manager was stopped (or the local copy changed) while the cycle ran
    Discarded,
}

impl SyncOutcome {
    /// Returns true if the cycle ended with both stores agreeing
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::InSync | Self::Propagated(_) | Self::Applied { .. } | Self::CorruptionReset
        )
    }
}

/// A conflict that was surfaced instead of applied
#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub id: String,
    pub detected_at: DateTime<Utc>,
    pub report: ConflictReport,
    pub resolution: Resolution,
    /// Local snapshot the resolution was computed from
    pub local: UserSettings,
    /// Remote snapshot the resolution was computed from
    pub remote: UserSettings,
}

impl PendingConflict {
    pub(crate) fn new(
        report: ConflictReport,
        resolution: Resolution,
        local: UserSettings,
        remote: UserSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            detected_at: Utc::now(),
            report,
            resolution,
            local,
            remote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_creation() {
        let state = SyncState::new(true);
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.offline);
        assert!(!state.is_syncing());
        assert!(state.last_sync.is_none());
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_value(SyncState::default()).unwrap();
        assert_eq!(json["status"], "IDLE");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["awaitingReview"], false);
    }

    #[test]
    fn test_settled_outcomes() {
        assert!(SyncOutcome::InSync.is_settled());
        assert!(SyncOutcome::Propagated(SyncDirection::ToRemote).is_settled());
        assert!(!SyncOutcome::Skipped(SkipReason::Offline).is_settled());
        assert!(!SyncOutcome::Failed(ErrorKind::NetworkError).is_settled());
        assert!(!SyncOutcome::Discarded.is_settled());
    }
}
