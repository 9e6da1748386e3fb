// crates/sync-engine/src/lib.rs
//! Settings synchronization engine
//!
//! This crate keeps a user's dashboard settings consistent between the
//! local cache and the preferences server:
//! - Conflict analysis between two snapshots (with an optional common base)
//! - Last-write-wins resolution strategies with a confidence score
//! - Per-field edit tracking
//! - A background manager that polls, debounces edits, retries failed
//!   cycles and holds low-confidence resolutions for review
//!
//! # Example
//!
//! ```rust
//! use kpiboard_settings::UserSettings;
//! use kpiboard_sync_engine::{
//!     ConflictAnalyzer, ConflictType, ResolutionAction, ResolutionEngine, ResolutionStrategy,
//! };
//!
//! let local = UserSettings::new_default("user-1");
//! let mut remote = local.clone();
//! remote.preferences.dashboard.show_grid = false;
//! remote.touch(chrono::Utc::now() + chrono::Duration::seconds(5));
//!
//! let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
//! assert_eq!(report.conflict_type, ConflictType::StaleLocal);
//!
//! let resolution = ResolutionEngine::resolve(
//!     Some(&local),
//!     Some(&remote),
//!     &report,
//!     ResolutionStrategy::StrictTimestamp,
//! );
//! assert_eq!(resolution.action, ResolutionAction::ApplyServer);
//! ```

mod confidence;
mod conflict;
mod connectivity;
mod diff;
mod engine;
mod error;
mod notify;
mod protocol;
mod resolution;
mod scheduler;
mod tracker;
mod types;

pub use confidence::{
    meets_threshold, Confidence, AMBIGUOUS_FIELD_PENALTY, CONFIDENCE_CERTAIN, CONFIDENCE_HIGH,
    CONFIDENCE_LOW, CONFIDENCE_MEDIUM, HIGH_SEVERITY_PENALTY, MISSING_TIMESTAMP_PENALTY,
};
pub use conflict::{
    severity_of, ConflictAnalyzer, ConflictReport, ConflictType, CorruptedSide, Severity,
    BULK_CHANGE_THRESHOLD, DISPLAY_ONLY_FIELDS, STRUCTURAL_ENTRY_FIELDS, STRUCTURAL_FIELDS,
};
pub use connectivity::NetworkMonitor;
pub use diff::{changed_paths, ChangeOrigin, Difference, FieldPath, PathSegment, CONFIG_LISTS};
pub use engine::{SyncManager, SyncOptions};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use notify::{LogNotifier, Notification, NotificationLevel, NotificationSink, RecordingNotifier};
pub use protocol::{MemoryRemoteStore, RemoteFetch, RemoteStore, RemoteWrite};
pub use resolution::{Resolution, ResolutionAction, ResolutionEngine, ResolutionStrategy};
pub use scheduler::DelayedTask;
pub use tracker::{ChangeTracker, SettingsPatch};
pub use types::{
    PendingConflict, SkipReason, SyncDirection, SyncOutcome, SyncState, SyncStatus,
};
