// crates/settings/src/lib.rs
//! Canonical user settings document for the KPI dashboard
//!
//! This crate owns the single document that gets synchronized between the
//! local cache and the preferences server:
//! - `UserSettings` and its preference sections
//! - Structural validation (unique ids, resolvable dependencies, no cycles)
//! - The backend (wire) document shape and the mapper between both shapes
//! - Timestamp ordering helpers used for conflict resolution
//!
//! # Example
//!
//! ```rust
//! use kpiboard_settings::{to_backend, to_user_settings, UserSettings};
//!
//! let settings = UserSettings::new_default("user-42");
//! let backend = to_backend(&settings);
//! assert_eq!(to_user_settings(&backend), settings);
//! ```

mod backend;
mod error;
mod mapper;
mod model;
mod timestamp;
mod validation;

pub use backend::{
    BackendChartConfig, BackendConfigEntry, BackendDashboardConfig, BackendDocument,
    BackendFilterConfig,
};
pub use error::{SettingsError, SettingsResult, ValidationError};
pub use mapper::{to_backend, to_user_settings};
pub use model::{
    ChartKind, ChartPreferences, ConfigEntry, DashboardPreferences, DateRange, FilterPreferences,
    Metadata, Preferences, UserSettings,
};
pub use timestamp::{compare_timestamp_strs, compare_timestamps, format_timestamp, parse_timestamp};
pub use validation::{MAX_DECIMAL_PRECISION, MAX_REFRESH_INTERVAL_SECS, RESERVED_ID_CHARS};
