// crates/sync-engine/src/tracker.rs
//! Change tracking for synchronization

use crate::diff::{changed_paths, FieldPath};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use kpiboard_settings::{
    ChartPreferences, ConfigEntry, DashboardPreferences, FilterPreferences, UserSettings,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Shallow update of a settings document
///
/// Each present section replaces the corresponding section wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub dashboard: Option<DashboardPreferences>,
    pub charts: Option<ChartPreferences>,
    pub filters: Option<FilterPreferences>,
    pub peg_configurations: Option<Vec<ConfigEntry>>,
    pub statistics_configurations: Option<Vec<ConfigEntry>>,
}

impl SettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dashboard(mut self, dashboard: DashboardPreferences) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    pub fn with_charts(mut self, charts: ChartPreferences) -> Self {
        self.charts = Some(charts);
        self
    }

    pub fn with_filters(mut self, filters: FilterPreferences) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_peg_configurations(mut self, entries: Vec<ConfigEntry>) -> Self {
        self.peg_configurations = Some(entries);
        self
    }

    pub fn with_statistics_configurations(mut self, entries: Vec<ConfigEntry>) -> Self {
        self.statistics_configurations = Some(entries);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the patch to `settings` in place
    pub fn apply_to(&self, settings: &mut UserSettings) {
        if let Some(dashboard) = &self.dashboard {
            settings.preferences.dashboard = dashboard.clone();
        }
        if let Some(charts) = &self.charts {
            settings.preferences.charts = charts.clone();
        }
        if let Some(filters) = &self.filters {
            settings.preferences.filters = filters.clone();
        }
        if let Some(entries) = &self.peg_configurations {
            settings.peg_configurations = entries.clone();
        }
        if let Some(entries) = &self.statistics_configurations {
            settings.statistics_configurations = entries.clone();
        }
    }
}

/// Tracks local edits that have not been reconciled with the server
#[derive(Clone, Default)]
pub struct ChangeTracker {
    pending: Arc<Mutex<BTreeSet<String>>>,
}

impl ChangeTracker {
    /// Creates a new change tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the edit that turned `before` into `after`
    ///
    /// Every changed path is stamped in `after.metadata.field_modified`
    /// (replacing stamps below it) and the document is touched. An edit that
    /// changes nothing leaves `after` untouched and returns no paths.
    pub fn record(
        &self,
        before: &UserSettings,
        after: &mut UserSettings,
        now: DateTime<Utc>,
    ) -> SyncResult<Vec<FieldPath>> {
        let paths = changed_paths(before, after)?;
        if paths.is_empty() {
            return Ok(paths);
        }

        let stamps = &mut after.metadata.field_modified;
        for path in &paths {
            let key = path.to_string();
            stamps.retain(|existing, _| !is_below(existing, &key));
            stamps.insert(key, now);
        }
        after.touch(now);

        let mut pending = self.pending.lock().map_err(|_| SyncError::lock_poisoned())?;
        pending.extend(paths.iter().map(|p| p.to_string()));
        log::debug!("Recorded {} changed field(s)", paths.len());

        Ok(paths)
    }

    /// Gets the number of fields edited since the last reconciliation
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Gets the paths edited since the last reconciliation
    pub fn pending_paths(&self) -> SyncResult<Vec<String>> {
        let pending = self.pending.lock().map_err(|_| SyncError::lock_poisoned())?;
        Ok(pending.iter().cloned().collect())
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Clears pending edits after a successful sync
    pub fn clear(&self) -> SyncResult<()> {
        let mut pending = self.pending.lock().map_err(|_| SyncError::lock_poisoned())?;
        pending.clear();
        Ok(())
    }
}

fn is_below(candidate: &str, ancestor: &str) -> bool {
    candidate
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
}
