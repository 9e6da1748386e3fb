// crates/sync-engine/src/conflict.rs
//! Conflict detection and classification
//!
//! The analyzer diffs two snapshots of a user's settings, decides which side
//! changed each differing field and classifies the divergence:
//!
//! - With a base (the last snapshot both sides agreed on), a field changed
//!   by only one side is attributed to that side.
//! - Without a base, per-field timestamps attribute changes and the document
//!   version/timestamp pair gives the overall direction.
//!
//! Severity is looked up in fixed field tables, never inferred.

use crate::diff::{self, ChangeOrigin, Difference, FieldPath, RawDifference};
use kpiboard_settings::{compare_timestamps, to_user_settings, BackendDocument, UserSettings};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

/// Fields whose change is structurally significant
///
/// Metadata never reaches the diff; its changes are not differences.
pub const STRUCTURAL_FIELDS: &[&str] = &["userId"];

/// Entry fields that are structural inside either configuration list
pub const STRUCTURAL_ENTRY_FIELDS: &[&str] = &["id", "dependencies"];

/// Fields that only affect presentation
pub const DISPLAY_ONLY_FIELDS: &[&str] = &[
    "preferences.dashboard.chartStyle",
    "preferences.dashboard.showLegend",
    "preferences.dashboard.showGrid",
    "preferences.charts.showComparison",
    "preferences.charts.showDelta",
    "preferences.charts.showRsd",
    "preferences.charts.chartType",
    "preferences.charts.decimalPrecision",
    "preferences.filters",
];

/// This many differences make a display-only divergence `Medium`
pub const BULK_CHANGE_THRESHOLD: usize = 10;

/// Kind of divergence between the two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    NoConflict,
    /// Both sides changed since their last common version
    ConcurrentEdit,
    /// Only the remote side changed; local is behind
    StaleLocal,
    /// Only the local side changed; remote is behind
    StaleRemote,
    /// A document is structurally invalid
    CorruptionDetected,
}

/// How significant a divergence is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Which snapshot failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptedSide {
    Local,
    Remote,
    Both,
}

/// Result of comparing two snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub has_conflict: bool,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub differences: Vec<Difference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrupted: Option<CorruptedSide>,
    /// Validation or parse failures behind a corruption report
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl ConflictReport {
    /// A report for identical (or one-sided) snapshots
    pub fn none() -> Self {
        Self {
            has_conflict: false,
            conflict_type: ConflictType::NoConflict,
            severity: Severity::Low,
            differences: Vec::new(),
            corrupted: None,
            issues: Vec::new(),
        }
    }

    fn corruption(side: CorruptedSide, issues: Vec<String>) -> Self {
        Self {
            has_conflict: true,
            conflict_type: ConflictType::CorruptionDetected,
            severity: Severity::High,
            differences: Vec::new(),
            corrupted: Some(side),
            issues,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.conflict_type == ConflictType::CorruptionDetected
    }

    /// Number of differences at `Severity::High`
    pub fn high_severity_count(&self) -> usize {
        self.differences
            .iter()
            .filter(|d| severity_of(&d.path) == Severity::High)
            .count()
    }
}

/// Severity of a single differing path
pub fn severity_of(path: &FieldPath) -> Severity {
    if path.is_whole_entry() {
        return Severity::High;
    }
    if path.config_entry().is_some() {
        // Entry fields: `pegConfigurations[id].<field>...`
        return match path.segments().get(2) {
            Some(crate::diff::PathSegment::Key(field))
                if STRUCTURAL_ENTRY_FIELDS.contains(&field.as_str()) =>
            {
                Severity::High
            }
            _ => Severity::Medium,
        };
    }

    let rendered = path.to_string();
    if matches_table(&rendered, STRUCTURAL_FIELDS) {
        Severity::High
    } else if matches_table(&rendered, DISPLAY_ONLY_FIELDS) {
        Severity::Low
    } else {
        Severity::Medium
    }
}

fn matches_table(path: &str, table: &[&str]) -> bool {
    table.iter().any(|field| {
        path == *field
            || path
                .strip_prefix(field)
                .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
    })
}

/// Compares settings snapshots
pub struct ConflictAnalyzer;

impl ConflictAnalyzer {
    /// Analyzes two snapshots without a common base
    pub fn analyze(local: Option<&UserSettings>, remote: Option<&UserSettings>) -> ConflictReport {
        Self::analyze_with_base(None, local, remote)
    }

    /// Analyzes two snapshots against the last snapshot both sides agreed on
    ///
    /// A missing side is not a conflict; the resolution engine propagates
    /// the present side instead.
    pub fn analyze_with_base(
        base: Option<&UserSettings>,
        local: Option<&UserSettings>,
        remote: Option<&UserSettings>,
    ) -> ConflictReport {
        let (Some(local), Some(remote)) = (local, remote) else {
            return ConflictReport::none();
        };

        let local_issues = validation_issues(local);
        let remote_issues = validation_issues(remote);
        match (local_issues.is_empty(), remote_issues.is_empty()) {
            (true, true) => {}
            (false, true) => return ConflictReport::corruption(CorruptedSide::Local, local_issues),
            (true, false) => {
                return ConflictReport::corruption(CorruptedSide::Remote, remote_issues)
            }
            (false, false) => {
                let mut issues = local_issues;
                issues.extend(remote_issues);
                return ConflictReport::corruption(CorruptedSide::Both, issues);
            }
        }

        let views = (diff::to_view(local), diff::to_view(remote));
        let (local_view, remote_view) = match views {
            (Ok(l), Ok(r)) => (l, r),
            (Err(e), _) => {
                return ConflictReport::corruption(CorruptedSide::Local, vec![e.to_string()])
            }
            (_, Err(e)) => {
                return ConflictReport::corruption(CorruptedSide::Remote, vec![e.to_string()])
            }
        };

        let raw = diff::diff_views(&local_view, &remote_view);
        if raw.is_empty() {
            return ConflictReport::none();
        }

        let base_view = base.and_then(|b| diff::to_view(b).ok());
        let differences: Vec<Difference> = raw
            .into_iter()
            .map(|raw| {
                let origin = match &base_view {
                    Some(base_view) => origin_from_base(base_view, &raw),
                    None => origin_from_stamps(local, remote, &raw.path),
                };
                Difference {
                    path: raw.path,
                    local_value: raw.local_value,
                    remote_value: raw.remote_value,
                    origin,
                }
            })
            .collect();

        let conflict_type = classify(&differences, base_view.is_some(), local, remote);
        let severity = report_severity(&differences);

        ConflictReport {
            has_conflict: true,
            conflict_type,
            severity,
            differences,
            corrupted: None,
            issues: Vec::new(),
        }
    }

    /// Analyzes a raw remote document as fetched from the server
    ///
    /// Returns the report together with the decoded remote snapshot, which
    /// is `None` when the document could not be decoded.
    pub fn analyze_raw_remote(
        base: Option<&UserSettings>,
        local: Option<&UserSettings>,
        raw: &Value,
    ) -> (ConflictReport, Option<UserSettings>) {
        let document = match BackendDocument::from_json(raw.clone()) {
            Ok(document) => document,
            Err(e) => {
                log::warn!("Remote settings document is unreadable: {}", e);
                return (
                    ConflictReport::corruption(CorruptedSide::Remote, vec![e.to_string()]),
                    None,
                );
            }
        };

        let mut remote = to_user_settings(&document);
        let repaired = remote.clamp_ranges();
        if !repaired.is_empty() {
            log::warn!(
                "Clamped out-of-range remote settings: {}",
                repaired
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }
        let report = Self::analyze_with_base(base, local, Some(&remote));
        (report, Some(remote))
    }

    /// Lists the differences between two snapshots; origins are `Unknown`
    pub fn diff(local: &UserSettings, remote: &UserSettings) -> Vec<Difference> {
        let (Ok(local_view), Ok(remote_view)) = (diff::to_view(local), diff::to_view(remote))
        else {
            return Vec::new();
        };
        diff::diff_views(&local_view, &remote_view)
            .into_iter()
            .map(|raw| Difference {
                path: raw.path,
                local_value: raw.local_value,
                remote_value: raw.remote_value,
                origin: ChangeOrigin::Unknown,
            })
            .collect()
    }
}

/// Structural failures only; out-of-range values are ordinary differences
fn validation_issues(settings: &UserSettings) -> Vec<String> {
    match settings.validate_structure() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    }
}

fn origin_from_base(base: &Value, raw: &RawDifference) -> ChangeOrigin {
    let base_value = diff::value_at(base, &raw.path);
    let local_changed = raw.local_value.as_ref() != base_value;
    let remote_changed = raw.remote_value.as_ref() != base_value;
    match (local_changed, remote_changed) {
        (true, true) => ChangeOrigin::Both,
        (true, false) => ChangeOrigin::Local,
        (false, true) => ChangeOrigin::Remote,
        (false, false) => ChangeOrigin::Unknown,
    }
}

fn origin_from_stamps(local: &UserSettings, remote: &UserSettings, path: &FieldPath) -> ChangeOrigin {
    let key = path.to_string();
    match (
        local.metadata.field_timestamp(&key),
        remote.metadata.field_timestamp(&key),
    ) {
        (Some(_), Some(_)) => ChangeOrigin::Both,
        (Some(_), None) => ChangeOrigin::Local,
        (None, Some(_)) => ChangeOrigin::Remote,
        (None, None) => ChangeOrigin::Unknown,
    }
}

fn classify(
    differences: &[Difference],
    has_base: bool,
    local: &UserSettings,
    remote: &UserSettings,
) -> ConflictType {
    let local_side = differences
        .iter()
        .any(|d| matches!(d.origin, ChangeOrigin::Local | ChangeOrigin::Both));
    let remote_side = differences
        .iter()
        .any(|d| matches!(d.origin, ChangeOrigin::Remote | ChangeOrigin::Both));
    let unknown = differences
        .iter()
        .any(|d| d.origin == ChangeOrigin::Unknown);

    if local_side && remote_side {
        return ConflictType::ConcurrentEdit;
    }
    if has_base || !unknown {
        if local_side {
            return ConflictType::StaleRemote;
        }
        if remote_side {
            return ConflictType::StaleLocal;
        }
    }

    // A side with an attributed change is never the stale one
    match document_direction(local, remote) {
        Some(Ordering::Greater) if !remote_side => ConflictType::StaleRemote,
        Some(Ordering::Less) if !local_side => ConflictType::StaleLocal,
        _ => ConflictType::ConcurrentEdit,
    }
}

/// Which document is newer, when version and timestamp agree
///
/// `None` means the two signals contradict each other.
pub(crate) fn document_direction(local: &UserSettings, remote: &UserSettings) -> Option<Ordering> {
    let by_time = compare_timestamps(local.last_modified(), remote.last_modified());
    let by_version = local.metadata.version.cmp(&remote.metadata.version);
    match (by_time, by_version) {
        (Ordering::Equal, by_version) => Some(by_version),
        (by_time, Ordering::Equal) => Some(by_time),
        (by_time, by_version) if by_time == by_version => Some(by_time),
        _ => None,
    }
}

fn report_severity(differences: &[Difference]) -> Severity {
    let max = differences
        .iter()
        .map(|d| severity_of(&d.path))
        .max()
        .unwrap_or(Severity::Low);
    if max == Severity::Low && differences.len() >= BULK_CHANGE_THRESHOLD {
        Severity::Medium
    } else {
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kpiboard_settings::{to_backend, ChartKind, ConfigEntry};
    use serde_json::json;

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn settings() -> UserSettings {
        let mut settings = UserSettings::new_default_at("user-1", at(0));
        settings.peg_configurations = vec![
            ConfigEntry::with_id("p1", "Drop rate"),
            ConfigEntry::with_id("p2", "Setup time").with_dependency("p1"),
        ];
        settings
    }

    #[test]
    fn test_identical_snapshots_have_no_conflict() {
        let local = settings();
        let report = ConflictAnalyzer::analyze(Some(&local), Some(&local.clone()));
        assert!(!report.has_conflict);
        assert_eq!(report.conflict_type, ConflictType::NoConflict);
        assert!(report.differences.is_empty());
    }

    #[test]
    fn test_metadata_only_difference_is_not_a_conflict() {
        let local = settings();
        let mut remote = local.clone();
        remote.touch(at(60));
        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert!(!report.has_conflict);
    }

    #[test]
    fn test_absent_side_is_not_a_conflict() {
        let local = settings();
        assert!(!ConflictAnalyzer::analyze(Some(&local), None).has_conflict);
        assert!(!ConflictAnalyzer::analyze(None, Some(&local)).has_conflict);
    }

    #[test]
    fn test_severity_tables() {
        assert_eq!(severity_of(&FieldPath::parse("userId")), Severity::High);
        assert!(STRUCTURAL_FIELDS.iter().all(|f| !f.starts_with("metadata")));
        assert_eq!(
            severity_of(&FieldPath::parse("pegConfigurations[p1]")),
            Severity::High
        );
        assert_eq!(
            severity_of(&FieldPath::parse("pegConfigurations[p1].dependencies")),
            Severity::High
        );
        assert_eq!(
            severity_of(&FieldPath::parse("pegConfigurations[p1].enabled")),
            Severity::Medium
        );
        assert_eq!(
            severity_of(&FieldPath::parse("preferences.dashboard.chartStyle")),
            Severity::Low
        );
        assert_eq!(
            severity_of(&FieldPath::parse("preferences.filters.locale")),
            Severity::Low
        );
        assert_eq!(
            severity_of(&FieldPath::parse("preferences.dashboard.autoRefreshInterval")),
            Severity::Medium
        );
    }

    #[test]
    fn test_display_only_divergence_is_low() {
        let local = settings();
        let mut remote = local.clone();
        remote.preferences.dashboard.show_grid = false;
        remote.touch(at(10));

        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert!(report.has_conflict);
        assert_eq!(report.severity, Severity::Low);
        assert_eq!(report.conflict_type, ConflictType::StaleLocal);
    }

    #[test]
    fn test_many_display_changes_raise_severity() {
        let local = settings();
        let mut remote = local.clone();
        remote.preferences.dashboard.chart_style = ChartKind::Bar;
        remote.preferences.dashboard.show_grid = false;
        remote.preferences.dashboard.show_legend = false;
        remote.preferences.charts.show_comparison = !local.preferences.charts.show_comparison;
        remote.preferences.charts.show_delta = !local.preferences.charts.show_delta;
        remote.preferences.charts.show_rsd = !local.preferences.charts.show_rsd;
        remote.preferences.charts.chart_type = ChartKind::Scatter;
        remote.preferences.charts.decimal_precision = 4;
        remote.preferences.filters.locale = "de-DE".to_string();
        remote.preferences.filters.date_format = "dd.MM.yyyy".to_string();

        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert_eq!(report.differences.len(), 10);
        assert_eq!(report.severity, Severity::Medium);
    }

    #[test]
    fn test_base_attributes_changes() {
        let base = settings();

        let mut local = base.clone();
        local.preferences.dashboard.auto_refresh_interval = 30;
        local.touch(at(10));

        let mut remote = base.clone();
        remote.preferences.dashboard.chart_style = ChartKind::Bar;
        remote.touch(at(20));

        let report = ConflictAnalyzer::analyze_with_base(Some(&base), Some(&local), Some(&remote));
        assert_eq!(report.conflict_type, ConflictType::ConcurrentEdit);
        let origins: Vec<_> = report
            .differences
            .iter()
            .map(|d| (d.path.to_string(), d.origin))
            .collect();
        assert!(origins.contains(&(
            "preferences.dashboard.autoRefreshInterval".to_string(),
            ChangeOrigin::Local
        )));
        assert!(origins.contains(&(
            "preferences.dashboard.chartStyle".to_string(),
            ChangeOrigin::Remote
        )));
    }

    #[test]
    fn test_base_detects_stale_remote() {
        let base = settings();
        let mut local = base.clone();
        local.peg_configurations[0].enabled = false;
        local.touch(at(10));

        let report =
            ConflictAnalyzer::analyze_with_base(Some(&base), Some(&local), Some(&base.clone()));
        assert_eq!(report.conflict_type, ConflictType::StaleRemote);
        assert_eq!(report.severity, Severity::Medium);
    }

    #[test]
    fn test_contradicting_direction_is_concurrent() {
        let local = settings();
        let mut remote = local.clone();
        remote.preferences.dashboard.show_grid = false;
        // Newer timestamp but lower version
        remote.metadata.last_modified = Some(at(100));
        let mut local = local;
        local.metadata.version = 5;

        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert_eq!(report.conflict_type, ConflictType::ConcurrentEdit);
    }

    #[test]
    fn test_stamped_local_edit_is_never_stale() {
        let origin = settings();

        let mut local = origin.clone();
        local.preferences.dashboard.auto_refresh_interval = 30;
        local.metadata.field_modified.insert(
            "preferences.dashboard.autoRefreshInterval".to_string(),
            at(10),
        );
        local.touch(at(10));

        // Written by a client that does not stamp fields
        let mut remote = origin.clone();
        remote.preferences.dashboard.chart_style = ChartKind::Bar;
        remote.touch(at(20));

        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert_eq!(report.conflict_type, ConflictType::ConcurrentEdit);
        let origins: Vec<_> = report
            .differences
            .iter()
            .map(|d| (d.path.to_string(), d.origin))
            .collect();
        assert!(origins.contains(&(
            "preferences.dashboard.autoRefreshInterval".to_string(),
            ChangeOrigin::Local
        )));
        assert!(origins.contains(&(
            "preferences.dashboard.chartStyle".to_string(),
            ChangeOrigin::Unknown
        )));
    }

    #[test]
    fn test_stamped_remote_edit_is_never_stale() {
        let origin = settings();

        let mut local = origin.clone();
        local.preferences.dashboard.show_grid = false;
        local.touch(at(20));

        let mut remote = origin.clone();
        remote.preferences.filters.locale = "fr-FR".to_string();
        remote
            .metadata
            .field_modified
            .insert("preferences.filters.locale".to_string(), at(10));
        remote.touch(at(10));

        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert_eq!(report.conflict_type, ConflictType::ConcurrentEdit);
    }

    #[test]
    fn test_dangling_dependency_is_corruption() {
        let local = settings();
        let mut remote = local.clone();
        remote.peg_configurations[1].dependencies = vec!["missing".to_string()];

        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert!(report.is_corruption());
        assert_eq!(report.corrupted, Some(CorruptedSide::Remote));
        assert_eq!(report.severity, Severity::High);
    }

    #[test]
    fn test_out_of_range_remote_is_not_corruption() {
        let local = settings();
        let mut remote = local.clone();
        remote.preferences.charts.decimal_precision = 12;
        remote.touch(at(10));

        let report = ConflictAnalyzer::analyze(Some(&local), Some(&remote));
        assert!(!report.is_corruption());
        assert!(report.has_conflict);
    }

    #[test]
    fn test_raw_remote_out_of_range_values_are_clamped() {
        let local = settings();
        let mut document = to_backend(&local);
        document.chart_config.decimals = 12;
        let raw = document.to_json().unwrap();

        let (report, remote) = ConflictAnalyzer::analyze_raw_remote(None, Some(&local), &raw);
        assert!(!report.is_corruption());
        let remote = remote.unwrap();
        assert_eq!(
            remote.preferences.charts.decimal_precision,
            kpiboard_settings::MAX_DECIMAL_PRECISION
        );
        assert!(remote.validate().is_ok());
    }

    #[test]
    fn test_unreadable_raw_remote_is_corruption() {
        let local = settings();
        let mut raw = to_backend(&local).to_json().unwrap();
        raw["peg_configs"] = json!("[{\"id\": \"p1\", \"na");
        raw.as_object_mut().unwrap().remove("updated_at");

        let (report, remote) = ConflictAnalyzer::analyze_raw_remote(None, Some(&local), &raw);
        assert!(report.is_corruption());
        assert_eq!(report.corrupted, Some(CorruptedSide::Remote));
        assert!(remote.is_none());
    }

    #[test]
    fn test_raw_remote_roundtrip_has_no_conflict() {
        let local = settings();
        let raw = to_backend(&local).to_json().unwrap();
        let (report, remote) = ConflictAnalyzer::analyze_raw_remote(None, Some(&local), &raw);
        assert!(!report.has_conflict);
        assert_eq!(remote, Some(local));
    }
}
