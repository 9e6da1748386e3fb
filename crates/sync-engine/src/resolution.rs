// crates/sync-engine/src/resolution.rs
//! Last-write-wins resolution strategies
//!
//! `ResolutionEngine::resolve` is a pure function of the two snapshots, the
//! conflict report and the strategy. It never performs I/O; applying the
//! decision is the sync manager's job.

use crate::confidence::{
    meets_threshold, Confidence, AMBIGUOUS_FIELD_PENALTY, CONFIDENCE_LOW, CONFIDENCE_MEDIUM,
    HIGH_SEVERITY_PENALTY, MISSING_TIMESTAMP_PENALTY,
};
use crate::conflict::{ConflictReport, ConflictType};
use crate::diff::{self, ChangeOrigin, Difference, FieldPath, CONFIG_LISTS};
use chrono::{DateTime, Utc};
use kpiboard_settings::{compare_timestamps, format_timestamp, Metadata, UserSettings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Selectable resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Whole document from the side with the later `last_modified`
    StrictTimestamp,
    /// Each differing field from the side that modified it last
    FieldLevelLww,
    /// Disjoint changes merged, overlapping ones by timestamp
    SmartMerge,
    /// Smart merge, held for review when structural fields change
    #[default]
    HybridMetadata,
}

impl ResolutionStrategy {
    pub const ALL: [ResolutionStrategy; 4] = [
        Self::StrictTimestamp,
        Self::FieldLevelLww,
        Self::SmartMerge,
        Self::HybridMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictTimestamp => "strict_timestamp",
            Self::FieldLevelLww => "field_level_lww",
            Self::SmartMerge => "smart_merge",
            Self::HybridMetadata => "hybrid_metadata",
        }
    }

    /// Parses a strategy name, case-insensitively
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the sync manager should do with a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Push the local snapshot to the server
    ApplyLocal,
    /// Store the server snapshot locally
    ApplyServer,
    /// Store the merged snapshot on both sides
    ApplyMerge,
    /// Like `ApplyMerge`, but only after the user confirms
    ApplyMergeWithReview,
    /// Leave both stores untouched
    MaintainCurrent,
}

/// A resolution decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub action: ResolutionAction,
    /// In `[0, 1]`
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_settings: Option<UserSettings>,
    pub reasoning: String,
    pub strategy: ResolutionStrategy,
}

impl Resolution {
    fn new(
        strategy: ResolutionStrategy,
        action: ResolutionAction,
        confidence: Confidence,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            action,
            confidence: confidence.value(),
            merged_settings: None,
            reasoning: reasoning.into(),
            strategy,
        }
    }

    fn with_merged(mut self, merged: UserSettings) -> Self {
        self.merged_settings = Some(merged);
        self
    }

    /// Returns true if the manager may apply this without asking
    pub fn can_auto_apply(&self, threshold: f64) -> bool {
        self.action != ResolutionAction::ApplyMergeWithReview
            && meets_threshold(self.confidence, threshold)
    }

    /// The snapshot that becomes authoritative if the resolution is applied
    pub fn target(&self, local: &UserSettings, remote: &UserSettings) -> Option<UserSettings> {
        match self.action {
            ResolutionAction::ApplyLocal => Some(local.clone()),
            ResolutionAction::ApplyServer => Some(remote.clone()),
            ResolutionAction::ApplyMerge | ResolutionAction::ApplyMergeWithReview => {
                self.merged_settings.clone()
            }
            ResolutionAction::MaintainCurrent => None,
        }
    }
}

/// Resolves conflicts between a local and a remote snapshot
pub struct ResolutionEngine;

impl ResolutionEngine {
    /// Produces a decision for the two snapshots under `strategy`
    pub fn resolve(
        local: Option<&UserSettings>,
        remote: Option<&UserSettings>,
        report: &ConflictReport,
        strategy: ResolutionStrategy,
    ) -> Resolution {
        let (local, remote) = match (local, remote) {
            (Some(local), Some(remote)) => (local, remote),
            (Some(_), None) => {
                return Resolution::new(
                    strategy,
                    ResolutionAction::ApplyLocal,
                    Confidence::certain(),
                    "No server copy exists; propagating local settings",
                )
            }
            (None, Some(_)) => {
                return Resolution::new(
                    strategy,
                    ResolutionAction::ApplyServer,
                    Confidence::certain(),
                    "No local copy exists; adopting server settings",
                )
            }
            (None, None) => {
                return Resolution::new(
                    strategy,
                    ResolutionAction::MaintainCurrent,
                    Confidence::certain(),
                    "Neither side has settings",
                )
            }
        };

        if report.is_corruption() {
            return Resolution::new(
                strategy,
                ResolutionAction::MaintainCurrent,
                Confidence::zero(),
                format!(
                    "Corrupted document ({}); refusing to merge",
                    report.issues.join("; ")
                ),
            );
        }

        if !report.has_conflict {
            return Resolution::new(
                strategy,
                ResolutionAction::MaintainCurrent,
                Confidence::certain(),
                "Local and server settings already agree",
            );
        }

        let sides = Sides { local, remote };
        match strategy {
            ResolutionStrategy::StrictTimestamp => strict_timestamp(&sides, report),
            ResolutionStrategy::FieldLevelLww => field_level(&sides, report),
            ResolutionStrategy::SmartMerge => smart_merge(&sides, report, strategy),
            ResolutionStrategy::HybridMetadata => hybrid(&sides, report),
        }
    }
}

struct Sides<'a> {
    local: &'a UserSettings,
    remote: &'a UserSettings,
}

impl Sides<'_> {
    fn base_confidence(&self, report: &ConflictReport) -> Confidence {
        let missing = self.local.last_modified().is_none() || self.remote.last_modified().is_none();
        Confidence::certain()
            .penalize(MISSING_TIMESTAMP_PENALTY, usize::from(missing))
            .penalize(HIGH_SEVERITY_PENALTY, report.high_severity_count())
    }

    fn document_order(&self) -> Ordering {
        compare_timestamps(self.local.last_modified(), self.remote.last_modified())
    }

    /// Orders the sides by the time each last modified `path`
    fn field_order(&self, path: &FieldPath) -> Ordering {
        let key = path.to_string();
        compare_timestamps(
            field_stamp(self.local, &key),
            field_stamp(self.remote, &key),
        )
    }

    /// Orders the sides by the latest change anywhere inside one entry
    fn entry_order(&self, list: &str, id: &str) -> Ordering {
        let key = format!("{}[{}]", list, id);
        let stamp = |side: &UserSettings| {
            side.metadata
                .latest_under(&key)
                .or_else(|| field_stamp(side, &key))
        };
        compare_timestamps(stamp(self.local), stamp(self.remote))
    }

    fn ambiguous_count(&self, differences: &[Difference]) -> usize {
        differences
            .iter()
            .filter(|d| self.field_order(&d.path) == Ordering::Equal)
            .count()
    }
}

/// When `key` was last modified on `side`
///
/// A document that tracks field stamps but has none for `key` has not
/// touched it since creation. Untracked documents fall back to their
/// document-level timestamp.
fn field_stamp(side: &UserSettings, key: &str) -> Option<DateTime<Utc>> {
    let meta = &side.metadata;
    meta.field_timestamp(key).or(if meta.field_modified.is_empty() {
        meta.last_modified
    } else {
        meta.created_at
    })
}

fn describe(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| format_timestamp(&ts))
        .unwrap_or_else(|| "unknown".to_string())
}

fn strict_timestamp(sides: &Sides<'_>, report: &ConflictReport) -> Resolution {
    let strategy = ResolutionStrategy::StrictTimestamp;
    let confidence = sides.base_confidence(report);
    let local_ts = describe(sides.local.last_modified());
    let remote_ts = describe(sides.remote.last_modified());

    match sides.document_order() {
        Ordering::Greater => Resolution::new(
            strategy,
            ResolutionAction::ApplyLocal,
            confidence,
            format!(
                "Local settings modified at {} are newer than server settings ({})",
                local_ts, remote_ts
            ),
        ),
        Ordering::Less => Resolution::new(
            strategy,
            ResolutionAction::ApplyServer,
            confidence,
            format!(
                "Server settings modified at {} are newer than local settings ({})",
                remote_ts, local_ts
            ),
        ),
        Ordering::Equal => Resolution::new(
            strategy,
            ResolutionAction::MaintainCurrent,
            confidence.cap(CONFIDENCE_LOW),
            format!(
                "Modification times tie (local {}, server {}); keeping current settings",
                local_ts, remote_ts
            ),
        ),
    }
}

fn field_level(sides: &Sides<'_>, report: &ConflictReport) -> Resolution {
    let strategy = ResolutionStrategy::FieldLevelLww;
    let picks: Vec<(&Difference, Side)> = report
        .differences
        .iter()
        .map(|d| {
            let side = match sides.field_order(&d.path) {
                Ordering::Less => Side::Remote,
                Ordering::Greater | Ordering::Equal => Side::Local,
            };
            (d, side)
        })
        .collect();

    let confidence = sides
        .base_confidence(report)
        .penalize(AMBIGUOUS_FIELD_PENALTY, sides.ambiguous_count(&report.differences));

    match build_merge(sides, &picks, &[]) {
        Ok(merged) => {
            let taken = picks.iter().filter(|(_, s)| *s == Side::Remote).count();
            Resolution::new(
                strategy,
                ResolutionAction::ApplyMerge,
                confidence,
                format!(
                    "Merged field by field: {} from server, {} from local",
                    taken,
                    picks.len() - taken
                ),
            )
            .with_merged(merged)
        }
        Err(reason) => merge_failed(strategy, reason),
    }
}

fn smart_merge(
    sides: &Sides<'_>,
    report: &ConflictReport,
    strategy: ResolutionStrategy,
) -> Resolution {
    let confidence = sides.base_confidence(report);

    // One-sided divergence: the fresher document already contains everything
    match (report.conflict_type, sides.document_order()) {
        (ConflictType::StaleLocal, Ordering::Less) => {
            return Resolution::new(
                strategy,
                ResolutionAction::ApplyServer,
                confidence,
                format!(
                    "Only the server changed ({} fields); adopting server settings",
                    report.differences.len()
                ),
            )
        }
        (ConflictType::StaleRemote, Ordering::Greater) => {
            return Resolution::new(
                strategy,
                ResolutionAction::ApplyLocal,
                confidence,
                format!(
                    "Only local settings changed ({} fields); pushing them to the server",
                    report.differences.len()
                ),
            )
        }
        _ => {}
    }

    // Entries with an overlapping (or unattributed) change are taken whole
    let mut entry_sides: BTreeMap<(String, String), Side> = BTreeMap::new();
    for d in &report.differences {
        let Some((list, id)) = d.path.config_entry() else {
            continue;
        };
        if !matches!(d.origin, ChangeOrigin::Both | ChangeOrigin::Unknown) {
            continue;
        }
        let key = (list.to_string(), id.to_string());
        let side = if d.path.is_whole_entry() {
            // Id union: an entry present on one side survives
            if d.local_value.is_some() {
                Side::Local
            } else {
                Side::Remote
            }
        } else if entry_sides.contains_key(&key) {
            continue;
        } else {
            match sides.entry_order(list, id) {
                Ordering::Less => Side::Remote,
                _ => Side::Local,
            }
        };
        entry_sides.insert(key, side);
    }

    let mut by_timestamp = 0;
    let picks: Vec<(&Difference, Side)> = report
        .differences
        .iter()
        .map(|d| {
            if let Some((list, id)) = d.path.config_entry() {
                if let Some(side) = entry_sides.get(&(list.to_string(), id.to_string())) {
                    return (d, *side);
                }
            }
            let side = match d.origin {
                ChangeOrigin::Local => Side::Local,
                ChangeOrigin::Remote => Side::Remote,
                ChangeOrigin::Both | ChangeOrigin::Unknown => {
                    by_timestamp += 1;
                    match sides.field_order(&d.path) {
                        Ordering::Less => Side::Remote,
                        _ => Side::Local,
                    }
                }
            };
            (d, side)
        })
        .collect();

    let whole_entries: Vec<(String, String, Side)> = entry_sides
        .into_iter()
        .map(|((list, id), side)| (list, id, side))
        .collect();

    let confidence =
        confidence.penalize(AMBIGUOUS_FIELD_PENALTY, sides.ambiguous_count(&report.differences));

    match build_merge(sides, &picks, &whole_entries) {
        Ok(merged) => {
            let from_remote = picks.iter().filter(|(_, s)| *s == Side::Remote).count();
            Resolution::new(
                strategy,
                ResolutionAction::ApplyMerge,
                confidence,
                format!(
                    "Merged {} server and {} local changes ({} overlapping, {} entries taken whole)",
                    from_remote,
                    picks.len() - from_remote,
                    by_timestamp,
                    whole_entries.len()
                ),
            )
            .with_merged(merged)
        }
        Err(reason) => merge_failed(strategy, reason),
    }
}

fn hybrid(sides: &Sides<'_>, report: &ConflictReport) -> Resolution {
    let mut resolution = smart_merge(sides, report, ResolutionStrategy::HybridMetadata);
    let structural = report.high_severity_count();
    if structural == 0 || resolution.action == ResolutionAction::MaintainCurrent {
        return resolution;
    }

    if resolution.merged_settings.is_none() {
        resolution.merged_settings = resolution.target(sides.local, sides.remote);
    }
    resolution.action = ResolutionAction::ApplyMergeWithReview;
    resolution.confidence = resolution.confidence.min(CONFIDENCE_MEDIUM);
    resolution.reasoning = format!(
        "{}; {} structural change(s) require review",
        resolution.reasoning, structural
    );
    resolution
}

fn merge_failed(strategy: ResolutionStrategy, reason: String) -> Resolution {
    log::warn!("Merge under {} failed: {}", strategy, reason);
    Resolution::new(
        strategy,
        ResolutionAction::MaintainCurrent,
        Confidence::zero(),
        format!("Could not build a valid merge: {}", reason),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Builds the merged document from per-difference picks
///
/// Starts from the local view, overlays every remote pick and every entry
/// taken whole, restores entries still referenced as dependencies, and
/// validates the result.
fn build_merge(
    sides: &Sides<'_>,
    picks: &[(&Difference, Side)],
    whole_entries: &[(String, String, Side)],
) -> Result<UserSettings, String> {
    let local_view = diff::to_view(sides.local).map_err(|e| e.to_string())?;
    let remote_view = diff::to_view(sides.remote).map_err(|e| e.to_string())?;
    let mut merged = local_view.clone();

    for (difference, side) in picks {
        if *side == Side::Remote {
            diff::set_value(&mut merged, &difference.path, difference.remote_value.clone());
        }
    }
    for (list, id, side) in whole_entries {
        let path = FieldPath::root().key(list.as_str()).id(id.as_str());
        let source = match side {
            Side::Local => &local_view,
            Side::Remote => &remote_view,
        };
        diff::set_value(&mut merged, &path, diff::value_at(source, &path).cloned());
    }

    restore_dependencies(&mut merged, &local_view, &remote_view);

    let merged = diff::from_view(&merged, merged_metadata(sides.local, sides.remote), sides.local)
        .map_err(|e| e.to_string())?;
    merged.validate().map_err(|errors| {
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    })?;
    Ok(merged)
}

/// Re-adds entries that merged dependencies still point at
fn restore_dependencies(merged: &mut Value, local: &Value, remote: &Value) {
    loop {
        let present: BTreeSet<String> = CONFIG_LISTS
            .iter()
            .filter_map(|list| merged.get(*list).and_then(Value::as_object))
            .flat_map(|entries| entries.keys().cloned())
            .collect();

        let missing: BTreeSet<String> = CONFIG_LISTS
            .iter()
            .filter_map(|list| merged.get(*list).and_then(Value::as_object))
            .flat_map(|entries| entries.values())
            .filter_map(|entry| entry.get("dependencies").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .filter(|id| !present.contains(*id))
            .map(str::to_string)
            .collect();

        let mut restored = false;
        for id in missing {
            for list in CONFIG_LISTS {
                let path = FieldPath::root().key(list).id(id.as_str());
                let found = diff::value_at(local, &path).or_else(|| diff::value_at(remote, &path));
                if let Some(entry) = found {
                    log::debug!("Restoring {} for a dependency in the merge", path);
                    diff::set_value(merged, &path, Some(entry.clone()));
                    restored = true;
                    break;
                }
            }
        }
        if !restored {
            return;
        }
    }
}

/// Version above both sides, latest timestamps, union of field stamps
fn merged_metadata(local: &UserSettings, remote: &UserSettings) -> Metadata {
    let (l, r) = (&local.metadata, &remote.metadata);

    let mut field_modified = l.field_modified.clone();
    for (path, ts) in &r.field_modified {
        field_modified
            .entry(path.clone())
            .and_modify(|existing| *existing = (*existing).max(*ts))
            .or_insert(*ts);
    }

    let last_modified = match compare_timestamps(l.last_modified, r.last_modified) {
        Ordering::Less => r.last_modified,
        _ => l.last_modified,
    };
    let created_at = match (l.created_at, r.created_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };

    Metadata {
        version: l.version.max(r.version).saturating_add(1),
        created_at,
        last_modified,
        field_modified,
    }
}
