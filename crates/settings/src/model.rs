// crates/settings/src/model.rs
//! The canonical `UserSettings` document and its sections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Visual style used for a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Line,
    Bar,
    Area,
    Scatter,
}

impl ChartKind {
    /// Returns the wire name of the chart kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Area => "area",
            ChartKind::Scatter => "scatter",
        }
    }

    /// Parses a wire name, returning `None` for unknown kinds
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "line" => Some(ChartKind::Line),
            "bar" => Some(ChartKind::Bar),
            "area" => Some(ChartKind::Area),
            "scatter" => Some(ChartKind::Scatter),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default date range shown by charts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DateRange {
    #[serde(rename = "24h")]
    Last24Hours,
    #[default]
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
}

impl DateRange {
    /// Returns the wire name of the range
    pub fn as_str(&self) -> &'static str {
        match self {
            DateRange::Last24Hours => "24h",
            DateRange::Last7Days => "7d",
            DateRange::Last30Days => "30d",
            DateRange::Last90Days => "90d",
        }
    }

    /// Parses a wire name, returning `None` for unknown ranges
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "24h" => Some(DateRange::Last24Hours),
            "7d" => Some(DateRange::Last7Days),
            "30d" => Some(DateRange::Last30Days),
            "90d" => Some(DateRange::Last90Days),
            _ => None,
        }
    }
}

/// Dashboard layout and refresh preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardPreferences {
    /// Metric keys shown on the dashboard
    pub selected_metrics: Vec<String>,
    /// Filters applied when the dashboard opens
    pub default_filters: BTreeMap<String, String>,
    /// Auto refresh interval in seconds (0 disables refresh)
    pub auto_refresh_interval: u32,
    pub chart_style: ChartKind,
    pub show_legend: bool,
    pub show_grid: bool,
}

impl Default for DashboardPreferences {
    fn default() -> Self {
        Self {
            selected_metrics: vec![
                "availability".to_string(),
                "throughput".to_string(),
                "latency".to_string(),
            ],
            default_filters: BTreeMap::new(),
            auto_refresh_interval: 60,
            chart_style: ChartKind::Line,
            show_legend: true,
            show_grid: true,
        }
    }
}

/// Chart rendering defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChartPreferences {
    pub default_date_range: DateRange,
    pub show_comparison: bool,
    pub show_delta: bool,
    pub show_rsd: bool,
    pub chart_type: ChartKind,
    pub decimal_precision: u8,
}

impl Default for ChartPreferences {
    fn default() -> Self {
        Self {
            default_date_range: DateRange::Last7Days,
            show_comparison: false,
            show_delta: true,
            show_rsd: false,
            chart_type: ChartKind::Line,
            decimal_precision: 2,
        }
    }
}

/// Locale and value formatting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterPreferences {
    pub locale: String,
    pub date_format: String,
    pub number_format: String,
}

impl Default for FilterPreferences {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            date_format: "YYYY-MM-DD".to_string(),
            number_format: "1,234.56".to_string(),
        }
    }
}

/// All preference sections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Preferences {
    pub dashboard: DashboardPreferences,
    pub charts: ChartPreferences,
    pub filters: FilterPreferences,
}

/// A named PEG or statistics configuration
///
/// Entries are addressed by `id`. `dependencies` name other entries of the
/// same document (in either list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl ConfigEntry {
    /// Creates an enabled entry with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    /// Creates an enabled entry with the given id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            parameters: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Sets a parameter value
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Adds a dependency on another entry
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }
}

/// Document versioning and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Monotonically non-decreasing document version
    pub version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Authority for conflict ordering. `None` means unknown age.
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    /// Per-field modification times, keyed by field path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_modified: BTreeMap<String, DateTime<Utc>>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: 1,
            created_at: None,
            last_modified: None,
            field_modified: BTreeMap::new(),
        }
    }
}

impl Metadata {
    /// Returns the modification time recorded for `path` or its closest
    /// recorded ancestor (`a.b[c].d` falls back to `a.b[c]`, then `a.b`, ...)
    pub fn field_timestamp(&self, path: &str) -> Option<DateTime<Utc>> {
        let mut candidate = path;
        loop {
            if let Some(ts) = self.field_modified.get(candidate) {
                return Some(*ts);
            }
            let cut = candidate.rfind(['.', '['])?;
            candidate = &candidate[..cut];
            if candidate.is_empty() {
                return None;
            }
        }
    }

    /// Returns the latest modification time recorded at or below `prefix`
    pub fn latest_under(&self, prefix: &str) -> Option<DateTime<Utc>> {
        self.field_modified
            .iter()
            .filter(|(path, _)| {
                path.as_str() == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
            })
            .map(|(_, ts)| *ts)
            .max()
    }
}

/// The synchronized preference document of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub user_id: String,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub peg_configurations: Vec<ConfigEntry>,
    #[serde(default)]
    pub statistics_configurations: Vec<ConfigEntry>,
    pub metadata: Metadata,
}

impl UserSettings {
    /// Creates the first-load defaults for a user
    pub fn new_default(user_id: impl Into<String>) -> Self {
        Self::new_default_at(user_id, Utc::now())
    }

    /// Creates defaults stamped with an explicit time
    pub fn new_default_at(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            preferences: Preferences::default(),
            peg_configurations: Vec::new(),
            statistics_configurations: Vec::new(),
            metadata: Metadata {
                version: 1,
                created_at: Some(now),
                last_modified: Some(now),
                field_modified: BTreeMap::new(),
            },
        }
    }

    /// Records a persisted mutation: bumps the version and sets `last_modified`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.metadata.version = self.metadata.version.saturating_add(1);
        self.metadata.last_modified = Some(now);
        if self.metadata.created_at.is_none() {
            self.metadata.created_at = Some(now);
        }
    }

    /// Returns the document-level modification time
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.metadata.last_modified
    }

    /// Looks up a configuration entry by id in either list
    pub fn find_configuration(&self, id: &str) -> Option<&ConfigEntry> {
        self.peg_configurations
            .iter()
            .chain(self.statistics_configurations.iter())
            .find(|entry| entry.id == id)
    }

    /// Drops entries whose id was already seen; the first occurrence wins.
    ///
    /// Returns the number of entries removed.
    pub fn dedup_configurations(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.peg_configurations.len() + self.statistics_configurations.len();
        self.peg_configurations
            .retain(|entry| seen.insert(entry.id.clone()));
        self.statistics_configurations
            .retain(|entry| seen.insert(entry.id.clone()));
        before - (self.peg_configurations.len() + self.statistics_configurations.len())
    }
}
