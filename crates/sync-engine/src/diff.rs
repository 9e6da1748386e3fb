// crates/sync-engine/src/diff.rs
//! Structural diff of settings documents
//!
//! Documents are compared through a JSON "view" in which both configuration
//! lists become objects keyed by entry id. Entries are then matched by id
//! rather than by position, and every difference has a stable path such as
//! `preferences.dashboard.chartStyle` or `pegConfigurations[p1].enabled`.
//! Metadata is not part of the view.

use crate::error::{SyncError, SyncResult};
use kpiboard_settings::{ConfigEntry, Metadata, Preferences, UserSettings};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Document keys holding id-addressed configuration lists
pub const CONFIG_LISTS: [&str; 2] = ["pegConfigurations", "statisticsConfigurations"];

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Object key
    Key(String),
    /// Configuration entry id
    Id(String),
}

/// Location of a field inside a settings document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// Creates an empty (root) path
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses a dotted path with `[id]` segments
    ///
    /// Round-trips with `Display` for every id a valid document can hold;
    /// validation rejects ids containing `.`, `[` or `]`.
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        for part in raw.split('.').filter(|p| !p.is_empty()) {
            let mut rest = part;
            if let Some(open) = rest.find('[') {
                if open > 0 {
                    segments.push(PathSegment::Key(rest[..open].to_string()));
                }
                rest = &rest[open..];
                while let Some(stripped) = rest.strip_prefix('[') {
                    match stripped.find(']') {
                        Some(close) => {
                            segments.push(PathSegment::Id(stripped[..close].to_string()));
                            rest = &stripped[close + 1..];
                        }
                        None => {
                            segments.push(PathSegment::Id(stripped.to_string()));
                            rest = "";
                        }
                    }
                }
            } else {
                segments.push(PathSegment::Key(rest.to_string()));
            }
        }
        Self(segments)
    }

    /// Returns a new path with a key appended
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    /// Returns a new path with an entry id appended
    pub fn id(&self, id: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Id(id.into()));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `self` equals `prefix` or lies below it
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// If the path points into a configuration list, returns the list key
    /// and the entry id
    pub fn config_entry(&self) -> Option<(&str, &str)> {
        match self.0.as_slice() {
            [PathSegment::Key(list), PathSegment::Id(id), ..] => Some((list.as_str(), id.as_str())),
            _ => None,
        }
    }

    /// Returns true if the path addresses a whole configuration entry
    pub fn is_whole_entry(&self) -> bool {
        self.0.len() == 2 && self.config_entry().is_some()
    }

    /// Returns the name of the last key segment
    pub fn leaf_key(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::Id(_) => None,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if index == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Id(id) => write!(f, "[{}]", id)?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Which side changed a differing field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Local,
    Remote,
    Both,
    /// No common base and no per-field timestamps to tell
    Unknown,
}

/// A field whose value differs between the local and remote documents
///
/// `None` means the field is absent on that side (e.g. an entry that only
/// exists in one document).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Difference {
    pub path: FieldPath,
    pub local_value: Option<Value>,
    pub remote_value: Option<Value>,
    pub origin: ChangeOrigin,
}

/// Builds the comparable view of a document
pub(crate) fn to_view(settings: &UserSettings) -> SyncResult<Value> {
    let mut root = Map::new();
    root.insert("userId".to_string(), Value::String(settings.user_id.clone()));
    root.insert(
        "preferences".to_string(),
        serde_json::to_value(&settings.preferences)?,
    );
    root.insert(
        CONFIG_LISTS[0].to_string(),
        entries_view(&settings.peg_configurations)?,
    );
    root.insert(
        CONFIG_LISTS[1].to_string(),
        entries_view(&settings.statistics_configurations)?,
    );
    Ok(Value::Object(root))
}

fn entries_view(entries: &[ConfigEntry]) -> SyncResult<Value> {
    let mut map = Map::new();
    for entry in entries {
        map.insert(entry.id.clone(), serde_json::to_value(entry)?);
    }
    Ok(Value::Object(map))
}

/// Rebuilds a document from a view
///
/// Entries keep the order they have in `order_hint`; entries unknown to the
/// hint are appended in id order.
pub(crate) fn from_view(
    view: &Value,
    metadata: Metadata,
    order_hint: &UserSettings,
) -> SyncResult<UserSettings> {
    let user_id = view
        .get("userId")
        .and_then(Value::as_str)
        .unwrap_or(&order_hint.user_id)
        .to_string();
    let preferences: Preferences = match view.get("preferences") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Preferences::default(),
    };

    Ok(UserSettings {
        user_id,
        preferences,
        peg_configurations: entries_from_view(
            view.get(CONFIG_LISTS[0]),
            &order_hint.peg_configurations,
        )?,
        statistics_configurations: entries_from_view(
            view.get(CONFIG_LISTS[1]),
            &order_hint.statistics_configurations,
        )?,
        metadata,
    })
}

fn entries_from_view(view: Option<&Value>, order_hint: &[ConfigEntry]) -> SyncResult<Vec<ConfigEntry>> {
    let Some(view) = view else {
        return Ok(Vec::new());
    };
    let map = view
        .as_object()
        .ok_or_else(|| SyncError::Corruption("configuration list is not an object".to_string()))?;

    let mut ordered: Vec<&String> = order_hint
        .iter()
        .map(|entry| &entry.id)
        .filter(|id| map.contains_key(id.as_str()))
        .collect();
    let mut extra: Vec<&String> = map
        .keys()
        .filter(|id| !order_hint.iter().any(|entry| &entry.id == *id))
        .collect();
    extra.sort();
    ordered.extend(extra);

    let mut entries = Vec::with_capacity(ordered.len());
    for id in ordered {
        if let Some(value) = map.get(id.as_str()) {
            let mut entry: ConfigEntry = serde_json::from_value(value.clone())?;
            entry.id = id.clone();
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Returns the value at `path`, if present
pub(crate) fn value_at<'a>(view: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments().iter().try_fold(view, |node, segment| {
        let key = match segment {
            PathSegment::Key(key) | PathSegment::Id(key) => key,
        };
        node.get(key.as_str())
    })
}

/// Sets (or with `None`, removes) the value at `path`, creating
/// intermediate objects as needed
pub(crate) fn set_value(view: &mut Value, path: &FieldPath, value: Option<Value>) {
    let Some((last, parents)) = path.segments().split_last() else {
        if let Some(value) = value {
            *view = value;
        }
        return;
    };

    let mut node = view;
    for segment in parents {
        let key = match segment {
            PathSegment::Key(key) | PathSegment::Id(key) => key,
        };
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let key = match last {
        PathSegment::Key(key) | PathSegment::Id(key) => key,
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        match value {
            Some(value) => {
                map.insert(key.clone(), value);
            }
            None => {
                map.remove(key);
            }
        }
    }
}

/// A raw difference before origin classification
pub(crate) struct RawDifference {
    pub path: FieldPath,
    pub local_value: Option<Value>,
    pub remote_value: Option<Value>,
}

/// Walks two views and collects every differing leaf
///
/// Objects are recursed; scalars and arrays are compared as whole values.
pub(crate) fn diff_views(local: &Value, remote: &Value) -> Vec<RawDifference> {
    let mut out = Vec::new();
    walk(local, remote, &FieldPath::root(), &mut out);
    out
}

fn walk(local: &Value, remote: &Value, path: &FieldPath, out: &mut Vec<RawDifference>) {
    if local == remote {
        return;
    }

    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let ids_below = path.len() == 1
                && matches!(path.segments(), [PathSegment::Key(k)] if CONFIG_LISTS.contains(&k.as_str()));

            let mut keys: Vec<&String> = l.keys().chain(r.keys()).collect();
            keys.sort();
            keys.dedup();

            for key in keys {
                let child = if ids_below {
                    path.id(key.as_str())
                } else {
                    path.key(key.as_str())
                };
                match (l.get(key.as_str()), r.get(key.as_str())) {
                    (Some(lv), Some(rv)) => walk(lv, rv, &child, out),
                    (lv, rv) => out.push(RawDifference {
                        path: child,
                        local_value: lv.cloned(),
                        remote_value: rv.cloned(),
                    }),
                }
            }
        }
        _ => out.push(RawDifference {
            path: path.clone(),
            local_value: Some(local.clone()),
            remote_value: Some(remote.clone()),
        }),
    }
}

/// Lists the paths that differ between two documents
///
/// Used to record which fields a local edit touched.
pub fn changed_paths(before: &UserSettings, after: &UserSettings) -> SyncResult<Vec<FieldPath>> {
    let before = to_view(before)?;
    let after = to_view(after)?;
    Ok(diff_views(&before, &after)
        .into_iter()
        .map(|raw| raw.path)
        .collect())
}
