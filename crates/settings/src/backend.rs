// crates/settings/src/backend.rs
//! Wire shape of the preferences document as stored by the server

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Dashboard section as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendDashboardConfig {
    pub metrics: Vec<String>,
    pub filters: BTreeMap<String, String>,
    pub refresh_interval_secs: u32,
    pub chart_style: String,
    pub legend: bool,
    pub grid: bool,
}

/// Chart section as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendChartConfig {
    pub date_range: String,
    pub comparison: bool,
    pub delta: bool,
    pub rsd: bool,
    pub chart_type: String,
    pub decimals: u8,
}

/// Formatting section as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendFilterConfig {
    pub locale: String,
    pub date_format: String,
    pub number_format: String,
}

/// A PEG or statistics configuration as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfigEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// The preferences document exchanged with the server
///
/// Configuration lists may arrive either as JSON arrays or as JSON-encoded
/// strings; a string that does not decode to a list makes the whole document
/// malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDocument {
    pub user_id: String,
    #[serde(default)]
    pub dashboard_config: BackendDashboardConfig,
    #[serde(default)]
    pub chart_config: BackendChartConfig,
    #[serde(default)]
    pub filter_config: BackendFilterConfig,
    #[serde(default, deserialize_with = "config_list")]
    pub peg_configs: Vec<BackendConfigEntry>,
    #[serde(default, deserialize_with = "config_list")]
    pub stat_configs: Vec<BackendConfigEntry>,
    pub version: u64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_timestamps: BTreeMap<String, String>,
}

impl BackendDocument {
    /// Decodes a raw JSON value received from the server
    pub fn from_json(value: serde_json::Value) -> SettingsResult<Self> {
        serde_json::from_value(value).map_err(|e| SettingsError::Malformed(e.to_string()))
    }

    /// Decodes a JSON string received from the server
    pub fn from_json_str(raw: &str) -> SettingsResult<Self> {
        serde_json::from_str(raw).map_err(|e| SettingsError::Malformed(e.to_string()))
    }

    /// Encodes the document as a JSON value
    pub fn to_json(&self) -> SettingsResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigListRepr {
    List(Vec<BackendConfigEntry>),
    Encoded(String),
}

fn config_list<'de, D>(deserializer: D) -> Result<Vec<BackendConfigEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<ConfigListRepr>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(ConfigListRepr::List(list)) => Ok(list),
        Some(ConfigListRepr::Encoded(raw)) if raw.trim().is_empty() => Ok(Vec::new()),
        Some(ConfigListRepr::Encoded(raw)) => {
            serde_json::from_str(&raw).map_err(serde::de::Error::custom)
        }
    }
}
