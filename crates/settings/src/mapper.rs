// crates/settings/src/mapper.rs
//! Bidirectional mapping between `UserSettings` and `BackendDocument`
//!
//! Both directions are total. For every valid document `x`,
//! `to_user_settings(&to_backend(&x)) == x`. Unknown enum names and
//! unparseable timestamps coming from the server map to defaults and `None`
//! respectively.

use crate::backend::{
    BackendChartConfig, BackendConfigEntry, BackendDashboardConfig, BackendDocument,
    BackendFilterConfig,
};
use crate::model::{
    ChartKind, ChartPreferences, ConfigEntry, DashboardPreferences, DateRange, FilterPreferences,
    Metadata, Preferences, UserSettings,
};
use crate::timestamp::{format_timestamp, parse_timestamp};

/// Converts the canonical document into the server shape
pub fn to_backend(settings: &UserSettings) -> BackendDocument {
    let dashboard = &settings.preferences.dashboard;
    let charts = &settings.preferences.charts;
    let filters = &settings.preferences.filters;

    BackendDocument {
        user_id: settings.user_id.clone(),
        dashboard_config: BackendDashboardConfig {
            metrics: dashboard.selected_metrics.clone(),
            filters: dashboard.default_filters.clone(),
            refresh_interval_secs: dashboard.auto_refresh_interval,
            chart_style: dashboard.chart_style.as_str().to_string(),
            legend: dashboard.show_legend,
            grid: dashboard.show_grid,
        },
        chart_config: BackendChartConfig {
            date_range: charts.default_date_range.as_str().to_string(),
            comparison: charts.show_comparison,
            delta: charts.show_delta,
            rsd: charts.show_rsd,
            chart_type: charts.chart_type.as_str().to_string(),
            decimals: charts.decimal_precision,
        },
        filter_config: BackendFilterConfig {
            locale: filters.locale.clone(),
            date_format: filters.date_format.clone(),
            number_format: filters.number_format.clone(),
        },
        peg_configs: settings.peg_configurations.iter().map(entry_to_backend).collect(),
        stat_configs: settings
            .statistics_configurations
            .iter()
            .map(entry_to_backend)
            .collect(),
        version: settings.metadata.version,
        created_at: settings.metadata.created_at.as_ref().map(format_timestamp),
        updated_at: settings.metadata.last_modified.as_ref().map(format_timestamp),
        field_timestamps: settings
            .metadata
            .field_modified
            .iter()
            .map(|(path, ts)| (path.clone(), format_timestamp(ts)))
            .collect(),
    }
}

/// Converts the server shape into the canonical document
pub fn to_user_settings(doc: &BackendDocument) -> UserSettings {
    let defaults = Preferences::default();

    UserSettings {
        user_id: doc.user_id.clone(),
        preferences: Preferences {
            dashboard: DashboardPreferences {
                selected_metrics: doc.dashboard_config.metrics.clone(),
                default_filters: doc.dashboard_config.filters.clone(),
                auto_refresh_interval: doc.dashboard_config.refresh_interval_secs,
                chart_style: ChartKind::parse(&doc.dashboard_config.chart_style)
                    .unwrap_or(defaults.dashboard.chart_style),
                show_legend: doc.dashboard_config.legend,
                show_grid: doc.dashboard_config.grid,
            },
            charts: ChartPreferences {
                default_date_range: DateRange::parse(&doc.chart_config.date_range)
                    .unwrap_or(defaults.charts.default_date_range),
                show_comparison: doc.chart_config.comparison,
                show_delta: doc.chart_config.delta,
                show_rsd: doc.chart_config.rsd,
                chart_type: ChartKind::parse(&doc.chart_config.chart_type)
                    .unwrap_or(defaults.charts.chart_type),
                decimal_precision: doc.chart_config.decimals,
            },
            filters: FilterPreferences {
                locale: doc.filter_config.locale.clone(),
                date_format: doc.filter_config.date_format.clone(),
                number_format: doc.filter_config.number_format.clone(),
            },
        },
        peg_configurations: doc.peg_configs.iter().map(entry_from_backend).collect(),
        statistics_configurations: doc.stat_configs.iter().map(entry_from_backend).collect(),
        metadata: Metadata {
            version: doc.version,
            created_at: doc.created_at.as_deref().and_then(parse_timestamp),
            last_modified: doc.updated_at.as_deref().and_then(parse_timestamp),
            field_modified: doc
                .field_timestamps
                .iter()
                .filter_map(|(path, raw)| parse_timestamp(raw).map(|ts| (path.clone(), ts)))
                .collect(),
        },
    }
}

fn entry_to_backend(entry: &ConfigEntry) -> BackendConfigEntry {
    BackendConfigEntry {
        id: entry.id.clone(),
        name: entry.name.clone(),
        is_active: entry.enabled,
        params: entry.parameters.clone(),
        depends_on: entry.dependencies.clone(),
    }
}

fn entry_from_backend(entry: &BackendConfigEntry) -> ConfigEntry {
    ConfigEntry {
        id: entry.id.clone(),
        name: entry.name.clone(),
        enabled: entry.is_active,
        parameters: entry.params.clone(),
        dependencies: entry.depends_on.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample() -> UserSettings {
        let mut settings = UserSettings::new_default_at(
            "user-7",
            Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap(),
        );
        settings.preferences.dashboard.chart_style = ChartKind::Bar;
        settings.preferences.dashboard.auto_refresh_interval = 30;
        settings
            .preferences
            .dashboard
            .default_filters
            .insert("region".to_string(), "emea".to_string());
        settings.preferences.charts.default_date_range = DateRange::Last30Days;
        settings.preferences.charts.show_rsd = true;
        settings.peg_configurations.push(
            ConfigEntry::with_id("p1", "Call drops")
                .with_parameter("window", json!(15))
                .with_dependency("s1"),
        );
        settings
            .statistics_configurations
            .push(ConfigEntry::with_id("s1", "Hourly mean"));
        settings.metadata.field_modified.insert(
            "preferences.dashboard.chartStyle".to_string(),
            Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        );
        settings
    }

    #[test]
    fn test_roundtrip_is_identity() {
        let settings = sample();
        assert_eq!(to_user_settings(&to_backend(&settings)), settings);
    }

    #[test]
    fn test_roundtrip_defaults() {
        let settings = UserSettings::new_default("fresh");
        assert_eq!(to_user_settings(&to_backend(&settings)), settings);
    }

    #[test]
    fn test_roundtrip_without_timestamps() {
        let mut settings = sample();
        settings.metadata.created_at = None;
        settings.metadata.last_modified = None;
        let backend = to_backend(&settings);
        assert!(backend.updated_at.is_none());
        assert_eq!(to_user_settings(&backend), settings);
    }

    #[test]
    fn test_backend_field_names() {
        let backend = to_backend(&sample());
        assert_eq!(backend.dashboard_config.chart_style, "bar");
        assert_eq!(backend.chart_config.date_range, "30d");
        assert!(backend.peg_configs[0].is_active);
        assert_eq!(backend.peg_configs[0].depends_on, vec!["s1".to_string()]);
    }

    #[test]
    fn test_unknown_enum_names_fall_back_to_defaults() {
        let mut backend = to_backend(&sample());
        backend.dashboard_config.chart_style = "hologram".to_string();
        backend.chart_config.date_range = "forever".to_string();

        let settings = to_user_settings(&backend);
        assert_eq!(settings.preferences.dashboard.chart_style, ChartKind::Line);
        assert_eq!(
            settings.preferences.charts.default_date_range,
            DateRange::Last7Days
        );
    }

    #[test]
    fn test_unparseable_timestamp_maps_to_none() {
        let mut backend = to_backend(&sample());
        backend.updated_at = Some("yesterday".to_string());
        assert_eq!(to_user_settings(&backend).metadata.last_modified, None);
    }
}
