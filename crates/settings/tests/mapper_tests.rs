//! Integration tests for the settings mapper and validation

use chrono::{TimeZone, Utc};
use kpiboard_settings::{
    compare_timestamp_strs, to_backend, to_user_settings, BackendDocument, ChartKind, ConfigEntry,
    DateRange, SettingsError, UserSettings,
};
use serde_json::json;
use std::cmp::Ordering;

fn documents() -> Vec<UserSettings> {
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();

    let defaults = UserSettings::new_default_at("alice", created);

    let mut customised = defaults.clone();
    customised.preferences.dashboard.selected_metrics = vec!["cssr".into(), "dcr".into()];
    customised.preferences.dashboard.show_grid = false;
    customised.preferences.charts.chart_type = ChartKind::Scatter;
    customised.preferences.charts.default_date_range = DateRange::Last24Hours;
    customised.preferences.filters.locale = "de-DE".into();
    customised.peg_configurations = vec![
        ConfigEntry::with_id("peg-a", "Attach rate")
            .with_parameter("threshold", json!(0.5))
            .with_parameter("cells", json!(["c1", "c2"])),
        ConfigEntry::with_id("peg-b", "Handover").with_dependency("peg-a"),
    ];
    customised.statistics_configurations =
        vec![ConfigEntry::with_id("stat-a", "Weekly RSD").with_dependency("peg-b")];
    customised.touch(Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap());

    let mut untimed = customised.clone();
    untimed.metadata.last_modified = None;
    untimed.user_id = "bob".into();

    vec![defaults, customised, untimed]
}

#[test]
fn property_mapper_roundtrip() {
    for doc in documents() {
        assert!(doc.validate().is_ok(), "fixture must be valid: {doc:?}");
        assert_eq!(to_user_settings(&to_backend(&doc)), doc);
    }
}

#[test]
fn property_roundtrip_through_json() -> Result<(), Box<dyn std::error::Error>> {
    for doc in documents() {
        let wire = to_backend(&doc).to_json()?;
        let decoded = BackendDocument::from_json(wire)?;
        assert_eq!(to_user_settings(&decoded), doc);
    }
    Ok(())
}

#[test]
fn test_local_cache_json_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    for doc in documents() {
        let text = serde_json::to_string(&doc)?;
        let back: UserSettings = serde_json::from_str(&text)?;
        assert_eq!(back, doc);
    }
    Ok(())
}

#[test]
fn test_corrupted_remote_document() {
    let raw = json!({
        "user_id": "alice",
        "version": 4,
        "peg_configs": "[{\"id\": \"p1\",",
    });
    match BackendDocument::from_json(raw) {
        Err(SettingsError::Malformed(msg)) => assert!(!msg.is_empty()),
        other => panic!("expected malformed document, got {other:?}"),
    }
}

#[test]
fn test_timestamp_strings_order() {
    assert_eq!(
        compare_timestamp_strs(Some("2024-03-02T09:00:00Z"), Some("2024-03-01T09:00:00Z")),
        Ordering::Greater
    );
    assert_eq!(compare_timestamp_strs(None, None), Ordering::Equal);
}
