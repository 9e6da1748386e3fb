// crates/settings/src/validation.rs
//! Structural validation of settings documents

use crate::error::{SettingsError, SettingsResult, ValidationError};
use crate::model::{ConfigEntry, UserSettings};
use std::collections::{HashMap, HashSet};

/// Upper bound for `charts.decimalPrecision`
pub const MAX_DECIMAL_PRECISION: u8 = 10;

/// Upper bound for `dashboard.autoRefreshInterval` (one day)
pub const MAX_REFRESH_INTERVAL_SECS: u32 = 86_400;

/// Characters that would break field path rendering inside an id
pub const RESERVED_ID_CHARS: &[char] = &['.', '[', ']'];

impl UserSettings {
    /// Validates every invariant: structure and value ranges
    ///
    /// Returns every violation found, not just the first one.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = self.structural_errors();
        errors.extend(self.range_errors());
        into_result(errors)
    }

    /// Validates only the invariants whose violation makes a document unusable
    ///
    /// Required fields, configuration ids and the dependency graph are
    /// checked here. Out-of-range preference values are not; see
    /// [`UserSettings::clamp_ranges`].
    pub fn validate_structure(&self) -> Result<(), Vec<ValidationError>> {
        into_result(self.structural_errors())
    }

    /// Validates and converts violations into a `SettingsError`
    pub fn ensure_valid(&self) -> SettingsResult<()> {
        self.validate().map_err(SettingsError::Invalid)
    }

    /// Pulls out-of-range preference values back into bounds
    ///
    /// Returns the violations that were repaired.
    pub fn clamp_ranges(&mut self) -> Vec<ValidationError> {
        let repaired = self.range_errors();
        let charts = &mut self.preferences.charts;
        charts.decimal_precision = charts.decimal_precision.min(MAX_DECIMAL_PRECISION);
        let dashboard = &mut self.preferences.dashboard;
        dashboard.auto_refresh_interval =
            dashboard.auto_refresh_interval.min(MAX_REFRESH_INTERVAL_SECS);
        repaired
    }

    /// Structural check followed by range clamping
    ///
    /// Used on documents read from outside the process. A structurally
    /// broken document is rejected; a merely out-of-range one is repaired.
    pub fn sanitize(&mut self) -> Result<Vec<ValidationError>, Vec<ValidationError>> {
        self.validate_structure()?;
        Ok(self.clamp_ranges())
    }

    fn structural_errors(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.user_id.trim().is_empty() {
            errors.push(ValidationError::new("userId", "must not be empty"));
        }
        if self.metadata.version == 0 {
            errors.push(ValidationError::with_value(
                "metadata.version",
                "must be at least 1",
                self.metadata.version,
            ));
        }
        if self.metadata.created_at.is_none() {
            errors.push(ValidationError::new("metadata.createdAt", "is required"));
        }

        self.check_configurations(&mut errors);
        errors
    }

    fn range_errors(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let charts = &self.preferences.charts;
        if charts.decimal_precision > MAX_DECIMAL_PRECISION {
            errors.push(ValidationError::with_value(
                "preferences.charts.decimalPrecision",
                format!("must be at most {}", MAX_DECIMAL_PRECISION),
                charts.decimal_precision,
            ));
        }
        let refresh = self.preferences.dashboard.auto_refresh_interval;
        if refresh > MAX_REFRESH_INTERVAL_SECS {
            errors.push(ValidationError::with_value(
                "preferences.dashboard.autoRefreshInterval",
                format!("must be at most {}", MAX_REFRESH_INTERVAL_SECS),
                refresh,
            ));
        }
        errors
    }

    fn all_entries(&self) -> impl Iterator<Item = (&'static str, &ConfigEntry)> {
        self.peg_configurations
            .iter()
            .map(|entry| ("pegConfigurations", entry))
            .chain(
                self.statistics_configurations
                    .iter()
                    .map(|entry| ("statisticsConfigurations", entry)),
            )
    }

    fn check_configurations(&self, errors: &mut Vec<ValidationError>) {
        let mut ids = HashSet::new();
        for (list, entry) in self.all_entries() {
            if entry.id.trim().is_empty() {
                errors.push(ValidationError::new(format!("{list}[]"), "id must not be empty"));
            } else if entry.id.contains(RESERVED_ID_CHARS) {
                errors.push(ValidationError::with_value(
                    format!("{list}[]"),
                    "id must not contain '.', '[' or ']'",
                    &entry.id,
                ));
            } else if !ids.insert(entry.id.as_str()) {
                errors.push(ValidationError::with_value(
                    format!("{list}[{}]", entry.id),
                    "duplicate configuration id",
                    &entry.id,
                ));
            }
        }

        for (list, entry) in self.all_entries() {
            for dependency in &entry.dependencies {
                if !ids.contains(dependency.as_str()) {
                    errors.push(ValidationError::with_value(
                        format!("{list}[{}].dependencies", entry.id),
                        "references an unknown configuration",
                        dependency,
                    ));
                }
            }
        }

        if let Some(cycle_at) = self.find_dependency_cycle() {
            errors.push(ValidationError::with_value(
                "dependencies",
                "dependency cycle detected",
                cycle_at,
            ));
        }
    }

    /// Returns the id of an entry that participates in a dependency cycle
    fn find_dependency_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let graph: HashMap<&str, &[String]> = self
            .all_entries()
            .map(|(_, entry)| (entry.id.as_str(), entry.dependencies.as_slice()))
            .collect();
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        // Iterative DFS; each stack frame is (node, index of next dependency)
        for &start in graph.keys() {
            if marks.contains_key(start) {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::Visiting);

            while let Some((node, next)) = stack.last_mut() {
                let deps = graph.get(*node).copied().unwrap_or(&[]);
                if let Some(dep) = deps.get(*next) {
                    *next += 1;
                    let dep = dep.as_str();
                    if !graph.contains_key(dep) {
                        continue;
                    }
                    match marks.get(dep) {
                        Some(Mark::Visiting) => return Some(dep.to_string()),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dep, Mark::Visiting);
                            stack.push((dep, 0));
                        }
                    }
                } else {
                    marks.insert(*node, Mark::Done);
                    stack.pop();
                }
            }
        }

        None
    }
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigEntry;

    fn base() -> UserSettings {
        UserSettings::new_default("user-1")
    }

    #[test]
    fn test_default_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_empty_user_id() {
        let mut settings = base();
        settings.user_id = "  ".to_string();
        let errors = settings.validate().unwrap_err();
        assert_eq!(errors[0].field, "userId");
    }

    #[test]
    fn test_missing_created_at() {
        let mut settings = base();
        settings.metadata.created_at = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_last_modified_is_allowed() {
        let mut settings = base();
        settings.metadata.last_modified = None;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids_across_lists() {
        let mut settings = base();
        settings.peg_configurations.push(ConfigEntry::with_id("x", "peg"));
        settings
            .statistics_configurations
            .push(ConfigEntry::with_id("x", "stat"));
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
    }

    #[test]
    fn test_dependencies_resolve_across_lists() {
        let mut settings = base();
        settings
            .peg_configurations
            .push(ConfigEntry::with_id("p1", "peg").with_dependency("s1"));
        settings
            .statistics_configurations
            .push(ConfigEntry::with_id("s1", "stat"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_dangling_dependency() {
        let mut settings = base();
        settings
            .peg_configurations
            .push(ConfigEntry::with_id("p1", "peg").with_dependency("missing"));
        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].value.as_deref(), Some("missing"));
    }

    #[test]
    fn test_dependency_cycle() {
        let mut settings = base();
        settings.peg_configurations = vec![
            ConfigEntry::with_id("a", "a").with_dependency("b"),
            ConfigEntry::with_id("b", "b").with_dependency("c"),
        ];
        settings.statistics_configurations =
            vec![ConfigEntry::with_id("c", "c").with_dependency("a")];
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut settings = base();
        settings
            .peg_configurations
            .push(ConfigEntry::with_id("a", "a").with_dependency("a"));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_diamond_is_not_cycle() {
        let mut settings = base();
        settings.peg_configurations = vec![
            ConfigEntry::with_id("top", "top")
                .with_dependency("left")
                .with_dependency("right"),
            ConfigEntry::with_id("left", "left").with_dependency("bottom"),
            ConfigEntry::with_id("right", "right").with_dependency("bottom"),
            ConfigEntry::with_id("bottom", "bottom"),
        ];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_precision_bound() {
        let mut settings = base();
        settings.preferences.charts.decimal_precision = 11;
        assert!(settings.ensure_valid().is_err());
    }

    #[test]
    fn test_range_violation_is_not_structural() {
        let mut settings = base();
        settings.preferences.charts.decimal_precision = 12;
        settings.preferences.dashboard.auto_refresh_interval = 100_000;
        assert_eq!(settings.validate().unwrap_err().len(), 2);
        assert!(settings.validate_structure().is_ok());
    }

    #[test]
    fn test_sanitize_clamps_ranges() {
        let mut settings = base();
        settings.preferences.charts.decimal_precision = 12;
        settings.preferences.dashboard.auto_refresh_interval = 100_000;

        let repaired = settings.sanitize().unwrap();
        assert_eq!(repaired.len(), 2);
        assert_eq!(settings.preferences.charts.decimal_precision, MAX_DECIMAL_PRECISION);
        assert_eq!(
            settings.preferences.dashboard.auto_refresh_interval,
            MAX_REFRESH_INTERVAL_SECS
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_sanitize_rejects_broken_structure() {
        let mut settings = base();
        settings.metadata.created_at = None;
        settings.preferences.charts.decimal_precision = 12;
        assert!(settings.sanitize().is_err());
        assert_eq!(settings.preferences.charts.decimal_precision, 12);
    }

    #[test]
    fn test_reserved_characters_in_id() {
        for id in ["a.b", "a[b", "a]b"] {
            let mut settings = base();
            settings.peg_configurations.push(ConfigEntry::with_id(id, "peg"));
            let errors = settings.validate_structure().unwrap_err();
            assert!(errors[0].message.contains("must not contain"), "{id}");
        }
    }
}
