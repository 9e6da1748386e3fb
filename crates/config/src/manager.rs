// crates/config/src/manager.rs
//! Configuration manager - main API for config operations

use crate::persistence::{ConfigFile, LoadedConfig};
use crate::{Config, ConfigError, ConfigResult};
use directories::ProjectDirs;
use kpiboard_sync_engine::{ResolutionStrategy, SyncOptions};
use std::path::PathBuf;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "KPIBOARD_";

/// Main configuration manager
///
/// Owns the location of `config.toml` and handles defaults, validation and
/// environment overrides.
pub struct ConfigManager {
    file: ConfigFile,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a config manager for the platform config directory
    ///
    /// - Linux: `~/.config/kpiboard/`
    /// - macOS: `~/Library/Application Support/kpiboard/`
    /// - Windows: `%APPDATA%\kpiboard\config\`
    pub fn new() -> ConfigResult<Self> {
        let config_dir = Self::default_config_dir()?;
        Self::with_directory(config_dir)
    }

    /// Creates a config manager with a custom config directory
    pub fn with_directory(config_dir: PathBuf) -> ConfigResult<Self> {
        let file = ConfigFile::new(config_dir.join("config.toml"));
        Ok(Self { file, config_dir })
    }

    fn default_config_dir() -> ConfigResult<PathBuf> {
        ProjectDirs::from("", "", "kpiboard")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoPlatformDirectory("config"))
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }

    /// Loads the configuration from file
    ///
    /// A missing file yields the defaults; an empty or unparseable file is
    /// an error. Out-of-range values are logged and kept.
    pub fn load(&self) -> ConfigResult<Config> {
        Ok(self.file.load()?.config)
    }

    /// Like `load`, also reporting validation warnings and whether a file existed
    pub fn load_detailed(&self) -> ConfigResult<LoadedConfig> {
        self.file.load()
    }

    /// Loads the configuration, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                Config::default()
            }
        }
    }

    /// Validates and atomically saves the configuration
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.file.save(config)
    }

    /// Loads, modifies and saves the configuration
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use kpiboard_config::ConfigManager;
    /// # let manager = ConfigManager::new().unwrap();
    /// manager.update(|config| {
    ///     config.sync.poll_interval_secs = 60;
    /// }).expect("Failed to update config");
    /// ```
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes a default config file if none exists
    ///
    /// Returns Ok(true) if a new file was created.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.file.exists() {
            log::info!("Config file already exists at {}", self.file.path().display());
            return Ok(false);
        }

        self.file.save(&Config::default())?;
        Ok(true)
    }

    /// Overwrites the config file with defaults
    pub fn reset(&self) -> ConfigResult<()> {
        self.save(&Config::default())
    }

    /// Puts the previous config file back
    pub fn restore_backup(&self) -> ConfigResult<Config> {
        self.file.restore_backup()
    }

    /// Lists the validation problems of the current config file
    pub fn validate(&self) -> ConfigResult<Vec<String>> {
        let loaded = self.file.load()?;
        Ok(loaded.warnings.iter().map(|e| e.to_string()).collect())
    }

    /// Loads the config file and applies `KPIBOARD_*` environment overrides
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;
        apply_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Sync manager options from the file and environment
    ///
    /// Never fails: an unreadable file means defaults, and a section with
    /// out-of-range values falls back to that section's defaults.
    pub fn sync_options(&self) -> SyncOptions {
        self.sync_options_with(|name| std::env::var(name).ok())
    }

    fn sync_options_with<F>(&self, lookup: F) -> SyncOptions
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.load_or_default();
        apply_overrides(&mut config, lookup);

        let (config, replaced) = config.sanitized();
        if !replaced.is_empty() {
            log::warn!(
                "Using defaults for {} out-of-range config value(s)",
                replaced.len()
            );
        }
        config.sync_options()
    }
}

/// Applies overrides looked up by variable name
///
/// Recognized variables: `KPIBOARD_SYNC_STRATEGY`,
/// `KPIBOARD_SYNC_POLL_INTERVAL_SECS`, `KPIBOARD_SYNC_DEBOUNCE_MS`,
/// `KPIBOARD_REMOTE_TIMEOUT_SECS` and `KPIBOARD_STORAGE_QUOTA_BYTES`.
/// Values that do not parse are ignored with a warning.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| {
        let name = format!("{}{}", ENV_PREFIX, suffix);
        lookup(&name).map(|value| (name, value))
    };

    if let Some((name, value)) = var("SYNC_STRATEGY") {
        match ResolutionStrategy::parse(&value) {
            Some(strategy) => config.sync.strategy = strategy,
            None => log::warn!("Ignoring {}={}: unknown strategy", name, value),
        }
    }
    if let Some(v) = parse_var(var("SYNC_POLL_INTERVAL_SECS")) {
        config.sync.poll_interval_secs = v;
    }
    if let Some(v) = parse_var(var("SYNC_DEBOUNCE_MS")) {
        config.sync.debounce_ms = v;
    }
    if let Some(v) = parse_var(var("REMOTE_TIMEOUT_SECS")) {
        config.remote.timeout_secs = v;
    }
    if let Some(v) = parse_var(var("STORAGE_QUOTA_BYTES")) {
        config.storage.quota_bytes = v;
    }

    if let Err(errors) = config.validate() {
        log::warn!(
            "Config validation warnings after env overrides: {:?}",
            errors
        );
    }
}

fn parse_var(var: Option<(String, String)>) -> Option<u64> {
    let (name, value) = var?;
    match value.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Ignoring {}={}: {}", name, value, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn setup_test_manager() -> (TempDir, ConfigManager) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let manager = ConfigManager::with_directory(temp_dir.path().to_path_buf())
            .expect("Failed to create manager");
        (temp_dir, manager)
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_new_manager() {
        assert!(ConfigManager::new().is_ok());
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let (_temp_dir, manager) = setup_test_manager();
        assert_eq!(manager.load_or_default(), Config::default());
    }

    #[test]
    fn test_load_or_default_with_corrupted_file() {
        let (_temp_dir, manager) = setup_test_manager();
        std::fs::write(manager.config_path(), "[sync\npoll = ").expect("Should write");
        assert_eq!(manager.load_or_default(), Config::default());
    }

    #[test]
    fn test_update() {
        let (_temp_dir, manager) = setup_test_manager();
        manager.save(&Config::default()).expect("Should save");

        manager
            .update(|config| {
                config.sync.debounce_ms = 3000;
            })
            .expect("Should update");

        let loaded = manager.load().expect("Should load");
        assert_eq!(loaded.sync.debounce_ms, 3000);
    }

    #[test]
    fn test_initialize_creates_file_once() {
        let (_temp_dir, manager) = setup_test_manager();

        assert!(manager.initialize().expect("Should initialize"));
        assert!(manager.config_path().exists());
        assert!(!manager.initialize().expect("Should initialize"));
    }

    #[test]
    fn test_reset() {
        let (_temp_dir, manager) = setup_test_manager();

        let mut config = Config::default();
        config.remote.max_retries = 7;
        manager.save(&config).expect("Should save");

        manager.reset().expect("Should reset");
        assert_eq!(manager.load().expect("Should load"), Config::default());
    }

    #[test]
    fn test_invalid_config_is_not_saved() {
        let (_temp_dir, manager) = setup_test_manager();

        let mut config = Config::default();
        config.storage.quota_bytes = 0;
        manager
            .save(&config)
            .expect_err("Should not save invalid config");
        assert!(!manager.config_path().exists());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            lookup(&[
                ("KPIBOARD_SYNC_STRATEGY", "Strict_Timestamp"),
                ("KPIBOARD_SYNC_POLL_INTERVAL_SECS", "300"),
                ("KPIBOARD_SYNC_DEBOUNCE_MS", "250"),
                ("KPIBOARD_REMOTE_TIMEOUT_SECS", "5"),
                ("KPIBOARD_STORAGE_QUOTA_BYTES", "1048576"),
            ]),
        );

        assert_eq!(config.sync.strategy, ResolutionStrategy::StrictTimestamp);
        assert_eq!(config.sync.poll_interval_secs, 300);
        assert_eq!(config.sync.debounce_ms, 250);
        assert_eq!(config.remote.timeout_secs, 5);
        assert_eq!(config.storage.quota_bytes, 1_048_576);
    }

    #[test]
    fn test_unparseable_overrides_are_ignored() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            lookup(&[
                ("KPIBOARD_SYNC_STRATEGY", "newest_wins"),
                ("KPIBOARD_SYNC_POLL_INTERVAL_SECS", "soon"),
            ]),
        );
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_override_from_process() {
        let (_temp_dir, manager) = setup_test_manager();
        manager.save(&Config::default()).expect("Should save");

        std::env::set_var("KPIBOARD_REMOTE_TIMEOUT_SECS", "42");
        let config = manager
            .load_with_env_overrides()
            .expect("Should load with overrides");
        std::env::remove_var("KPIBOARD_REMOTE_TIMEOUT_SECS");

        assert_eq!(config.remote.timeout_secs, 42);
    }

    #[test]
    fn test_restore_backup_undoes_last_save() {
        let (_temp_dir, manager) = setup_test_manager();
        manager.initialize().expect("Should initialize");
        manager
            .update(|config| config.sync.strategy = ResolutionStrategy::SmartMerge)
            .expect("Should update");

        let restored = manager.restore_backup().expect("Should restore");
        assert_eq!(restored, Config::default());
        assert_eq!(manager.load().expect("Should load"), Config::default());
    }

    #[test]
    fn test_sync_options_replace_only_invalid_sections() {
        let (_temp_dir, manager) = setup_test_manager();
        std::fs::write(
            manager.config_path(),
            "[sync]\nstrategy = \"smart_merge\"\ndebounce_ms = 5\n\n[remote]\ntimeout_secs = 4\n",
        )
        .expect("Should write");

        let loaded = manager.load_detailed().expect("Should load");
        assert!(loaded.from_file);
        assert_eq!(loaded.warnings.len(), 1);

        let options = manager.sync_options_with(lookup(&[]));
        assert_eq!(options.strategy, ResolutionStrategy::HybridMetadata);
        assert_eq!(options.debounce, SyncOptions::default().debounce);
        assert_eq!(options.remote_timeout, std::time::Duration::from_secs(4));
    }

    #[test]
    fn test_sync_options_from_empty_file() {
        let (_temp_dir, manager) = setup_test_manager();
        std::fs::write(manager.config_path(), "").expect("Should write");
        assert_eq!(
            manager.sync_options_with(lookup(&[])),
            SyncOptions::default()
        );
    }

    #[test]
    fn test_config_file_path() {
        let (_temp_dir, manager) = setup_test_manager();
        assert!(manager.config_path().ends_with("config.toml"));
    }
}
