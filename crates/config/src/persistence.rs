// crates/config/src/persistence.rs
//! `config.toml` on disk
//!
//! Saves replace the file in one rename and keep the previous contents in
//! `config.toml.backup`, which `restore_backup` can bring back.

use crate::error::{ConfigError, ConfigResult, FileAction};
use crate::{Config, CONFIG_VERSION};
use kpiboard_settings::ValidationError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const HEADER: &str = "\
# KPI Board settings sync configuration
# Missing keys take their defaults; environment variables prefixed with
# KPIBOARD_ override the values below.

";

/// What `ConfigFile::load` found
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub config: Config,
    /// Out-of-range values, kept as written
    pub warnings: Vec<ValidationError>,
    /// False when no file existed and defaults were used
    pub from_file: bool,
}

/// The config file at one path
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("toml.backup")
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads the file; a missing file yields the defaults
    pub fn load(&self) -> ConfigResult<LoadedConfig> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No config at {}; using defaults", self.path.display());
                return Ok(LoadedConfig {
                    config: Config::default(),
                    warnings: Vec::new(),
                    from_file: false,
                });
            }
            Err(e) => return Err(ConfigError::io(FileAction::Read, &self.path, e)),
        };

        let config = parse(&self.path, &contents)?;
        let warnings = config.validate().err().unwrap_or_default();
        for warning in &warnings {
            log::warn!("{}: {}", self.path.display(), warning);
        }

        Ok(LoadedConfig {
            config,
            warnings,
            from_file: true,
        })
    }

    /// Validates and writes `config`, backing up the current file first
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        config.validate().map_err(ConfigError::Invalid)?;
        let body = toml::to_string_pretty(config)?;

        let dir = self.directory();
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| ConfigError::io(FileAction::CreateDirectory, &self.path, e))?;
            log::info!("Created config directory {}", dir.display());
        }
        if self.exists() {
            fs::copy(&self.path, self.backup_path())
                .map_err(|e| ConfigError::io(FileAction::Backup, &self.path, e))?;
        }

        write_atomically(dir, &self.path, &format!("{HEADER}{body}"))?;
        log::info!(
            "Saved config (strategy {}) to {}",
            config.sync.strategy,
            self.path.display()
        );
        Ok(())
    }

    /// Replaces the file with its backup and returns the restored config
    pub fn restore_backup(&self) -> ConfigResult<Config> {
        let backup = self.backup_path();
        let contents = fs::read_to_string(&backup)
            .map_err(|e| ConfigError::io(FileAction::Read, &backup, e))?;
        let config = parse(&backup, &contents)?;

        write_atomically(self.directory(), &self.path, &contents)?;
        log::info!("Restored {} from its backup", self.path.display());
        Ok(config)
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

fn parse(path: &Path, contents: &str) -> ConfigResult<Config> {
    if contents.trim().is_empty() {
        return Err(ConfigError::Empty(path.to_path_buf()));
    }

    let config: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if config.version > CONFIG_VERSION {
        log::warn!(
            "{} was written for config version {} (this build reads {}); unknown keys are ignored",
            path.display(),
            config.version,
            CONFIG_VERSION
        );
    }
    Ok(config)
}

/// Writes through a temp file in `dir` so readers never see a partial file
fn write_atomically(dir: &Path, target: &Path, contents: &str) -> ConfigResult<()> {
    let write_error = |e| ConfigError::io(FileAction::Write, target, e);

    let mut file = NamedTempFile::new_in(dir).map_err(write_error)?;
    file.write_all(contents.as_bytes()).map_err(write_error)?;
    file.as_file().sync_all().map_err(write_error)?;
    file.persist(target).map_err(|e| write_error(e.error))?;
    Ok(())
}
