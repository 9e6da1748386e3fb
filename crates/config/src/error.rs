// crates/config/src/error.rs
//! Errors produced while loading or saving `config.toml`

use kpiboard_settings::ValidationError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// File operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Read,
    Write,
    Backup,
    CreateDirectory,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Backup => "back up",
            Self::CreateDirectory => "create the directory of",
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not {action} {}: {source}", path.display())]
    Io {
        action: FileAction,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but holds nothing but whitespace
    #[error("Config file {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("Config file {} is not valid TOML: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Could not encode config as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    /// Refused to save out-of-range values
    #[error("Invalid config: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),

    /// The platform has no standard location of this kind ("config", "data")
    #[error("No {0} directory is defined for this platform")]
    NoPlatformDirectory(&'static str),
}

impl ConfigError {
    pub(crate) fn io(action: FileAction, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Fields named by an `Invalid` error
    pub fn invalid_fields(&self) -> Vec<&str> {
        match self {
            Self::Invalid(errors) => errors.iter().map(|e| e.field.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_action_and_path() {
        let err = ConfigError::io(
            FileAction::Backup,
            "/etc/kpiboard/config.toml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "Could not back up /etc/kpiboard/config.toml: denied"
        );
    }

    #[test]
    fn test_invalid_lists_every_field() {
        let err = ConfigError::Invalid(vec![
            ValidationError::with_value("sync.debounce_ms", "must be between 100 and 60000", 10),
            ValidationError::with_value("remote.max_retries", "must be between 1 and 10", 0),
        ]);
        assert_eq!(
            err.invalid_fields(),
            vec!["sync.debounce_ms", "remote.max_retries"]
        );
        assert!(err.to_string().contains("(got: 10)"));
        assert!(ConfigError::Empty(PathBuf::from("c.toml")).invalid_fields().is_empty());
    }
}
