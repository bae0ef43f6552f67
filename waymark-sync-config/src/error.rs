//! Typed error variants for the waymark-sync-config crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used by config I/O.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error occurred reading or writing the config file.
    #[error("I/O error on config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file contained invalid YAML that could not be parsed.
    #[error("YAML parse error in config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// The in-memory config could not be serialized.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml_ng::Error),

    /// A field value failed semantic validation.
    #[error("Config validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_path() {
        let err = ConfigError::io(
            "/tmp/waymark-sync/config.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("config.yaml"), "should name the file: {msg}");
        assert!(msg.contains("denied"), "should carry the cause: {msg}");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ConfigError::Validation("max_concurrent_fetches must be > 0".to_string());
        assert!(err.to_string().contains("max_concurrent_fetches"));
    }
}
