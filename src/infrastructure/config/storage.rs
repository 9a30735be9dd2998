//! Config file lookup and validation.

use super::app_config::AppConfig;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors locating, parsing or validating the configuration file.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Locates the configuration file and turns it into a checked [`AppConfig`].
///
/// A missing file is not an error: every setting has a default. Nothing is
/// ever written back.
#[derive(Debug, Clone)]
pub struct StorageManager {
    config_path: PathBuf,
}

impl StorageManager {
    /// Uses `path_override`, or the per-user config file when `None`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigDirNotFound` if no override is given and the platform
    /// config directory cannot be determined.
    pub fn new(path_override: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path_override {
            Some(path) => path.to_path_buf(),
            None => AppConfig::default_config_path().ok_or(ConfigError::ConfigDirNotFound)?,
        };
        Ok(Self { config_path })
    }

    /// Reads, parses and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Read` if the file exists but cannot be read, `Parse` if it
    /// is not valid TOML for [`AppConfig`], and `Invalid` if a cache
    /// setting is out of range.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let config = match fs::read_to_string(&self.config_path) {
            Ok(content) => {
                toml::from_str::<AppConfig>(&content).map_err(|source| ConfigError::Parse {
                    path: self.config_path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.config_path.display(), "No config file, using defaults");
                AppConfig::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.config_path.clone(),
                    source,
                });
            }
        };

        config.cache.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let manager = StorageManager::new(Some(&path)).unwrap();

        let config = manager.load_config().unwrap();

        assert_eq!(config.cache.cache_name, "thumbnails");
        assert!(!path.exists());
    }

    #[test]
    fn test_reads_cache_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[cache]\ntimeout_secs = 5\nmax_concurrent_fetches = 8\n").unwrap();

        let config = StorageManager::new(Some(&path))
            .unwrap()
            .load_config()
            .unwrap();

        assert_eq!(config.cache.timeout_secs, 5);
        assert_eq!(config.cache.max_concurrent_fetches, 8);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "invalid_toml = [").unwrap();

        let err = StorageManager::new(Some(&path))
            .unwrap()
            .load_config()
            .unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "invalid_toml = [");
    }

    #[test]
    fn test_out_of_range_value_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[cache]\nmax_concurrent_fetches = 0\n").unwrap();

        let err = StorageManager::new(Some(&path))
            .unwrap()
            .load_config()
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "cache.max_concurrent_fetches",
                ..
            }
        ));
        assert!(err.to_string().contains("max_concurrent_fetches"));
    }

    #[test]
    fn test_unreadable_path_is_read_error() {
        let dir = tempdir().unwrap();

        let err = StorageManager::new(Some(dir.path()))
            .unwrap()
            .load_config()
            .unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
