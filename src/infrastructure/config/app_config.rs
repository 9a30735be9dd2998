//! Application configuration.

use directories::ProjectDirs;
use serde::Deserialize;
use std::path::PathBuf;

use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DISK_FORMAT_VERSION};
use crate::infrastructure::image::http_transport::DEFAULT_TIMEOUT_SECS;
use crate::infrastructure::image::location::{DEFAULT_CACHE_NAME, select_cache_dir};
use crate::infrastructure::image::memory_cache::{DEFAULT_MAX_MEMORY_KB, default_capacity_kb};
use crate::infrastructure::image::DEFAULT_MAX_CONCURRENT_FETCHES;

use super::storage::ConfigError;

pub(crate) const APP_NAME: &str = "tiered-image-cache";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Log file path.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Cache tier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Logical cache name, used as the disk directory name.
    #[serde(default = "default_cache_name")]
    pub cache_name: String,

    /// Preferred base directory (e.g. removable storage). Used only if it
    /// exists when the cache opens.
    #[serde(default)]
    pub external_dir: Option<PathBuf>,

    /// Explicit disk cache directory. Overrides location selection.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Disk tier byte budget.
    #[serde(default = "default_disk_cache_bytes")]
    pub disk_cache_bytes: u64,

    /// Host memory budget in KB; the memory tier takes an eighth of it.
    #[serde(default = "default_max_memory_kb")]
    pub max_memory_kb: usize,

    /// Explicit memory tier capacity in KB. Overrides the derived value.
    #[serde(default)]
    pub memory_cache_kb: Option<usize>,

    /// Maximum concurrent network fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// HTTP client timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// On-disk format version. Changing it discards existing entries.
    #[serde(default = "default_disk_format_version")]
    pub disk_format_version: u32,
}

fn default_cache_name() -> String {
    DEFAULT_CACHE_NAME.to_string()
}

const fn default_disk_cache_bytes() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_max_memory_kb() -> usize {
    DEFAULT_MAX_MEMORY_KB
}

const fn default_max_concurrent_fetches() -> usize {
    DEFAULT_MAX_CONCURRENT_FETCHES
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_disk_format_version() -> u32 {
    DISK_FORMAT_VERSION
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: default_cache_name(),
            external_dir: None,
            cache_dir: None,
            disk_cache_bytes: default_disk_cache_bytes(),
            max_memory_kb: default_max_memory_kb(),
            memory_cache_kb: None,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            timeout_secs: default_timeout_secs(),
            disk_format_version: default_disk_format_version(),
        }
    }
}

impl CacheConfig {
    /// Returns the memory tier capacity in KB.
    #[must_use]
    pub fn memory_capacity_kb(&self) -> usize {
        self.memory_cache_kb
            .unwrap_or_else(|| default_capacity_kb(self.max_memory_kb))
    }

    /// Checks values that would leave a tier unusable.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.cache_name.is_empty() {
            return invalid("cache.cache_name", "must not be empty");
        }
        if self.cache_name.contains(['/', '\\']) || self.cache_name == ".." {
            return invalid("cache.cache_name", "must be a single directory name");
        }
        if self.disk_cache_bytes == 0 {
            return invalid("cache.disk_cache_bytes", "must be greater than zero");
        }
        if self.memory_capacity_kb() == 0 {
            return invalid("cache.memory_cache_kb", "must be greater than zero");
        }
        if self.max_concurrent_fetches == 0 {
            return invalid("cache.max_concurrent_fetches", "must be at least 1");
        }
        if self.timeout_secs == 0 {
            return invalid("cache.timeout_secs", "must be at least 1");
        }
        Ok(())
    }

    /// Returns the directory the disk tier opens in.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            select_cache_dir(&self.cache_name, self.external_dir.as_deref())
        })
    }
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(disk_cache_bytes) = args.disk_cache_bytes {
            self.cache.disk_cache_bytes = disk_cache_bytes;
        }
        if let Some(memory_cache_kb) = args.memory_cache_kb {
            self.cache.memory_cache_kb = Some(memory_cache_kb);
        }
        if let Some(max_concurrent_fetches) = args.max_concurrent_fetches {
            self.cache.max_concurrent_fetches = max_concurrent_fetches;
        }
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("tiered-image-cache.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}
