//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::BackendKind;

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default snapshot file for the embedded backend.
pub const DEFAULT_SQLITE_PATH: &str = "data/site.db";

/// Default connection pool size for networked backends.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default time to wait for a pooled connection (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default embedded engine command queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

fn default_driver() -> BackendKind {
    BackendKind::Sqlite
}

fn default_path() -> String {
    DEFAULT_SQLITE_PATH.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_bootstrap_schema() -> bool {
    true
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend engine (default: sqlite).
    #[serde(default = "default_driver")]
    pub driver: BackendKind,

    /// Connection URL for networked backends. Empty counts as unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Snapshot file for the embedded backend, or `:memory:`.
    #[serde(default = "default_path")]
    pub path: String,

    /// Connection pool size for networked backends (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Time to wait for a pooled connection (default: 30s).
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// MPSC channel capacity for the embedded engine (default: 1024).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            url: None,
            path: default_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, if set and non-empty.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// Validate database settings for the selected driver.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.driver {
            BackendKind::MySql | BackendKind::Postgres => {
                let url = self.url().ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "database url is required for driver '{}'",
                        self.driver
                    ))
                })?;
                let schemes: &[&str] = match self.driver {
                    BackendKind::MySql => &["mysql://", "mariadb://"],
                    _ => &["postgres://", "postgresql://"],
                };
                if !schemes.iter().any(|s| url.starts_with(s)) {
                    return Err(ConfigError::Invalid(format!(
                        "database url scheme does not match driver '{}' (expected {})",
                        self.driver,
                        schemes.join(" or ")
                    )));
                }
            }
            BackendKind::Sqlite => {
                if self.path.trim().is_empty() {
                    return Err(ConfigError::Invalid(
                        "database path must not be empty for driver 'sqlite'".to_string(),
                    ));
                }
            }
        }

        // Validate pool size
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database max_connections must be positive".to_string(),
            ));
        }

        // Validate connect timeout
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "database connect_timeout must be positive".to_string(),
            ));
        }

        // Validate channel capacity
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "database channel_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Create missing content tables on start-up (default: true).
    #[serde(default = "default_bootstrap_schema")]
    pub bootstrap_schema: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            bootstrap_schema: default_bootstrap_schema(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text without validating it.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(&expand_env_vars(content))?)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()
    }
}
