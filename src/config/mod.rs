//! Configuration module for sitedb.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (driver, URL or snapshot path, pool and queue sizes)
//! - Schema bootstrap on start-up

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_SQLITE_PATH,
};
