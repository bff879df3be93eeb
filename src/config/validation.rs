//! Configuration errors and the string helpers used while loading it.
//!
//! Connection URLs usually carry credentials, so config files reference them
//! through `${VAR}` placeholders that [`expand_env_vars`] fills in before the
//! YAML is parsed.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML is malformed or names an unknown driver.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A setting is missing or inconsistent with the selected driver.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `${NAME}` or `${NAME:-fallback}`.
static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("env reference pattern is valid")
});

/// Parse a human-readable timeout such as `30s`, `500ms` or `1m 30s`.
///
/// ```
/// use sitedb::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert!(parse_duration("30").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s.trim()).map_err(|e| format!("invalid duration '{s}': {e}"))
}

/// Replace `${NAME}` / `${NAME:-fallback}` with the environment value.
///
/// An unset variable takes its fallback, or the empty string; a database URL
/// left empty this way is then reported as missing by validation.
pub fn expand_env_vars(input: &str) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1])
                .ok()
                .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_timeouts() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 5s ").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_rejects_missing_unit() {
        let err = parse_duration("30").unwrap_err();
        assert!(err.contains("'30'"), "{err}");
        assert!(parse_duration("").is_err());
        assert!(parse_duration("   ").is_err());
    }

    #[test]
    fn test_unset_reference_takes_fallback() {
        let yaml = "url: ${SITEDB_UNSET_DB_URL_12345:-postgres://localhost/site}";
        assert_eq!(expand_env_vars(yaml), "url: postgres://localhost/site");

        let yaml = "url: '${SITEDB_UNSET_DB_URL_67890}'";
        assert_eq!(expand_env_vars(yaml), "url: ''");

        // Text without references passes through untouched, `$` included.
        assert_eq!(expand_env_vars("path: $HOME/site.db"), "path: $HOME/site.db");
    }

    #[test]
    fn test_set_reference_wins_over_fallback() {
        // SAFETY: the variable name is unique to this test.
        unsafe {
            std::env::set_var("SITEDB_TEST_EXPAND_PASSWORD", "hunter2");
        }
        let result = expand_env_vars("mysql://cms:${SITEDB_TEST_EXPAND_PASSWORD:-none}@db/site");
        assert_eq!(result, "mysql://cms:hunter2@db/site");
        // SAFETY: as above.
        unsafe {
            std::env::remove_var("SITEDB_TEST_EXPAND_PASSWORD");
        }
    }

    #[test]
    fn test_read_error_names_file() {
        let err = ConfigError::Read {
            path: PathBuf::from("configs/missing.yaml"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("configs/missing.yaml"));
    }
}
