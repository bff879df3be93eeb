//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (configuration, connectivity,
//! translation, engine, persistence).

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid or missing backend kind, URL or snapshot path.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Networked backend unreachable (init probe, I/O, TLS or pool exhaustion).
    #[error("connectivity error: {0}")]
    Connectivity(#[source] sqlx::Error),

    /// Malformed canonical query.
    #[error("translation error: {0}")]
    Translation(String),

    /// MySQL or PostgreSQL reported an error executing the statement.
    #[error("database error: {0}")]
    Sqlx(#[source] sqlx::Error),

    /// The embedded SQLite engine reported an error executing the statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A parameter value cannot be converted to its placeholder's type.
    #[error("cannot bind {value_kind} to parameter ${index} of type '{type_name}'")]
    Parameter {
        index: usize,
        type_name: String,
        value_kind: &'static str,
    },

    /// A result column has a type the layer cannot decode.
    #[error("unsupported column type '{type_name}' for column '{column}'")]
    UnsupportedColumn { column: String, type_name: String },

    /// The snapshot file could not be read or written.
    #[error("failed to persist snapshot '{}': {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The embedded engine thread is no longer running.
    #[error("embedded engine stopped")]
    EngineStopped,
}

impl StorageError {
    /// Wrap a snapshot I/O failure.
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors raised because a server could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connectivity(err),
            other => Self::Sqlx(other),
        }
    }
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
