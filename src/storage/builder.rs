//! Storage builder and lifecycle.
//!
//! [`StorageBuilder`] opens exactly one backend and wraps it in a
//! [`Database`]. [`Storage`] owns the configuration and creates that handle
//! lazily on the first [`Storage::init`], returning the same handle afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::config::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_SQLITE_PATH,
    DatabaseConfig,
};
use crate::storage::StorageError;
use crate::storage::db::{MySqlAdapter, PostgresAdapter, SqliteAdapter};
use crate::storage::statement::Database;
use crate::storage::types::BackendKind;

/// Builder for constructing the storage layer.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    kind: BackendKind,
    url: Option<String>,
    path: PathBuf,
    max_connections: u32,
    connect_timeout: Duration,
    channel_capacity: usize,
}

impl StorageBuilder {
    /// Create a new storage builder for `kind`.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            url: None,
            path: PathBuf::from(DEFAULT_SQLITE_PATH),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Create a builder from a validated database configuration.
    pub fn from_config(config: &DatabaseConfig) -> Self {
        let mut builder = Self::new(config.driver)
            .path(&config.path)
            .max_connections(config.max_connections)
            .connect_timeout(config.connect_timeout)
            .channel_capacity(config.channel_capacity);
        builder.url = config.url().map(str::to_string);
        builder
    }

    /// Set the connection URL (networked backends).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the snapshot file path (embedded backend).
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Set the connection pool size (networked backends).
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set how long to wait for a pooled connection (networked backends).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the channel capacity for engine commands (embedded backend).
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Open the backend and return its handle.
    ///
    /// # Errors
    /// - [`StorageError::Configuration`] for a missing URL or empty path
    /// - [`StorageError::Connectivity`] if a networked server fails the probe
    /// - [`StorageError::Persistence`] / [`StorageError::Sqlite`] if the
    ///   snapshot cannot be loaded
    pub async fn build(self) -> Result<Database, StorageError> {
        if self.max_connections == 0 || self.channel_capacity == 0 {
            return Err(StorageError::Configuration(
                "max_connections and channel_capacity must be positive".to_string(),
            ));
        }

        let db = match self.kind {
            BackendKind::MySql => {
                let url = self.require_url()?;
                tracing::info!(backend = %self.kind, "Connecting to database server");
                Database::new(
                    MySqlAdapter::connect(url, self.max_connections, self.connect_timeout).await?,
                )
            }
            BackendKind::Postgres => {
                let url = self.require_url()?;
                tracing::info!(backend = %self.kind, "Connecting to database server");
                Database::new(
                    PostgresAdapter::connect(url, self.max_connections, self.connect_timeout)
                        .await?,
                )
            }
            BackendKind::Sqlite => {
                if self.path.as_os_str().is_empty() {
                    return Err(StorageError::Configuration(
                        "sqlite snapshot path must not be empty".to_string(),
                    ));
                }
                tracing::info!(
                    backend = %self.kind,
                    path = %self.path.display(),
                    "Opening embedded database"
                );
                Database::new(SqliteAdapter::open(&self.path, self.channel_capacity)?)
            }
        };

        Ok(db)
    }

    fn require_url(&self) -> Result<&str, StorageError> {
        self.url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                StorageError::Configuration(format!(
                    "a connection url is required for backend '{}'",
                    self.kind
                ))
            })
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Lazily initialized storage layer.
///
/// Construct one per process and share it (by reference or `Arc`) with
/// whatever composes the request handlers.
#[derive(Debug)]
pub struct Storage {
    builder: StorageBuilder,
    db: OnceCell<Database>,
}

impl Storage {
    /// Create an uninitialized storage layer.
    pub fn new(builder: StorageBuilder) -> Self {
        Self {
            builder,
            db: OnceCell::new(),
        }
    }

    /// Create an uninitialized storage layer from configuration.
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(StorageBuilder::from_config(config))
    }

    /// Open the backend on first use; afterwards return the same handle.
    ///
    /// Concurrent first calls wait on a single open. A failed open leaves the
    /// storage uninitialized and the next call tries again.
    pub async fn init(&self) -> Result<Database, StorageError> {
        let db = self
            .db
            .get_or_try_init(|| self.builder.clone().build())
            .await?;
        Ok(db.clone())
    }

    /// Handle created by a completed [`Storage::init`].
    pub fn database(&self) -> Option<&Database> {
        self.db.get()
    }

    pub fn is_ready(&self) -> bool {
        self.db.initialized()
    }

    /// Backend this storage opens.
    pub fn kind(&self) -> BackendKind {
        self.builder.kind
    }
}
