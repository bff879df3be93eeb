//! Engine adapters behind one interface.
//!
//! Each backend gets one adapter implementing [`Adapter`]:
//! - [`MySqlAdapter`]: sqlx pool, engine-reported insert ids
//! - [`PostgresAdapter`]: sqlx pool, `RETURNING` insert ids
//! - [`SqliteAdapter`]: embedded engine thread with snapshot persistence
//!
//! Adapters receive SQL that has already been translated for their engine and
//! hand rows back as [`Row`] values. They never retry or reinterpret engine
//! errors.

mod mysql;
mod postgres;
mod sqlite;

use async_trait::async_trait;

pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

use crate::storage::StorageError;
use crate::storage::dialect::Translation;
use crate::storage::types::{BackendKind, Row, RunResult, Value};

/// Probe issued after a networked pool is opened.
pub(crate) const PROBE_SQL: &str = "SELECT 1";

/// Operations every engine adapter provides.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Engine served by this adapter.
    fn kind(&self) -> BackendKind;

    /// Execute a mutating statement.
    async fn run(&self, stmt: &Translation, params: &[Value]) -> Result<RunResult, StorageError>;

    /// Execute a query and return its first row, if any.
    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, StorageError>;

    /// Execute a query and return every row in engine order.
    async fn all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError>;

    /// Execute parameterless SQL, possibly several statements.
    async fn exec(&self, sql: &str) -> Result<(), StorageError>;
}

/// Build an `UnsupportedColumn` error.
pub(crate) fn unsupported(column: &str, type_name: &str) -> StorageError {
    StorageError::UnsupportedColumn {
        column: column.to_string(),
        type_name: type_name.to_string(),
    }
}
