//! Unified statement interface.
//!
//! Callers hold a [`Database`] and write every query in canonical form. A
//! [`Statement`] translates its query for the active engine on every call and
//! dispatches to the adapter, so the same handler code runs on all backends.

use std::sync::Arc;

use crate::storage::StorageError;
use crate::storage::db::Adapter;
use crate::storage::dialect::translate;
use crate::storage::types::{BackendKind, Row, RunResult, Value};

/// Shared database handle.
///
/// Cheap to clone; every clone talks to the same pool or engine thread.
#[derive(Clone)]
pub struct Database {
    adapter: Arc<dyn Adapter>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl Database {
    pub(crate) fn new(adapter: impl Adapter) -> Self {
        Self {
            adapter: Arc::new(adapter),
        }
    }

    /// Prepare a canonical query. Nothing is sent to the engine.
    pub fn prepare<'a>(&'a self, sql: &'a str) -> Statement<'a> {
        Statement { db: self, sql }
    }

    /// Execute parameterless SQL, possibly several statements.
    pub async fn exec(&self, sql: &str) -> Result<(), StorageError> {
        self.adapter.exec(sql).await
    }

    /// Backend serving this handle.
    #[inline]
    pub fn kind(&self) -> BackendKind {
        self.adapter.kind()
    }

    #[inline]
    pub fn is_mysql(&self) -> bool {
        self.kind() == BackendKind::MySql
    }

    #[inline]
    pub fn is_postgres(&self) -> bool {
        self.kind() == BackendKind::Postgres
    }

    #[inline]
    pub fn is_sqlite(&self) -> bool {
        self.kind() == BackendKind::Sqlite
    }

    /// Whether both handles share the same underlying backend.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.adapter, &other.adapter)
    }
}

/// A canonical query bound to a [`Database`].
#[derive(Debug, Clone, Copy)]
pub struct Statement<'a> {
    db: &'a Database,
    sql: &'a str,
}

impl Statement<'_> {
    /// Canonical SQL as written by the caller.
    pub fn sql(&self) -> &str {
        self.sql
    }

    /// Execute a mutating statement.
    ///
    /// `inserted_id` holds the key of a freshly inserted row and is `None`
    /// for updates and deletes.
    pub async fn run(&self, params: &[Value]) -> Result<RunResult, StorageError> {
        let kind = self.db.kind();
        let translated = translate(self.sql, kind, true)?;
        tracing::trace!(
            backend = %kind,
            placeholders = translated.placeholder_count(),
            params = params.len(),
            "run"
        );
        self.db.adapter.run(&translated, params).await
    }

    /// First matching row, or `None` when nothing matches.
    pub async fn get(&self, params: &[Value]) -> Result<Option<Row>, StorageError> {
        let translated = translate(self.sql, self.db.kind(), false)?;
        self.db.adapter.get(&translated.sql, params).await
    }

    /// Every matching row in engine order.
    pub async fn all(&self, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        let translated = translate(self.sql, self.db.kind(), false)?;
        self.db.adapter.all(&translated.sql, params).await
    }
}
