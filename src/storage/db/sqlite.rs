//! Embedded SQLite backend fronting the engine actor.
//!
//! The adapter owns only the command channel. Statements, parameters and
//! replies cross the channel by value; the actor thread does the work.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::Adapter;
use crate::storage::StorageError;
use crate::storage::actor::{Command, DbActor};
use crate::storage::dialect::Translation;
use crate::storage::types::{BackendKind, Row, RunResult, Value};

/// Handle to the embedded engine thread.
#[derive(Clone)]
pub struct SqliteAdapter {
    tx: mpsc::Sender<Command>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteAdapter {
    /// Load (or create) the snapshot at `path` and start the engine thread.
    ///
    /// The thread is detached; it exits when the last adapter clone is dropped.
    pub fn open(path: &Path, channel_capacity: usize) -> Result<Self, StorageError> {
        let (_handle, tx) = DbActor::spawn(path, channel_capacity)?;
        Ok(Self {
            tx,
            path: path.to_path_buf(),
        })
    }

    /// Snapshot file backing this engine.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, StorageError>>) -> Command,
    ) -> Result<T, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| StorageError::EngineStopped)?;
        rx.await.map_err(|_| StorageError::EngineStopped)?
    }
}

#[async_trait]
impl Adapter for SqliteAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn run(&self, stmt: &Translation, params: &[Value]) -> Result<RunResult, StorageError> {
        self.request(|reply| Command::Run {
            sql: stmt.sql.clone(),
            params: params.to_vec(),
            is_insert: stmt.is_insert,
            reply,
        })
        .await
    }

    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, StorageError> {
        let rows = self
            .request(|reply| Command::Query {
                sql: sql.to_string(),
                params: params.to_vec(),
                first_only: true,
                reply,
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        self.request(|reply| Command::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
            first_only: false,
            reply,
        })
        .await
    }

    async fn exec(&self, sql: &str) -> Result<(), StorageError> {
        self.request(|reply| Command::Exec {
            sql: sql.to_string(),
            reply,
        })
        .await
    }
}
