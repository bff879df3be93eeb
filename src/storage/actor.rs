//! Embedded engine actor with a dedicated connection and MPSC channel.
//!
//! One thread owns the in-memory SQLite connection and processes commands in
//! arrival order. Every mutating command writes the full image to the snapshot
//! file (staging file, then rename) before its reply is sent, so a caller that
//! sees `Ok` can rely on the file holding its change.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, params_from_iter};
use tokio::sync::{mpsc, oneshot};

use crate::storage::StorageError;
use crate::storage::types::{Row, RunResult, Value};

// =============================================================================
// Constants
// =============================================================================

/// Snapshot path that disables persistence.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Suffix of the staging file written before the atomic rename.
const STAGING_SUFFIX: &str = ".tmp";

// =============================================================================
// Commands
// =============================================================================

pub type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// Commands sent to the engine actor.
#[derive(Debug)]
pub enum Command {
    /// Execute one mutating statement, then persist.
    Run {
        sql: String,
        params: Vec<Value>,
        is_insert: bool,
        reply: Reply<RunResult>,
    },
    /// Execute a query; `first_only` stops after the first row.
    Query {
        sql: String,
        params: Vec<Value>,
        first_only: bool,
        reply: Reply<Vec<Row>>,
    },
    /// Execute parameterless SQL (possibly several statements), then persist.
    Exec { sql: String, reply: Reply<()> },
}

// =============================================================================
// Actor
// =============================================================================

/// Owner of the embedded connection and its snapshot file.
pub struct DbActor {
    conn: Connection,
    rx: mpsc::Receiver<Command>,
    snapshot: Option<PathBuf>,
}

impl DbActor {
    /// Open the engine and spawn the actor thread.
    ///
    /// An existing snapshot at `db_path` is loaded into a fresh in-memory
    /// engine; otherwise the engine starts empty and the parent directory is
    /// created. [`IN_MEMORY_PATH`] keeps everything in memory.
    ///
    /// Returns a tuple of:
    /// - `JoinHandle<()>`: Handle to the actor thread
    /// - `mpsc::Sender<Command>`: Channel sender for commands
    pub fn spawn(
        db_path: &Path,
        channel_capacity: usize,
    ) -> Result<(JoinHandle<()>, mpsc::Sender<Command>), StorageError> {
        let mut conn = Connection::open_in_memory()?;

        let snapshot = if db_path.as_os_str() == IN_MEMORY_PATH {
            None
        } else {
            load_snapshot(&mut conn, db_path)?;
            Some(db_path.to_path_buf())
        };

        let (tx, rx) = mpsc::channel(channel_capacity);
        let actor = DbActor { conn, rx, snapshot };
        let handle = thread::spawn(move || actor.run());

        Ok((handle, tx))
    }

    fn run(mut self) {
        tracing::info!(snapshot = ?self.snapshot, "SQLite engine started");

        // Ends once every sender (every `Database` clone) is gone.
        while let Some(cmd) = self.rx.blocking_recv() {
            self.handle_command(cmd);
        }

        tracing::info!("SQLite engine stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        // A dropped receiver means the caller gave up; the work is done anyway.
        match cmd {
            Command::Run {
                sql,
                params,
                is_insert,
                reply,
            } => {
                let result = self.run_statement(&sql, &params, is_insert);
                let _ = reply.send(result);
            }
            Command::Query {
                sql,
                params,
                first_only,
                reply,
            } => {
                let _ = reply.send(self.query(&sql, &params, first_only));
            }
            Command::Exec { sql, reply } => {
                let result = self.exec(&sql);
                let _ = reply.send(result);
            }
        }
    }

    // =========================================================================
    // Statement Operations
    // =========================================================================

    fn run_statement(
        &mut self,
        sql: &str,
        params: &[Value],
        is_insert: bool,
    ) -> Result<RunResult, StorageError> {
        {
            let mut stmt = self.conn.prepare(sql)?;
            let mut rows = stmt.query(params_from_iter(params))?;
            // Drained so statements with a RETURNING clause still complete.
            while rows.next()?.is_some() {}
        }

        let inserted_id = (is_insert && self.conn.changes() > 0)
            .then(|| self.conn.last_insert_rowid());

        self.persist()?;
        Ok(RunResult::new(inserted_id))
    }

    fn query(
        &self,
        sql: &str,
        params: &[Value],
        first_only: bool,
    ) -> Result<Vec<Row>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(Value::from))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(Row::new(columns.clone(), values));
            if first_only {
                break;
            }
        }
        Ok(out)
    }

    fn exec(&mut self, sql: &str) -> Result<(), StorageError> {
        let result = self.conn.execute_batch(sql);
        // Statements before a failing one have already been applied.
        let persisted = self.persist();
        result?;
        persisted
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Write the whole image to the staging file, then rename it into place.
    fn persist(&self) -> Result<(), StorageError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let staging = staging_path(path);

        if staging.exists() {
            fs::remove_file(&staging).map_err(|e| StorageError::persistence(&staging, e))?;
        }
        self.conn
            .backup(DatabaseName::Main, &staging, None)
            .map_err(|e| StorageError::persistence(&staging, std::io::Error::other(e)))?;
        fs::rename(&staging, path).map_err(|e| StorageError::persistence(path, e))?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            let bytes = fs::metadata(path).map(|m| m.len()).unwrap_or_default();
            tracing::debug!(path = %path.display(), bytes, "Snapshot persisted");
        }
        Ok(())
    }
}

/// Load `path` into `conn` if it exists; otherwise prepare its directory.
fn load_snapshot(conn: &mut Connection, path: &Path) -> Result<(), StorageError> {
    if path.exists() {
        conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)?;
        tracing::info!(path = %path.display(), "Snapshot loaded");
        return Ok(());
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| StorageError::persistence(parent, e))?;
    }
    tracing::info!(path = %path.display(), "No snapshot found, starting empty");
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(STAGING_SUFFIX);
    PathBuf::from(staging)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run(tx: &mpsc::Sender<Command>, sql: &str, params: Vec<Value>) -> RunResult {
        let (reply, rx) = oneshot::channel();
        tx.blocking_send(Command::Run {
            sql: sql.to_string(),
            params,
            is_insert: sql.trim_start().to_ascii_uppercase().starts_with("INSERT"),
            reply,
        })
        .unwrap();
        rx.blocking_recv().unwrap().unwrap()
    }

    fn exec(tx: &mpsc::Sender<Command>, sql: &str) -> Result<(), StorageError> {
        let (reply, rx) = oneshot::channel();
        tx.blocking_send(Command::Exec {
            sql: sql.to_string(),
            reply,
        })
        .unwrap();
        rx.blocking_recv().unwrap()
    }

    fn query(tx: &mpsc::Sender<Command>, sql: &str, first_only: bool) -> Vec<Row> {
        let (reply, rx) = oneshot::channel();
        tx.blocking_send(Command::Query {
            sql: sql.to_string(),
            params: Vec::new(),
            first_only,
            reply,
        })
        .unwrap();
        rx.blocking_recv().unwrap().unwrap()
    }

    #[test]
    fn test_actor_lifecycle() {
        let dir = tempdir().unwrap();
        let (handle, tx) = DbActor::spawn(&dir.path().join("test.db"), 16).unwrap();
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_run_persists_before_reply() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("site.db");
        let (handle, tx) = DbActor::spawn(&db_path, 16).unwrap();

        exec(&tx, "CREATE TABLE hero (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT)").unwrap();
        let result = run(
            &tx,
            "INSERT INTO hero (title) VALUES (?)",
            vec![Value::from("Welcome")],
        );
        assert_eq!(result.inserted_id, Some(1));

        // Read the file while the actor is still alive.
        let conn = Connection::open(&db_path).unwrap();
        let title: String = conn
            .query_row("SELECT title FROM hero WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(title, "Welcome");
        assert!(!staging_path(&db_path).exists());

        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_snapshot_reloaded() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("reload.db");

        let (handle, tx) = DbActor::spawn(&db_path, 16).unwrap();
        exec(&tx, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); INSERT INTO t (v) VALUES ('a');")
            .unwrap();
        drop(tx);
        handle.join().unwrap();

        let (handle, tx) = DbActor::spawn(&db_path, 16).unwrap();
        let rows = query(&tx, "SELECT id, v FROM t", false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("v"), Some(&Value::Text("a".into())));
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_update_has_no_inserted_id() {
        let (handle, tx) = DbActor::spawn(Path::new(IN_MEMORY_PATH), 16).unwrap();
        exec(&tx, "CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER)").unwrap();
        run(&tx, "INSERT INTO t (v) VALUES (?)", vec![Value::Integer(1)]);

        let result = run(&tx, "UPDATE t SET v = ? WHERE id = ?", vec![
            Value::Integer(2),
            Value::Integer(1),
        ]);
        assert_eq!(result.inserted_id, None);

        let rows = query(&tx, "SELECT v FROM t", true);
        assert_eq!(rows[0].values(), &[Value::Integer(2)]);
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_first_only_and_column_order() {
        let (handle, tx) = DbActor::spawn(Path::new(IN_MEMORY_PATH), 16).unwrap();
        exec(
            &tx,
            "CREATE TABLE s (id INTEGER PRIMARY KEY, name TEXT, active INTEGER);
             INSERT INTO s (name, active) VALUES ('a', 1), ('b', 0);",
        )
        .unwrap();

        let rows = query(&tx, "SELECT name, active, id FROM s ORDER BY id", true);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns(), &["name", "active", "id"]);
        assert_eq!(rows[0].get("active").and_then(Value::as_bool), Some(true));

        assert_eq!(query(&tx, "SELECT * FROM s", false).len(), 2);
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_engine_error_is_reported() {
        let (handle, tx) = DbActor::spawn(Path::new(IN_MEMORY_PATH), 16).unwrap();
        let err = exec(&tx, "CREATE TABLE").unwrap_err();
        assert!(matches!(err, StorageError::Sqlite(_)));
        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_corrupt_snapshot_fails_to_load() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("garbage.db");
        fs::write(&db_path, vec![b'x'; 4096]).unwrap();
        assert!(DbActor::spawn(&db_path, 16).is_err());
    }
}
