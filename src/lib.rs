//! sitedb - Multi-Backend Persistence for a Site CMS
//!
//! This crate lets the same content-management handlers run unmodified on
//! MySQL, PostgreSQL or an embedded SQLite snapshot file. It can be used as a
//! library, or run as a standalone binary with the `sitedb` executable.
//!
//! # Architecture
//!
//! - **Config**: YAML configuration with environment expansion
//! - **Storage**: Dialect translation, engine adapters, unified statements and
//!   lazy initialization
//!
//! # Example
//!
//! ```rust,no_run
//! use sitedb::{BackendKind, Storage, StorageBuilder, params};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sitedb::StorageError> {
//!     let storage = Storage::new(StorageBuilder::new(BackendKind::Sqlite).path("data/site.db"));
//!     let db = storage.init().await?;
//!     sitedb::storage::schema::init_schema(&db).await?;
//!
//!     let created = db
//!         .prepare("INSERT INTO projects (title, slug) VALUES (?, ?)")
//!         .run(params!["Portfolio", "portfolio"])
//!         .await?;
//!     let row = db
//!         .prepare("SELECT * FROM projects WHERE id = ?")
//!         .get(params![created.inserted_id])
//!         .await?;
//!     println!("{row:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod storage;

pub use storage::{
    BackendKind, Database, Row, RunResult, Statement, Storage, StorageBuilder, StorageError, Value,
};
