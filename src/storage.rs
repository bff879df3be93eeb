//! Storage Layer
//!
//! One persistence interface over three engines:
//! - **MySQL**: `sqlx` pool, `?` placeholders, engine-reported insert ids
//! - **PostgreSQL**: `sqlx` pool, `$n` placeholders, `RETURNING id`
//! - **SQLite**: in-memory engine on a dedicated thread, flushed to a snapshot
//!   file after every mutation
//!
//! # Components
//!
//! - [`Database`] / [`Statement`]: Unified `run` / `get` / `all` / `exec` interface
//! - [`dialect`]: Canonical-to-native placeholder translation
//! - [`db`]: Engine adapters behind the [`db::Adapter`] trait
//! - [`StorageBuilder`] / [`Storage`]: Initialization and lifecycle management
//! - [`schema`]: Content table bootstrap

mod actor;
mod builder;
pub mod db;
pub mod dialect;
mod error;
pub mod schema;
mod statement;
mod types;

pub use actor::IN_MEMORY_PATH;
pub use builder::{Storage, StorageBuilder};
pub use error::StorageError;
pub use statement::{Database, Statement};
pub use types::{BackendKind, Row, RunResult, Value};
