//! Integration tests against live MySQL and PostgreSQL servers.
//!
//! Set `SITEDB_TEST_MYSQL_URL` and/or `SITEDB_TEST_POSTGRES_URL` to run them;
//! each test returns early when its server is not configured. Every test works
//! in its own scratch table and drops it afterwards.

use std::sync::atomic::{AtomicU32, Ordering};

use sitedb::storage::schema::init_schema;
use sitedb::{BackendKind, Database, Storage, StorageBuilder, StorageError, Value, params};

// =============================================================================
// Test Helpers
// =============================================================================

static TABLE_SEQ: AtomicU32 = AtomicU32::new(0);

async fn connect(kind: BackendKind) -> Option<Database> {
    let var = match kind {
        BackendKind::MySql => "SITEDB_TEST_MYSQL_URL",
        BackendKind::Postgres => "SITEDB_TEST_POSTGRES_URL",
        BackendKind::Sqlite => return None,
    };
    let Ok(url) = std::env::var(var) else {
        eprintln!("{var} not set, skipping");
        return None;
    };

    let storage = Storage::new(StorageBuilder::new(kind).url(url).max_connections(4));
    Some(storage.init().await.expect("Failed to connect"))
}

/// Create a uniquely named scratch table with an identity column.
async fn scratch_table(db: &Database) -> String {
    let name = format!(
        "sitedb_test_{}_{}",
        std::process::id(),
        TABLE_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let (id, flag) = match db.kind() {
        BackendKind::MySql => ("INT AUTO_INCREMENT PRIMARY KEY", "BOOLEAN"),
        BackendKind::Postgres => ("SERIAL PRIMARY KEY", "BOOLEAN"),
        BackendKind::Sqlite => ("INTEGER PRIMARY KEY AUTOINCREMENT", "INTEGER"),
    };
    db.exec(&format!(
        "CREATE TABLE {name} (id {id}, a VARCHAR(64), b INTEGER, flag {flag} NOT NULL DEFAULT FALSE)"
    ))
    .await
    .expect("Failed to create scratch table");
    name
}

async fn drop_table(db: &Database, name: &str) {
    db.exec(&format!("DROP TABLE IF EXISTS {name}"))
        .await
        .expect("Failed to drop scratch table");
}

// =============================================================================
// Shared Scenarios
// =============================================================================

async fn inserted_row_round_trips(kind: BackendKind) {
    let Some(db) = connect(kind).await else {
        return;
    };
    let table = scratch_table(&db).await;

    let insert = format!("INSERT INTO {table} (a, b, flag) VALUES (?, ?, ?)");
    let first = db.prepare(&insert).run(params!["x", 5, true]).await.unwrap();
    let second = db.prepare(&insert).run(params!["y", 5, false]).await.unwrap();
    let (first_id, second_id) = (first.inserted_id.unwrap(), second.inserted_id.unwrap());
    assert!(second_id > first_id);

    let select = format!("SELECT id, a, b, flag FROM {table} WHERE id = ?");
    let row = db.prepare(&select).get(params![first_id]).await.unwrap().unwrap();
    assert_eq!(row.columns(), &["id", "a", "b", "flag"]);
    assert_eq!(row.get("id").and_then(Value::as_i64), Some(first_id));
    assert_eq!(row.get("a").and_then(Value::as_str), Some("x"));
    assert_eq!(row.get("flag").and_then(Value::as_bool), Some(true));

    // Booleans stay engine-native.
    match kind {
        BackendKind::Postgres => assert_eq!(row.get("flag"), Some(&Value::Boolean(true))),
        _ => assert_eq!(row.get("flag"), Some(&Value::Integer(1))),
    }

    // Same value bound twice; numbering must follow occurrence order.
    let both = format!("SELECT id FROM {table} WHERE b = ? AND b = ? ORDER BY id");
    let rows = db.prepare(&both).all(params![5, 5]).await.unwrap();
    assert_eq!(rows.len(), 2);

    let update = format!("UPDATE {table} SET a = ? WHERE id = ?");
    let updated = db.prepare(&update).run(params!["z", second_id]).await.unwrap();
    assert_eq!(updated.inserted_id, None);

    drop_table(&db, &table).await;
}

async fn missing_row_is_none(kind: BackendKind) {
    let Some(db) = connect(kind).await else {
        return;
    };
    let table = scratch_table(&db).await;

    let select = format!("SELECT * FROM {table} WHERE id = ?");
    assert!(db.prepare(&select).get(params![-1]).await.unwrap().is_none());

    let all = format!("SELECT * FROM {table}");
    assert!(db.prepare(&all).all(&[]).await.unwrap().is_empty());

    drop_table(&db, &table).await;
}

async fn schema_bootstrap_is_idempotent(kind: BackendKind) {
    let Some(db) = connect(kind).await else {
        return;
    };
    init_schema(&db).await.unwrap();
    init_schema(&db).await.unwrap();

    let rows = db.prepare("SELECT id FROM hero WHERE id = ?").all(params![-1]).await.unwrap();
    assert!(rows.is_empty());
}

/// NULLs and text timestamps go into typed columns of the content schema, and
/// a timestamp read back as text can be written again.
async fn typed_columns_accept_null_and_text(kind: BackendKind, published_at: &str) {
    let Some(db) = connect(kind).await else {
        return;
    };
    init_schema(&db).await.unwrap();

    let slug = format!(
        "typed-{}-{}",
        std::process::id(),
        TABLE_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let id = db
        .prepare("INSERT INTO blog_posts (title, slug, published_at) VALUES (?, ?, ?)")
        .run(params!["Draft", slug.as_str(), Value::Null])
        .await
        .unwrap()
        .inserted_id
        .unwrap();

    let publish = db.prepare("UPDATE blog_posts SET published = ?, published_at = ? WHERE id = ?");
    publish.run(params![true, published_at, id]).await.unwrap();

    let select = "SELECT published, published_at, created_at FROM blog_posts WHERE id = ?";
    let row = db.prepare(select).get(params![id]).await.unwrap().unwrap();
    assert_eq!(row.get("published").and_then(Value::as_bool), Some(true));
    let stored = row.get("published_at").and_then(Value::as_str).unwrap();
    assert!(stored.starts_with("2024-05-01"), "got {stored}");
    assert!(stored.contains("10:00:00"), "got {stored}");

    let created_at = row.get("created_at").cloned().unwrap();
    assert!(matches!(created_at, Value::Text(_)));
    db.prepare("UPDATE blog_posts SET updated_at = ? WHERE id = ?")
        .run(&[created_at.clone(), Value::Integer(id)])
        .await
        .unwrap();
    let updated = db
        .prepare("SELECT updated_at FROM blog_posts WHERE id = ?")
        .get(params![id])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.get("updated_at"), Some(&created_at));

    // Unpublish: integer flag and NULL timestamp.
    publish.run(params![0, Value::Null, id]).await.unwrap();
    let row = db.prepare(select).get(params![id]).await.unwrap().unwrap();
    assert_eq!(row.get("published").and_then(Value::as_bool), Some(false));
    assert_eq!(row.get("published_at"), Some(&Value::Null));

    db.prepare("DELETE FROM blog_posts WHERE id = ?")
        .run(params![id])
        .await
        .unwrap();
}

// =============================================================================
// MySQL
// =============================================================================

#[tokio::test]
async fn test_mysql_inserted_row_round_trips() {
    inserted_row_round_trips(BackendKind::MySql).await;
}

#[tokio::test]
async fn test_mysql_missing_row_is_none() {
    missing_row_is_none(BackendKind::MySql).await;
}

#[tokio::test]
async fn test_mysql_schema_bootstrap() {
    schema_bootstrap_is_idempotent(BackendKind::MySql).await;
}

#[tokio::test]
async fn test_mysql_typed_columns_accept_null_and_text() {
    typed_columns_accept_null_and_text(BackendKind::MySql, "2024-05-01 10:00:00").await;
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[tokio::test]
async fn test_postgres_inserted_row_round_trips() {
    inserted_row_round_trips(BackendKind::Postgres).await;
}

#[tokio::test]
async fn test_postgres_missing_row_is_none() {
    missing_row_is_none(BackendKind::Postgres).await;
}

#[tokio::test]
async fn test_postgres_schema_bootstrap() {
    schema_bootstrap_is_idempotent(BackendKind::Postgres).await;
}

#[tokio::test]
async fn test_postgres_typed_columns_accept_null_and_text() {
    typed_columns_accept_null_and_text(BackendKind::Postgres, "2024-05-01T10:00:00Z").await;
}

#[tokio::test]
async fn test_postgres_unconvertible_parameter_is_reported() {
    let Some(db) = connect(BackendKind::Postgres).await else {
        return;
    };
    init_schema(&db).await.unwrap();

    let err = db
        .prepare("SELECT id FROM blog_posts WHERE published_at > ?")
        .all(params!["not a timestamp"])
        .await
        .unwrap_err();
    assert!(
        matches!(err, StorageError::Parameter { index: 1, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_postgres_insert_returns_new_id() {
    let Some(db) = connect(BackendKind::Postgres).await else {
        return;
    };
    let table = scratch_table(&db).await;

    let result = db
        .prepare(&format!("INSERT INTO {table} (a,b) VALUES (?,?)"))
        .run(params!["a", 1])
        .await
        .unwrap();
    let id = result.inserted_id.expect("RETURNING id yields the key");

    let row = db
        .prepare(&format!("SELECT b FROM {table} WHERE id = ?"))
        .get(params![id])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("b"), Some(&Value::Integer(1)));

    drop_table(&db, &table).await;
}
