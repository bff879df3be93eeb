//! Content schema bootstrap.
//!
//! Every content table is created with `CREATE TABLE IF NOT EXISTS`, rendered
//! for the active backend. Column types that differ between engines are
//! written as `{tokens}` in the templates below.

use crate::storage::StorageError;
use crate::storage::statement::Database;
use crate::storage::types::BackendKind;

/// Content tables, in creation order.
pub const TABLES: &[&str] = &[
    "hero",
    "about",
    "projects",
    "services",
    "blog_posts",
    "site_settings",
];

/// Landing-page hero block.
const HERO_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS hero (
    id          {id},
    title       {str} NOT NULL,
    subtitle    TEXT,
    cta_label   {str},
    cta_url     {str},
    image_url   {str},
    updated_at  {now}
)"#;

const ABOUT_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS about (
    id          {id},
    heading     {str} NOT NULL,
    body        TEXT,
    image_url   {str},
    updated_at  {now}
)"#;

const PROJECTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id          {id},
    title       {str} NOT NULL,
    slug        {str} NOT NULL UNIQUE,
    summary     TEXT,
    url         {str},
    image_url   {str},
    featured    {bool} NOT NULL DEFAULT {false},
    sort_order  INTEGER NOT NULL DEFAULT 0,
    created_at  {now}
)"#;

const SERVICES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS services (
    id          {id},
    name        {str} NOT NULL,
    description TEXT,
    icon        {str},
    sort_order  INTEGER NOT NULL DEFAULT 0,
    active      {bool} NOT NULL DEFAULT {true}
)"#;

/// Blog posts; `published_at` stays NULL for drafts.
const BLOG_POSTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS blog_posts (
    id           {id},
    title        {str} NOT NULL,
    slug         {str} NOT NULL UNIQUE,
    excerpt      TEXT,
    body         TEXT,
    published    {bool} NOT NULL DEFAULT {false},
    published_at {timestamp},
    created_at   {now},
    updated_at   {now}
)"#;

/// Free-form key/value settings (site title, contact email, ...).
const SITE_SETTINGS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS site_settings (
    id            {id},
    setting_key   {str} NOT NULL UNIQUE,
    setting_value TEXT,
    updated_at    {now}
)"#;

const TABLE_DDLS: [&str; 6] = [
    HERO_TABLE_DDL,
    ABOUT_TABLE_DDL,
    PROJECTS_TABLE_DDL,
    SERVICES_TABLE_DDL,
    BLOG_POSTS_TABLE_DDL,
    SITE_SETTINGS_TABLE_DDL,
];

/// Column types that differ between engines.
struct ColumnTypes {
    id: &'static str,
    string: &'static str,
    boolean: &'static str,
    false_literal: &'static str,
    true_literal: &'static str,
    timestamp: &'static str,
    now: &'static str,
}

impl ColumnTypes {
    fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::MySql => Self {
                id: "INT AUTO_INCREMENT PRIMARY KEY",
                string: "VARCHAR(255)",
                boolean: "BOOLEAN",
                false_literal: "FALSE",
                true_literal: "TRUE",
                timestamp: "TIMESTAMP NULL",
                now: "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
            },
            BackendKind::Postgres => Self {
                id: "SERIAL PRIMARY KEY",
                string: "VARCHAR(255)",
                boolean: "BOOLEAN",
                false_literal: "FALSE",
                true_literal: "TRUE",
                timestamp: "TIMESTAMPTZ",
                now: "TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP",
            },
            BackendKind::Sqlite => Self {
                id: "INTEGER PRIMARY KEY AUTOINCREMENT",
                string: "TEXT",
                boolean: "INTEGER",
                false_literal: "0",
                true_literal: "1",
                timestamp: "TEXT",
                now: "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
            },
        }
    }
}

/// Render one DDL template for `kind`.
fn render(template: &str, kind: BackendKind) -> String {
    let types = ColumnTypes::for_kind(kind);
    template
        .replace("{id}", types.id)
        .replace("{str}", types.string)
        .replace("{bool}", types.boolean)
        .replace("{false}", types.false_literal)
        .replace("{true}", types.true_literal)
        .replace("{timestamp}", types.timestamp)
        .replace("{now}", types.now)
}

/// DDL for every content table, rendered for `kind`.
pub fn table_ddl(kind: BackendKind) -> Vec<String> {
    TABLE_DDLS.iter().map(|ddl| render(ddl, kind)).collect()
}

/// Initialize the content schema.
///
/// Creates all content tables if they don't exist. Existing tables are left
/// untouched; there are no migrations.
pub async fn init_schema(db: &Database) -> Result<(), StorageError> {
    for (table, ddl) in TABLES.iter().zip(table_ddl(db.kind())) {
        db.exec(&ddl).await?;
        tracing::debug!(table, "Table ensured");
    }
    tracing::info!(backend = %db.kind(), tables = TABLES.len(), "Schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBuilder;

    #[test]
    fn test_rendered_ddl_has_no_tokens() {
        for kind in [BackendKind::MySql, BackendKind::Postgres, BackendKind::Sqlite] {
            for ddl in table_ddl(kind) {
                assert!(!ddl.contains('{'), "unrendered token for {kind}: {ddl}");
            }
        }
    }

    #[test]
    fn test_identity_column_per_backend() {
        let mysql = table_ddl(BackendKind::MySql);
        let pg = table_ddl(BackendKind::Postgres);
        let sqlite = table_ddl(BackendKind::Sqlite);
        assert!(mysql[0].contains("AUTO_INCREMENT"));
        assert!(pg[0].contains("SERIAL PRIMARY KEY"));
        assert!(sqlite[0].contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sqlite[2].contains("featured    INTEGER NOT NULL DEFAULT 0"));
    }

    #[test]
    fn test_tables_match_ddl() {
        let ddl = table_ddl(BackendKind::Sqlite);
        assert_eq!(ddl.len(), TABLES.len());
        for (table, ddl) in TABLES.iter().zip(&ddl) {
            assert!(ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")));
        }
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let db = StorageBuilder::new(BackendKind::Sqlite)
            .path(":memory:")
            .build()
            .await
            .unwrap();

        init_schema(&db).await.unwrap();
        init_schema(&db).await.unwrap();

        let rows = db
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name != 'sqlite_sequence' ORDER BY name")
            .all(&[])
            .await
            .unwrap();
        let mut names: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
            .collect();
        let mut expected = TABLES.to_vec();
        names.sort_unstable();
        expected.sort_unstable();
        assert_eq!(names, expected);
    }
}
