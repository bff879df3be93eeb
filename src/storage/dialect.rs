//! Placeholder translation between the canonical query form and each engine.
//!
//! Callers write every query once, with `?` standing for each bound value in
//! left-to-right order. MySQL and SQLite accept that form as is. PostgreSQL
//! wants ordinal `$1, $2, ...` placeholders and only hands back the key of an
//! inserted row through a `RETURNING` clause.
//!
//! Translation is a single left-to-right scan. The `n`-th placeholder
//! occurrence becomes `$n`; values are never searched for, so repeated
//! parameter values cannot confuse the numbering. Question marks inside string
//! literals, quoted identifiers and comments are left alone. Comments are
//! `-- ...`, `/* ... */` and, on MySQL, `# ...`. Backslash escapes apply to
//! MySQL strings and to PostgreSQL `E'...'` strings. PostgreSQL dollar-quoted
//! bodies are not recognized.

use crate::storage::StorageError;
use crate::storage::types::BackendKind;

/// Placeholder token used by canonical queries.
pub const PLACEHOLDER: char = '?';

/// Identity column assumed by the `RETURNING` clause.
pub const IDENTITY_COLUMN: &str = "id";

/// How an engine reports the key of a freshly inserted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// The driver exposes the last insert id after execution.
    EngineReportsId,
    /// The statement must return the key itself.
    RequiresReturningClause,
}

impl IdentityStrategy {
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::MySql | BackendKind::Sqlite => Self::EngineReportsId,
            BackendKind::Postgres => Self::RequiresReturningClause,
        }
    }
}

/// A canonical query rewritten for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Engine-native SQL.
    pub sql: String,
    /// Byte offset of each placeholder in the canonical query, in order.
    pub placeholders: Vec<usize>,
    /// How the engine reports inserted keys.
    pub identity: IdentityStrategy,
    /// Statement inserts rows (`INSERT`, or MySQL/SQLite `REPLACE`).
    pub is_insert: bool,
    /// Native SQL ends in a `RETURNING` clause.
    pub returning: bool,
}

impl Translation {
    /// Number of placeholders found.
    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Quoted { quote: char, backslash: bool },
    LineComment,
    BlockComment,
}

/// Translate a canonical query for `kind`.
///
/// `want_identity` asks for the inserted key to be retrievable; on PostgreSQL
/// an `INSERT` then gets `RETURNING id` appended unless it already returns
/// something.
///
/// # Errors
/// Returns [`StorageError::Translation`] if a quoted string, quoted
/// identifier or block comment is never closed.
pub fn translate(
    canonical: &str,
    kind: BackendKind,
    want_identity: bool,
) -> Result<Translation, StorageError> {
    let ordinal = kind == BackendKind::Postgres;
    let mysql = kind == BackendKind::MySql;

    let mut sql = String::with_capacity(canonical.len() + 16);
    let mut placeholders = Vec::new();
    let mut has_returning = false;
    let mut word = String::new();
    let mut state = State::Normal;
    let mut chars = canonical.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match state {
            State::Normal => {
                // `E'...'` opens an escape string; the prefix is a word of its own.
                let escape_prefix = ordinal && word.eq_ignore_ascii_case("e");
                if c.is_ascii_alphanumeric() || c == '_' {
                    word.push(c);
                } else {
                    has_returning |= word.eq_ignore_ascii_case("returning");
                    word.clear();
                }

                match c {
                    PLACEHOLDER => {
                        placeholders.push(pos);
                        if ordinal {
                            sql.push('$');
                            sql.push_str(&placeholders.len().to_string());
                            continue;
                        }
                    }
                    '\'' | '"' | '`' => {
                        state = State::Quoted {
                            quote: c,
                            backslash: mysql || (escape_prefix && c == '\''),
                        };
                    }
                    '-' if chars.peek().is_some_and(|&(_, n)| n == '-') => {
                        state = State::LineComment;
                    }
                    '#' if mysql => state = State::LineComment,
                    '/' if chars.peek().is_some_and(|&(_, n)| n == '*') => {
                        sql.push(c);
                        if let Some((_, star)) = chars.next() {
                            sql.push(star);
                        }
                        state = State::BlockComment;
                        continue;
                    }
                    _ => {}
                }
                sql.push(c);
            }
            State::Quoted { quote, backslash } => {
                sql.push(c);
                if backslash && c == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        sql.push(escaped);
                    }
                } else if c == quote {
                    if chars.peek().is_some_and(|&(_, n)| n == quote) {
                        // Doubled quote stands for the quote itself.
                        if let Some((_, doubled)) = chars.next() {
                            sql.push(doubled);
                        }
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                sql.push(c);
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                sql.push(c);
                if c == '*' && chars.peek().is_some_and(|&(_, n)| n == '/') {
                    if let Some((_, slash)) = chars.next() {
                        sql.push(slash);
                    }
                    state = State::Normal;
                }
            }
        }
    }
    has_returning |= state == State::Normal && word.eq_ignore_ascii_case("returning");

    match state {
        State::Quoted { quote, .. } => {
            return Err(StorageError::Translation(format!(
                "unterminated {quote} quote in query"
            )));
        }
        State::BlockComment => {
            return Err(StorageError::Translation(
                "unterminated block comment in query".to_string(),
            ));
        }
        State::Normal | State::LineComment => {}
    }

    let keyword = leading_keyword(canonical, mysql);
    let is_insert = keyword.eq_ignore_ascii_case("insert")
        || (kind != BackendKind::Postgres && keyword.eq_ignore_ascii_case("replace"));
    let identity = IdentityStrategy::for_kind(kind);

    let mut returning = has_returning;
    if want_identity
        && is_insert
        && !has_returning
        && identity == IdentityStrategy::RequiresReturningClause
    {
        let trimmed = sql.trim_end().trim_end_matches(';').trim_end().len();
        sql.truncate(trimmed);
        // A trailing line comment would swallow the clause.
        sql.push(if state == State::LineComment { '\n' } else { ' ' });
        sql.push_str("RETURNING ");
        sql.push_str(IDENTITY_COLUMN);
        returning = true;
    }

    Ok(Translation {
        sql,
        placeholders,
        identity,
        is_insert,
        returning,
    })
}

/// First keyword of a statement, skipping whitespace, comments and `(`.
fn leading_keyword(sql: &str, hash_comments: bool) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        let line_comment = rest
            .strip_prefix("--")
            .or_else(|| rest.strip_prefix('#').filter(|_| hash_comments));
        if let Some(after) = line_comment {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(sql: &str) -> String {
        translate(sql, BackendKind::Postgres, false).unwrap().sql
    }

    #[test]
    fn test_mysql_and_sqlite_pass_through() {
        let sql = "SELECT * FROM projects WHERE id = ? AND slug = ?";
        for kind in [BackendKind::MySql, BackendKind::Sqlite] {
            let t = translate(sql, kind, true).unwrap();
            assert_eq!(t.sql, sql);
            assert_eq!(t.placeholder_count(), 2);
            assert_eq!(t.identity, IdentityStrategy::EngineReportsId);
            assert!(!t.returning);
        }
    }

    #[test]
    fn test_postgres_ordinals_follow_occurrence_order() {
        // Both placeholders may be bound to the same value; numbering must not care.
        let t = translate(
            "UPDATE services SET sort_order = ? WHERE sort_order = ?",
            BackendKind::Postgres,
            true,
        )
        .unwrap();
        assert_eq!(
            t.sql,
            "UPDATE services SET sort_order = $1 WHERE sort_order = $2"
        );
        assert_eq!(t.placeholders, vec![33, 54]);
        assert!(!t.is_insert);
        assert!(!t.returning);
    }

    #[test]
    fn test_postgres_ordinals_strictly_increase() {
        let canonical = format!(
            "SELECT * FROM t WHERE a IN ({})",
            vec!["?"; 12].join(", ")
        );
        let sql = pg(&canonical);
        let mut last = 0;
        for n in 1..=12 {
            let at = sql.find(&format!("${n}")).expect("ordinal present");
            assert!(at >= last);
            last = at;
        }
        assert!(!sql.contains("$13"));
        assert!(!sql.contains('?'));
    }

    #[test]
    fn test_postgres_insert_gets_returning_clause() {
        let t = translate(
            "INSERT INTO t (a,b) VALUES (?,?)",
            BackendKind::Postgres,
            true,
        )
        .unwrap();
        assert_eq!(t.sql, "INSERT INTO t (a,b) VALUES ($1,$2) RETURNING id");
        assert_eq!(t.identity, IdentityStrategy::RequiresReturningClause);
        assert!(t.is_insert);
        assert!(t.returning);
    }

    #[test]
    fn test_returning_strips_trailing_semicolon() {
        let t = translate(
            "insert into blog_posts (title) values (?);  \n",
            BackendKind::Postgres,
            true,
        )
        .unwrap();
        assert_eq!(
            t.sql,
            "insert into blog_posts (title) values ($1) RETURNING id"
        );
    }

    #[test]
    fn test_returning_not_duplicated() {
        let t = translate(
            "INSERT INTO hero (title) VALUES (?) RETURNING id, title",
            BackendKind::Postgres,
            true,
        )
        .unwrap();
        assert_eq!(
            t.sql,
            "INSERT INTO hero (title) VALUES ($1) RETURNING id, title"
        );
        assert!(t.returning);
    }

    #[test]
    fn test_returning_only_when_identity_wanted() {
        let t = translate("INSERT INTO t (a) VALUES (?)", BackendKind::Postgres, false).unwrap();
        assert_eq!(t.sql, "INSERT INTO t (a) VALUES ($1)");
        assert!(!t.returning);
    }

    #[test]
    fn test_no_placeholders_unchanged() {
        let sql = "CREATE TABLE IF NOT EXISTS hero (id SERIAL PRIMARY KEY)";
        let t = translate(sql, BackendKind::Postgres, false).unwrap();
        assert_eq!(t.sql, sql);
        assert_eq!(t.placeholder_count(), 0);
    }

    #[test]
    fn test_quoted_question_marks_ignored() {
        assert_eq!(
            pg("SELECT '?' AS q, \"odd?col\" FROM t WHERE a = ? AND b = 'it''s ?'"),
            "SELECT '?' AS q, \"odd?col\" FROM t WHERE a = $1 AND b = 'it''s ?'"
        );
    }

    #[test]
    fn test_comments_ignored() {
        assert_eq!(
            pg("SELECT a -- why?\nFROM t /* really? */ WHERE b = ?"),
            "SELECT a -- why?\nFROM t /* really? */ WHERE b = $1"
        );
    }

    #[test]
    fn test_mysql_backslash_escape() {
        let t = translate(
            r"SELECT * FROM t WHERE a = 'don\'t?' AND b = ?",
            BackendKind::MySql,
            false,
        )
        .unwrap();
        assert_eq!(t.placeholder_count(), 1);
    }

    #[test]
    fn test_mysql_hash_comment() {
        let t = translate("SELECT a # why?\nFROM t WHERE b = ?", BackendKind::MySql, false)
            .unwrap();
        assert_eq!(t.placeholders, vec![33]);

        // Elsewhere `#` is an ordinary character.
        let t = translate("SELECT a #? FROM t", BackendKind::Sqlite, false).unwrap();
        assert_eq!(t.placeholder_count(), 1);
    }

    #[test]
    fn test_postgres_escape_string() {
        assert_eq!(
            pg(r"SELECT E'it\'s ?', e'\\' FROM t WHERE a = ? AND b = E'x''?'"),
            r"SELECT E'it\'s ?', e'\\' FROM t WHERE a = $1 AND b = E'x''?'"
        );
        // Standard strings keep backslashes literal.
        assert_eq!(pg(r"SELECT 'a\' , ?"), r"SELECT 'a\' , $1");
        // An identifier ending in `e` is not a prefix.
        assert_eq!(pg(r"SELECT name'\' , ?"), r"SELECT name'\' , $1");
    }

    #[test]
    fn test_unterminated_literal_is_error() {
        let err = translate("SELECT * FROM t WHERE a = 'oops", BackendKind::Postgres, false)
            .unwrap_err();
        assert!(matches!(err, StorageError::Translation(_)));

        let err = translate("SELECT 1 /* open", BackendKind::Sqlite, false).unwrap_err();
        assert!(matches!(err, StorageError::Translation(_)));
    }

    #[test]
    fn test_replace_counts_as_insert_outside_postgres() {
        let t = translate("REPLACE INTO site_settings (k, v) VALUES (?, ?)", BackendKind::MySql, true)
            .unwrap();
        assert!(t.is_insert);
    }

    #[test]
    fn test_leading_keyword_skips_comments() {
        assert_eq!(leading_keyword("  -- note\n /* x */ insert into t", false), "insert");
        assert_eq!(leading_keyword("(SELECT 1)", false), "SELECT");
        assert_eq!(leading_keyword("", false), "");
        assert_eq!(leading_keyword("# note\nREPLACE INTO t", true), "REPLACE");
        assert_eq!(leading_keyword("# note\nREPLACE INTO t", false), "");
    }
}
