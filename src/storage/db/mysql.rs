//! MySQL backend implementation using sqlx.
//!
//! Placeholders are already `?`; the insert id comes from the OK packet.
//! `TINYINT(1)` / `BOOLEAN` columns are returned as `Integer` 0/1.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row as _, TypeInfo};

use super::{Adapter, PROBE_SQL, unsupported};
use crate::storage::StorageError;
use crate::storage::dialect::Translation;
use crate::storage::types::{BackendKind, Row, RunResult, Value};

/// MySQL connection pool adapter.
#[derive(Clone)]
pub struct MySqlAdapter {
    pool: MySqlPool,
}

impl std::fmt::Debug for MySqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlAdapter").finish_non_exhaustive()
    }
}

impl MySqlAdapter {
    /// Connect a pool and probe it.
    ///
    /// # Errors
    /// Any failure to connect or to answer the probe is reported as
    /// [`StorageError::Connectivity`].
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(StorageError::Connectivity)?;

        sqlx::query(PROBE_SQL)
            .execute(&pool)
            .await
            .map_err(StorageError::Connectivity)?;

        tracing::info!(max_connections, "MySQL pool connected");
        Ok(Self { pool })
    }

    /// Get the underlying sqlx pool.
    #[inline]
    pub fn inner(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Adapter for MySqlAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::MySql
    }

    async fn run(&self, stmt: &Translation, params: &[Value]) -> Result<RunResult, StorageError> {
        let result = bind(sqlx::query(&stmt.sql), params)
            .execute(&self.pool)
            .await?;

        let inserted_id = match result.last_insert_id() {
            0 => None,
            id if stmt.is_insert => i64::try_from(id).ok(),
            _ => None,
        };
        Ok(RunResult::new(inserted_id))
    }

    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, StorageError> {
        bind(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(decode_row)
            .transpose()
    }

    async fn all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        bind(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(decode_row)
            .collect()
    }

    async fn exec(&self, sql: &str) -> Result<(), StorageError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }
}

fn bind<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(Option::<String>::None),
            Value::Integer(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Blob(v) => query.bind(v.as_slice()),
            Value::Boolean(v) => query.bind(*v),
        };
    }
    query
}

fn decode_row(row: &MySqlRow) -> Result<Row, StorageError> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_value(row, i)?);
    }
    Ok(Row::new(columns, values))
}

fn decode_value(row: &MySqlRow, i: usize) -> Result<Value, StorageError> {
    let column = &row.columns()[i];
    let type_name = column.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get::<Option<i64>, _>(i)?
            .map_or(Value::Null, Value::Integer),
        name if name.ends_with("UNSIGNED") => match row.try_get::<Option<u64>, _>(i)? {
            None => Value::Null,
            Some(v) => i64::try_from(v)
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::Text(v.to_string())),
        },
        "FLOAT" => row
            .try_get::<Option<f32>, _>(i)?
            .map_or(Value::Null, |v| Value::Real(f64::from(v))),
        "DOUBLE" => row
            .try_get::<Option<f64>, _>(i)?
            .map_or(Value::Null, Value::Real),
        "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            row.try_get::<Option<String>, _>(i)?
                .map_or(Value::Null, Value::Text)
        }
        // Sent as a decimal string in the binary protocol.
        "DECIMAL" => row
            .try_get_unchecked::<Option<String>, _>(i)?
            .map_or(Value::Null, Value::Text),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Option<Vec<u8>>, _>(i)?
            .map_or(Value::Null, Value::Blob),
        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "NULL" => Value::Null,
        other => return Err(unsupported(column.name(), other)),
    };
    Ok(value)
}
