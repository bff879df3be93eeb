//! PostgreSQL backend implementation using sqlx.
//!
//! Queries arrive with `$n` placeholders. Inserts carry a `RETURNING` clause
//! and the key is read from the returned row.
//!
//! Parameters are bound with the types the server infers for their
//! placeholders, so a `NULL` or a timestamp read back as text can be written to
//! any column it fits, as on the other engines.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgConnection, PgPool, PgPoolOptions, PgRow, PgTypeInfo,
};
use sqlx::query::Query;
use sqlx::{
    Column, Either, Encode, Executor, Postgres, Row as _, Statement as _, Type, TypeInfo,
};

use super::{Adapter, PROBE_SQL, unsupported};
use crate::storage::StorageError;
use crate::storage::dialect::{IDENTITY_COLUMN, Translation};
use crate::storage::types::{BackendKind, Row, RunResult, Value};

/// PostgreSQL connection pool adapter.
#[derive(Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresAdapter").finish_non_exhaustive()
    }
}

impl PostgresAdapter {
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
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(StorageError::Connectivity)?;

        sqlx::query(PROBE_SQL)
            .execute(&pool)
            .await
            .map_err(StorageError::Connectivity)?;

        tracing::info!(max_connections, "PostgreSQL pool connected");
        Ok(Self { pool })
    }

    /// Get the underlying sqlx pool.
    #[inline]
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn run(&self, stmt: &Translation, params: &[Value]) -> Result<RunResult, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let params = typed_params(&mut conn, &stmt.sql, params).await?;
        let query = bind(sqlx::query(&stmt.sql), params);
        if !stmt.returning {
            query.execute(&mut *conn).await?;
            return Ok(RunResult::default());
        }

        let Some(row) = query.fetch_optional(&mut *conn).await? else {
            // ON CONFLICT DO NOTHING and friends return no row.
            return Ok(RunResult::default());
        };
        let inserted_id = if stmt.is_insert {
            returned_id(&row)?
        } else {
            None
        };
        Ok(RunResult::new(inserted_id))
    }

    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let params = typed_params(&mut conn, sql, params).await?;
        bind(sqlx::query(sql), params)
            .fetch_optional(&mut *conn)
            .await?
            .as_ref()
            .map(decode_row)
            .transpose()
    }

    async fn all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let params = typed_params(&mut conn, sql, params).await?;
        bind(sqlx::query(sql), params)
            .fetch_all(&mut *conn)
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

/// Key of the inserted row: the `id` column, else the first column.
fn returned_id(row: &PgRow) -> Result<Option<i64>, StorageError> {
    let index = row
        .columns()
        .iter()
        .position(|c| c.name() == IDENTITY_COLUMN)
        .unwrap_or(0);
    let Some(column) = row.columns().get(index) else {
        return Ok(None);
    };

    let id = match column.type_info().name() {
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(i64::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(i64::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?,
        _ => None,
    };
    Ok(id)
}

// =============================================================================
// Parameter Binding
// =============================================================================

/// Convert `params` to the types the server inferred for `sql`.
///
/// Preparing goes through the connection's statement cache, so only the first
/// use of a query on a connection costs a round trip.
async fn typed_params(
    conn: &mut PgConnection,
    sql: &str,
    params: &[Value],
) -> Result<Vec<PgParam>, StorageError> {
    let statement = (&mut *conn).prepare(sql).await?;
    let targets: &[PgTypeInfo] = match statement.parameters() {
        Some(Either::Left(types)) => types,
        _ => &[],
    };

    params
        .iter()
        .enumerate()
        .map(|(i, value)| match targets.get(i) {
            Some(target) => PgParam::coerce(i + 1, value, target),
            // Count mismatches are left for the server to report.
            None => Ok(PgParam::from_value(value)),
        })
        .collect()
}

fn bind(
    mut query: Query<'_, Postgres, PgArguments>,
    params: Vec<PgParam>,
) -> Query<'_, Postgres, PgArguments> {
    for param in params {
        query = query.bind(param);
    }
    query
}

/// A parameter in the representation of its placeholder's type.
///
/// Values travel in binary format, where the server applies no casts: the
/// bytes must already be those of the target type.
#[derive(Debug, Clone, PartialEq)]
enum PgParam {
    Null(PgTypeInfo),
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Timestamptz(DateTime<Utc>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
}

impl PgParam {
    /// Natural type of `value`, for placeholders the server did not describe.
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null(<i64 as Type<Postgres>>::type_info()),
            Value::Integer(v) => Self::Int8(*v),
            Value::Real(v) => Self::Float8(*v),
            Value::Text(v) => Self::Text(v.clone()),
            Value::Blob(v) => Self::Bytea(v.clone()),
            Value::Boolean(v) => Self::Bool(*v),
        }
    }

    /// Convert `value` for the 1-based placeholder `index` of type `target`.
    fn coerce(index: usize, value: &Value, target: &PgTypeInfo) -> Result<Self, StorageError> {
        let type_name = target.name();
        let param = match type_name {
            _ if value.is_null() => Some(Self::Null(target.clone())),
            "BOOL" => as_bool(value).map(Self::Bool),
            "INT2" => as_integer(value)
                .and_then(|v| i16::try_from(v).ok())
                .map(Self::Int2),
            "INT4" => as_integer(value)
                .and_then(|v| i32::try_from(v).ok())
                .map(Self::Int4),
            "INT8" => as_integer(value).map(Self::Int8),
            "FLOAT4" => as_real(value).map(|v| Self::Float4(v as f32)),
            "FLOAT8" => as_real(value).map(Self::Float8),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "UNKNOWN" => {
                as_text(value).map(Self::Text)
            }
            "BYTEA" => match value {
                Value::Blob(v) => Some(Self::Bytea(v.clone())),
                Value::Text(v) => Some(Self::Bytea(v.as_bytes().to_vec())),
                _ => None,
            },
            "TIMESTAMPTZ" => value.as_str().and_then(parse_timestamptz).map(Self::Timestamptz),
            "TIMESTAMP" => value.as_str().and_then(parse_timestamp).map(Self::Timestamp),
            "DATE" => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
                .map(Self::Date),
            "TIME" => value
                .as_str()
                .and_then(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok())
                .map(Self::Time),
            "JSON" | "JSONB" => as_json(value).map(Self::Json),
            _ => None,
        };

        param.ok_or_else(|| StorageError::Parameter {
            index,
            type_name: type_name.to_string(),
            value_kind: value_kind(value),
        })
    }
}

impl Type<Postgres> for PgParam {
    fn type_info() -> PgTypeInfo {
        // Every value reports its own type through `produces`.
        <String as Type<Postgres>>::type_info()
    }
}

impl<'q> Encode<'q, Postgres> for PgParam {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        match self {
            Self::Null(_) => Ok(IsNull::Yes),
            Self::Bool(v) => <bool as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Int2(v) => <i16 as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Int4(v) => <i32 as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Int8(v) => <i64 as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Float4(v) => <f32 as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Float8(v) => <f64 as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Text(v) => <String as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Bytea(v) => <Vec<u8> as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Timestamptz(v) => {
                <DateTime<Utc> as Encode<'q, Postgres>>::encode_by_ref(v, buf)
            }
            Self::Timestamp(v) => <NaiveDateTime as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Date(v) => <NaiveDate as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Time(v) => <NaiveTime as Encode<'q, Postgres>>::encode_by_ref(v, buf),
            Self::Json(v) => <serde_json::Value as Encode<'q, Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        let type_info = match self {
            Self::Null(type_info) => type_info.clone(),
            Self::Bool(_) => <bool as Type<Postgres>>::type_info(),
            Self::Int2(_) => <i16 as Type<Postgres>>::type_info(),
            Self::Int4(_) => <i32 as Type<Postgres>>::type_info(),
            Self::Int8(_) => <i64 as Type<Postgres>>::type_info(),
            Self::Float4(_) => <f32 as Type<Postgres>>::type_info(),
            Self::Float8(_) => <f64 as Type<Postgres>>::type_info(),
            Self::Text(_) => <String as Type<Postgres>>::type_info(),
            Self::Bytea(_) => <Vec<u8> as Type<Postgres>>::type_info(),
            Self::Timestamptz(_) => <DateTime<Utc> as Type<Postgres>>::type_info(),
            Self::Timestamp(_) => <NaiveDateTime as Type<Postgres>>::type_info(),
            Self::Date(_) => <NaiveDate as Type<Postgres>>::type_info(),
            Self::Time(_) => <NaiveTime as Type<Postgres>>::type_info(),
            Self::Json(_) => <serde_json::Value as Type<Postgres>>::type_info(),
        };
        Some(type_info)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
        Value::Boolean(_) => "boolean",
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" => Some(true),
            "f" | "false" | "0" => Some(false),
            _ => None,
        },
        other => other.as_bool(),
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(*v),
        Value::Boolean(v) => Some(i64::from(*v)),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_real(value: &Value) -> Option<f64> {
    match value {
        Value::Real(v) => Some(*v),
        Value::Integer(v) => Some(*v as f64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Blob(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn as_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Text(s) => serde_json::from_str(s).ok(),
        Value::Blob(_) => None,
        other => serde_json::to_value(other).ok(),
    }
}

/// Accepts RFC 3339, the server's own text form and zone-less timestamps (UTC).
fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|v| v.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_timestamp(s).map(|v| v.and_utc()))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|v| v.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// =============================================================================
// Row Decoding
// =============================================================================

fn decode_row(row: &PgRow) -> Result<Row, StorageError> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_value(row, i)?);
    }
    Ok(Row::new(columns, values))
}

fn decode_value(row: &PgRow, i: usize) -> Result<Value, StorageError> {
    let column = &row.columns()[i];
    let type_name = column.type_info().name();

    let value = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(i)?
            .map_or(Value::Null, Value::Boolean),
        "INT2" => row
            .try_get::<Option<i16>, _>(i)?
            .map_or(Value::Null, |v| Value::Integer(i64::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(i)?
            .map_or(Value::Null, |v| Value::Integer(i64::from(v))),
        "INT8" => row
            .try_get::<Option<i64>, _>(i)?
            .map_or(Value::Null, Value::Integer),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)?
            .map_or(Value::Null, |v| Value::Real(f64::from(v))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(i)?
            .map_or(Value::Null, Value::Real),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => row
            .try_get::<Option<String>, _>(i)?
            .map_or(Value::Null, Value::Text),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(i)?
            .map_or(Value::Null, Value::Blob),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(i)?
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        "VOID" => Value::Null,
        other => return Err(unsupported(column.name(), other)),
    };
    Ok(value)
}
