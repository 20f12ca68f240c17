//! SQLite Backend
//!
//! Local file handle used for embedded replicas (read-only) and for
//! plain `sqlite` connections (read-write).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Arguments, Column, Row, TypeInfo, ValueRef};

use super::{Rows, SqlBackend, Value};
use crate::error::{Error, Result};
use crate::log::QueryLog;

/// SQLite file backend
pub struct SqliteBackend {
    pool: SqlitePool,
    path: PathBuf,
    read_only: bool,
    log: QueryLog,
}

impl SqliteBackend {
    /// Open a replica file read-only. The file must already exist.
    pub async fn open_read_only(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::ReplicaUnavailable(path.to_path_buf()));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                tracing::debug!("Failed to open replica {:?}: {}", path, e);
                Error::ReplicaUnavailable(path.to_path_buf())
            })?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            read_only: true,
            log: QueryLog::new(),
        })
    }

    /// Open (or create) a read-write database file
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            read_only: false,
            log: QueryLog::new(),
        })
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single connection keeps every statement on the same memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: PathBuf::from(":memory:"),
            read_only: false,
            log: QueryLog::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_params<'q>(params: &[Value]) -> SqliteArguments<'q> {
    let mut args = SqliteArguments::default();
    for param in params {
        match param {
            Value::Null => args.add(None::<i64>),
            Value::Integer(v) => args.add(*v),
            Value::Real(v) => args.add(*v),
            Value::Text(v) => args.add(v.clone()),
            Value::Blob(v) => args.add(v.clone()),
        }
    }
    args
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get(idx)?),
            "REAL" => Value::Real(row.try_get(idx)?),
            "BLOB" => Value::Blob(row.try_get(idx)?),
            _ => Value::Text(row.try_get(idx)?),
        };
        values.push(value);
    }
    Ok(values)
}

#[async_trait::async_trait]
impl SqlBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        if self.read_only {
            "replica"
        } else {
            "sqlite"
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let start = Instant::now();
        let result = sqlx::query_with(sql, bind_params(params))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::QueryExecution(format!(
                    "Failed to execute '{}...': {}",
                    &sql[..floor_boundary(sql, 50)],
                    e
                ))
            })?;
        self.log.record(sql, params, start.elapsed()).await;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        let start = Instant::now();
        let fetched = sqlx::query_with(sql, bind_params(params))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::QueryExecution(format!(
                    "Failed to query '{}...': {}",
                    &sql[..floor_boundary(sql, 50)],
                    e
                ))
            })?;
        self.log.record(sql, params, start.elapsed()).await;

        let columns = fetched
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(fetched.len());
        for row in &fetched {
            rows.push(decode_row(row)?);
        }

        Ok(Rows { columns, rows })
    }

    fn query_log(&self) -> Option<&QueryLog> {
        Some(&self.log)
    }
}

/// Largest char boundary not past `max`, for truncating SQL in messages
pub(crate) fn floor_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
