//! SQL Backend Module
//!
//! Execution handles used by a connection: the remote libSQL primary
//! and local SQLite files (replicas or plain local databases).

mod remote;
mod sqlite;

pub use remote::RemoteClient;
pub use sqlite::SqliteBackend;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::log::QueryLog;

/// A bound parameter or result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Result set of a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)
    }
}

/// Execution handle over one database
#[async_trait::async_trait]
pub trait SqlBackend: Send + Sync {
    /// Short label used in logs
    fn kind(&self) -> &'static str;

    /// Execute a statement, returning the affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query and collect its rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Rows>;

    /// Client-side query log, when the backend keeps one
    fn query_log(&self) -> Option<&QueryLog> {
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for connection tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    /// Backend that returns queued outcomes and records every call
    pub struct ScriptedBackend {
        kind: &'static str,
        outcomes: Mutex<VecDeque<std::result::Result<u64, String>>>,
        rows: Mutex<Rows>,
        calls: Mutex<Vec<String>>,
        log: Option<QueryLog>,
    }

    impl ScriptedBackend {
        pub fn new(kind: &'static str) -> Self {
            Self {
                kind,
                outcomes: Mutex::new(VecDeque::new()),
                rows: Mutex::new(Rows::default()),
                calls: Mutex::new(Vec::new()),
                log: Some(QueryLog::new()),
            }
        }

        /// Backend without a client query log
        pub fn without_log(kind: &'static str) -> Self {
            Self {
                log: None,
                ..Self::new(kind)
            }
        }

        pub fn push_affected(&self, rows: u64) {
            self.outcomes.lock().unwrap().push_back(Ok(rows));
        }

        pub fn push_error(&self, message: &str) {
            self.outcomes.lock().unwrap().push_back(Err(message.to_string()));
        }

        pub fn set_rows(&self, rows: Rows) {
            *self.rows.lock().unwrap() = rows;
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SqlBackend for ScriptedBackend {
        fn kind(&self) -> &'static str {
            self.kind
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
            self.calls.lock().unwrap().push(sql.to_string());
            let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(0));
            if let Some(log) = &self.log {
                log.record(sql, params, std::time::Duration::ZERO).await;
            }
            outcome.map_err(Error::QueryExecution)
        }

        async fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
            self.calls.lock().unwrap().push(sql.to_string());
            if let Some(log) = &self.log {
                log.record(sql, params, std::time::Duration::ZERO).await;
            }
            Ok(self.rows.lock().unwrap().clone())
        }

        fn query_log(&self) -> Option<&QueryLog> {
            self.log.as_ref()
        }
    }
}
