//! Query Log
//!
//! Ordered record of executed statements, kept only while enabled.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backend::Value;

/// One logged statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub query: String,
    pub bindings: Vec<Value>,
    /// Execution time in milliseconds
    pub time_ms: f64,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LogState {
    enabled: bool,
    entries: Vec<QueryLogEntry>,
}

/// Query log store
#[derive(Debug, Default)]
pub struct QueryLog {
    state: RwLock<LogState>,
}

impl QueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enable(&self) {
        self.state.write().await.enabled = true;
    }

    pub async fn disable(&self) {
        self.state.write().await.enabled = false;
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.read().await.enabled
    }

    /// Drop all recorded entries; the enabled flag is untouched
    pub async fn flush(&self) {
        self.state.write().await.entries.clear();
    }

    /// Entries in execution order
    pub async fn entries(&self) -> Vec<QueryLogEntry> {
        self.state.read().await.entries.clone()
    }

    /// Record a statement if logging is enabled
    pub async fn record(&self, query: &str, bindings: &[Value], elapsed: Duration) {
        let mut state = self.state.write().await;
        if !state.enabled {
            return;
        }
        state.entries.push(QueryLogEntry {
            query: query.to_string(),
            bindings: bindings.to_vec(),
            time_ms: elapsed.as_secs_f64() * 1000.0,
            logged_at: Utc::now(),
        });
    }
}
