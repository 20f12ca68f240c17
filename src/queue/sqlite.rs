//! Durable Task Queue
//!
//! SQLite-backed queue shared between the application and out-of-process
//! sync workers. Tasks are stored as JSON payloads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{BackgroundSyncTask, QueuedTask, TaskQueue, TaskSource};
use crate::error::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_tasks (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    payload     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    attempts    INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT,
    leased_at   INTEGER,
    created_at  TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at  TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_sync_tasks_status
    ON sync_tasks(status, id);
"#;

/// Task counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub failed: u64,
}

const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Durable queue backed by SQLite
pub struct SqliteQueue {
    conn: Mutex<Connection>,
    path: PathBuf,
    max_attempts: u32,
    lease_timeout: Duration,
}

impl SqliteQueue {
    /// Create or open the queue database. Opening never touches leased
    /// tasks; a lease is only reclaimed once it outlives the lease timeout.
    pub fn open(path: impl AsRef<Path>, max_attempts: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            max_attempts,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        })
    }

    /// Set how long a leased task may stay `running` before another
    /// worker may take it over
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count tasks by status
    pub async fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut stats = QueueStats::default();
        for result in rows {
            let (status, count) = result?;
            match status.as_str() {
                "pending" => stats.pending = count,
                "running" => stats.running = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }

        Ok(stats)
    }

    /// Last recorded error of a task
    pub async fn last_error(&self, id: u64) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let error = conn
            .query_row(
                "SELECT last_error FROM sync_tasks WHERE id = ?1",
                params![id as i64],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(error.flatten())
    }
}

#[async_trait::async_trait]
impl TaskQueue for SqliteQueue {
    async fn enqueue(&self, task: BackgroundSyncTask) -> Result<()> {
        let payload = serde_json::to_string(&task)?;
        let conn = self.conn.lock().await;
        conn.execute("INSERT INTO sync_tasks (payload) VALUES (?1)", params![payload])?;
        tracing::debug!(
            "Queued background sync {} for '{}'",
            conn.last_insert_rowid(),
            task.connection
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskSource for SqliteQueue {
    async fn next(&self) -> Result<Option<QueuedTask>> {
        let now = Utc::now().timestamp_millis();
        let timeout_ms = i64::try_from(self.lease_timeout.as_millis()).unwrap_or(i64::MAX);
        let conn = self.conn.lock().await;

        // Leases held past the timeout belong to workers that died
        let expired = conn.execute(
            r#"
            UPDATE sync_tasks
            SET status = CASE WHEN attempts + 1 >= ?1 THEN 'failed' ELSE 'pending' END,
                attempts = attempts + 1,
                last_error = 'lease expired',
                leased_at = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE status = 'running' AND leased_at <= ?2
            "#,
            params![self.max_attempts as i64, now.saturating_sub(timeout_ms)],
        )?;
        if expired > 0 {
            tracing::warn!("Reclaimed {} expired sync task leases", expired);
        }

        loop {
            let row = conn
                .query_row(
                    "SELECT id, payload, attempts FROM sync_tasks WHERE status = 'pending' ORDER BY id LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, payload, attempts)) = row else {
                return Ok(None);
            };

            // Another process may have leased the row since the SELECT
            let leased = conn.execute(
                r#"
                UPDATE sync_tasks
                SET status = 'running', leased_at = ?2, updated_at = CURRENT_TIMESTAMP
                WHERE id = ?1 AND status = 'pending'
                "#,
                params![id, now],
            )?;
            if leased != 1 {
                continue;
            }

            let task: BackgroundSyncTask = serde_json::from_str(&payload)?;
            return Ok(Some(QueuedTask {
                id: id as u64,
                task,
                attempts: attempts as u32,
            }));
        }
    }

    async fn ack(&self, id: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM sync_tasks WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    async fn release(&self, task: QueuedTask, error: &str) -> Result<()> {
        let attempts = task.attempts + 1;
        let status = if attempts >= self.max_attempts {
            tracing::error!(
                "Background sync {} for '{}' failed after {} attempts: {}",
                task.id,
                task.task.connection,
                attempts,
                error
            );
            "failed"
        } else {
            tracing::warn!(
                "Requeueing background sync {} for '{}' (attempt {}): {}",
                task.id,
                task.task.connection,
                attempts,
                error
            );
            "pending"
        };

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            UPDATE sync_tasks
            SET status = ?1, attempts = ?2, last_error = ?3, leased_at = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?4
            "#,
            params![status, attempts as i64, error, task.id as i64],
        )?;
        Ok(())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Queue(format!("SQLite error: {}", e))
    }
}
