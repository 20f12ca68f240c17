//! Replicated Connection
//!
//! Wraps a primary handle and an optional local replica, tracks whether the
//! primary has accepted writes since the replica was last synced, and exposes
//! foreground and background sync.
//!
//! A `Connection` is owned by one caller at a time; every mutating operation
//! takes `&mut self`.

mod router;
mod state;

pub use router::open_read_handle;
pub use state::WriteState;

use std::sync::Arc;
use std::time::Instant;

use router::Router;

use crate::backend::{Rows, SqlBackend, Value};
use crate::classifier;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::log::{QueryLog, QueryLogEntry};
use crate::sync::{SyncCoordinator, SyncOutput};

/// Connection to one logical database
pub struct Connection {
    name: String,
    config: ConnectionConfig,
    router: Router,
    state: WriteState,
    /// Connection-level log, kept in lockstep with the client's
    query_log: QueryLog,
    coordinator: Arc<SyncCoordinator>,
}

impl Connection {
    /// Create a connection whose replica handle is opened on the first read
    pub fn new(
        name: impl Into<String>,
        config: ConnectionConfig,
        primary: Arc<dyn SqlBackend>,
        coordinator: Arc<SyncCoordinator>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            router: Router::new(primary),
            state: WriteState::Clean,
            query_log: QueryLog::new(),
            coordinator,
        }
    }

    /// Create a connection with an explicit read handle (`None` = primary)
    pub fn with_read_handle(
        name: impl Into<String>,
        config: ConnectionConfig,
        primary: Arc<dyn SqlBackend>,
        read: Option<Arc<dyn SqlBackend>>,
        coordinator: Arc<SyncCoordinator>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            router: Router::with_read_handle(primary, read),
            state: WriteState::Clean,
            query_log: QueryLog::new(),
            coordinator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether reads are currently served by the local replica
    pub fn reads_from_replica(&self) -> bool {
        self.router.uses_replica()
    }

    // Statements

    /// Run an insert. Any successful execution marks the connection
    /// modified, even one that inserted no rows.
    pub async fn insert(&mut self, sql: &str, bindings: &[Value]) -> Result<bool> {
        self.execute_on_primary(sql, bindings).await?;
        self.state.mark_dirty();
        Ok(true)
    }

    /// Run an update. Marks the connection modified only if rows were affected.
    pub async fn update(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.affecting_statement(sql, bindings).await
    }

    /// Run a delete. Marks the connection modified only if rows were affected.
    pub async fn delete(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.affecting_statement(sql, bindings).await
    }

    /// Run a raw statement. Write statements mark the connection modified
    /// whatever the outcome.
    pub async fn statement(&mut self, sql: &str, bindings: &[Value]) -> Result<bool> {
        let kind = classifier::classify(sql);
        let result = self.execute_on_primary(sql, bindings).await;
        if kind.is_write() {
            self.state.mark_dirty();
        }
        result.map(|_| true)
    }

    /// Run a query on the read handle
    pub async fn select(&mut self, sql: &str, bindings: &[Value]) -> Result<Rows> {
        let replica_path = self.config.replica_path().cloned();
        let handle = self.router.read(replica_path.as_deref()).await;
        self.query_on(handle, sql, bindings).await
    }

    /// Run a query on the primary, bypassing the replica
    pub async fn select_from_primary(&mut self, sql: &str, bindings: &[Value]) -> Result<Rows> {
        let handle = Arc::clone(self.router.primary());
        self.query_on(handle, sql, bindings).await
    }

    async fn affecting_statement(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        let affected = self.execute_on_primary(sql, bindings).await?;
        if classifier::affected_modified(affected) {
            self.state.mark_dirty();
        }
        Ok(affected)
    }

    async fn execute_on_primary(&self, sql: &str, bindings: &[Value]) -> Result<u64> {
        let primary = self.router.primary();
        tracing::debug!("[{}] {} <- {}", self.name, primary.kind(), sql);

        let start = Instant::now();
        let affected = primary.execute(sql, bindings).await?;
        self.query_log.record(sql, bindings, start.elapsed()).await;
        Ok(affected)
    }

    async fn query_on(&self, handle: Arc<dyn SqlBackend>, sql: &str, bindings: &[Value]) -> Result<Rows> {
        tracing::debug!("[{}] {} <- {}", self.name, handle.kind(), sql);

        let start = Instant::now();
        let rows = handle.query(sql, bindings).await?;
        self.query_log.record(sql, bindings, start.elapsed()).await;
        Ok(rows)
    }

    // Write tracking

    /// Whether writes were accepted since open or the last sync request
    pub fn has_modified_records(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn reset_modified_records(&mut self) {
        self.state.clear();
    }

    // Sync

    /// Sync the replica now, waiting up to the configured deadline.
    /// On failure the modified flag is left as it was.
    pub async fn sync(&mut self) -> Result<SyncOutput> {
        let output = self.coordinator.sync(&self.name, &self.config).await?;
        self.reset_modified_records();
        Ok(output)
    }

    /// Queue a sync for a background worker and return immediately.
    ///
    /// The modified flag is cleared as soon as the task is queued, so it no
    /// longer proves the replica is current.
    pub async fn background_sync(&mut self) -> Result<()> {
        self.coordinator.schedule(&self.name).await?;
        self.enable_query_log().await?;
        self.reset_modified_records();
        Ok(())
    }

    // Query log

    /// The primary client's query log
    fn client_log(&self) -> Result<&QueryLog> {
        let primary = self.router.primary();
        primary.query_log().ok_or_else(|| {
            Error::InvalidDriverState(format!(
                "the '{}' backend of connection '{}' does not keep a query log",
                primary.kind(),
                self.name
            ))
        })
    }

    pub async fn enable_query_log(&self) -> Result<()> {
        self.query_log.enable().await;
        self.client_log()?.enable().await;
        Ok(())
    }

    pub async fn disable_query_log(&self) -> Result<()> {
        self.query_log.disable().await;
        self.client_log()?.disable().await;
        Ok(())
    }

    pub async fn flush_query_log(&self) -> Result<()> {
        self.query_log.flush().await;
        self.client_log()?.flush().await;
        Ok(())
    }

    /// Statements recorded by the primary client, in execution order
    pub async fn get_query_log(&self) -> Result<Vec<QueryLogEntry>> {
        Ok(self.client_log()?.entries().await)
    }

    pub async fn logging_queries(&self) -> bool {
        self.query_log.is_enabled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::backend::SqliteBackend;
    use crate::config::Driver;
    use crate::queue::{BackgroundSyncTask, MemoryQueue, TaskSource};
    use crate::sync::testing::RecordingRunner;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn libsql_config(replica: &str) -> ConnectionConfig {
        ConnectionConfig {
            driver: Driver::Libsql,
            db_url: "libsql://db.example.io".into(),
            access_token: Some("token".into()),
            db_replica: Some(PathBuf::from(replica)),
            request_timeout_secs: 30,
        }
    }

    struct Fixture {
        primary: Arc<ScriptedBackend>,
        runner: Arc<RecordingRunner>,
        queue: Arc<MemoryQueue>,
        conn: Connection,
    }

    fn fixture_with(runner: RecordingRunner, primary: ScriptedBackend) -> Fixture {
        let primary = Arc::new(primary);
        let runner = Arc::new(runner);
        let queue = Arc::new(MemoryQueue::new(3));
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&runner) as Arc<dyn crate::sync::SyncRunner>,
            Arc::clone(&queue) as Arc<dyn crate::queue::TaskQueue>,
            Duration::from_secs(5),
        ));
        let conn = Connection::new(
            "main",
            libsql_config("/tmp/edgesync-missing-replica.db"),
            Arc::clone(&primary) as Arc<dyn SqlBackend>,
            coordinator,
        );
        Fixture {
            primary,
            runner,
            queue,
            conn,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingRunner::succeeding(), ScriptedBackend::new("primary"))
    }

    #[tokio::test]
    async fn test_update_then_sync_scenario() {
        let mut f = fixture();
        assert!(!f.conn.has_modified_records());

        f.primary.push_affected(3);
        assert_eq!(f.conn.update("UPDATE t SET x=1", &[]).await.unwrap(), 3);
        assert!(f.conn.has_modified_records());

        let output = f.conn.sync().await.unwrap();
        assert_eq!(output.stdout, "synced");
        assert!(!f.conn.has_modified_records());

        let requests = f.runner.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].replica_path, PathBuf::from("/tmp/edgesync-missing-replica.db"));
    }

    #[tokio::test]
    async fn test_zero_row_update_and_delete_stay_clean() {
        let mut f = fixture();
        f.primary.push_affected(0);
        f.primary.push_affected(0);
        assert_eq!(f.conn.update("UPDATE t SET x=1 WHERE 0", &[]).await.unwrap(), 0);
        assert_eq!(f.conn.delete("DELETE FROM t WHERE 0", &[]).await.unwrap(), 0);
        assert!(!f.conn.has_modified_records());

        f.primary.push_affected(2);
        f.conn.delete("DELETE FROM t", &[]).await.unwrap();
        assert!(f.conn.has_modified_records());
    }

    #[tokio::test]
    async fn test_insert_is_gated_on_success() {
        let mut f = fixture();

        f.primary.push_error("UNIQUE constraint failed: t.id");
        let err = f.conn.insert("INSERT INTO t VALUES (1)", &[]).await.unwrap_err();
        assert!(err.is_unique_constraint_violation());
        assert!(!f.conn.has_modified_records());

        // Succeeds without inserting anything
        f.primary.push_affected(0);
        assert!(f.conn.insert("INSERT OR IGNORE INTO t VALUES (1)", &[]).await.unwrap());
        assert!(f.conn.has_modified_records());

        f.conn.reset_modified_records();
        f.primary.push_affected(1);
        assert!(f.conn.insert("INSERT INTO t VALUES (2)", &[Value::Integer(2)]).await.unwrap());
        assert!(f.conn.has_modified_records());
    }

    #[tokio::test]
    async fn test_insert_or_ignore_on_sqlite_primary() {
        let primary = Arc::new(SqliteBackend::open_in_memory().await.unwrap());
        primary.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).await.unwrap();
        primary.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();

        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::new(RecordingRunner::succeeding()),
            Arc::new(MemoryQueue::new(1)),
            Duration::from_secs(5),
        ));
        let mut conn = Connection::new(
            "main",
            libsql_config("/tmp/edgesync-missing-replica.db"),
            primary as Arc<dyn SqlBackend>,
            coordinator,
        );

        assert!(conn.insert("INSERT OR IGNORE INTO t VALUES (1)", &[]).await.unwrap());
        assert!(conn.has_modified_records());
    }

    #[tokio::test]
    async fn test_raw_write_statements_mark_dirty_regardless_of_outcome() {
        for sql in ["insert into t values (1)", "  Update t set x = 1", "DELETE FROM t", "replace into t values (1)"] {
            let mut f = fixture();
            f.primary.push_error("no such table: t");
            assert!(f.conn.statement(sql, &[]).await.is_err());
            assert!(f.conn.has_modified_records(), "{sql}");

            f.conn.reset_modified_records();
            f.primary.push_affected(0);
            assert!(f.conn.statement(sql, &[]).await.unwrap());
            assert!(f.conn.has_modified_records(), "{sql}");
        }
    }

    #[tokio::test]
    async fn test_raw_select_never_marks_dirty() {
        let mut f = fixture();
        f.conn.statement("SELECT 1", &[]).await.unwrap();
        f.conn.statement("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        f.conn.select("SELECT * FROM t", &[]).await.unwrap();
        assert!(!f.conn.has_modified_records());
    }

    #[tokio::test]
    async fn test_reset_modified_records() {
        let mut f = fixture();
        f.conn.statement("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        f.conn.reset_modified_records();
        assert!(!f.conn.has_modified_records());
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_state() {
        let mut f = fixture_with(RecordingRunner::failing("timed out after 5s"), ScriptedBackend::new("primary"));

        let err = f.conn.sync().await.unwrap_err();
        assert!(matches!(err, Error::SyncFailed(_)));
        assert!(!f.conn.has_modified_records());

        f.conn.statement("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        assert!(f.conn.sync().await.is_err());
        assert!(f.conn.has_modified_records());
    }

    #[tokio::test]
    async fn test_sync_configuration_error_leaves_state() {
        let mut f = fixture();
        f.conn.config.db_replica = None;
        f.conn.statement("INSERT INTO t VALUES (1)", &[]).await.unwrap();

        let err = f.conn.sync().await.unwrap_err();
        assert!(err.is_configuration_error());
        assert!(f.conn.has_modified_records());
        assert!(f.runner.requests().is_empty());
    }

    #[tokio::test]
    async fn test_background_sync_clears_immediately() {
        let mut f = fixture();
        f.primary.push_affected(1);
        f.conn.update("UPDATE t SET x = 1", &[]).await.unwrap();

        f.conn.background_sync().await.unwrap();
        assert!(!f.conn.has_modified_records());
        assert!(f.conn.logging_queries().await);
        assert!(f.primary.query_log().unwrap().is_enabled().await);

        // Nothing has actually synced yet
        assert!(f.runner.requests().is_empty());
        let task = f.queue.next().await.unwrap().unwrap();
        assert_eq!(task.task, BackgroundSyncTask::new("main"));
    }

    #[tokio::test]
    async fn test_query_log_mirror() {
        let mut f = fixture();
        f.conn.statement("SELECT 0", &[]).await.unwrap();

        f.conn.enable_query_log().await.unwrap();
        f.conn.statement("INSERT INTO t VALUES (?)", &[Value::Integer(1)]).await.unwrap();
        f.conn.select_from_primary("SELECT * FROM t", &[]).await.unwrap();

        let log = f.conn.get_query_log().await.unwrap();
        let queries: Vec<_> = log.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(queries, vec!["INSERT INTO t VALUES (?)", "SELECT * FROM t"]);
        assert_eq!(log[0].bindings, vec![Value::Integer(1)]);
        assert_eq!(f.conn.query_log.entries().await.len(), 2);

        f.conn.flush_query_log().await.unwrap();
        assert!(f.conn.get_query_log().await.unwrap().is_empty());
        assert!(f.conn.query_log.entries().await.is_empty());

        f.conn.disable_query_log().await.unwrap();
        assert!(!f.conn.logging_queries().await);
        assert!(!f.primary.query_log().unwrap().is_enabled().await);
        f.conn.statement("SELECT 1", &[]).await.unwrap();
        assert!(f.conn.get_query_log().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_log_requires_client_log() {
        let mut f = fixture_with(RecordingRunner::succeeding(), ScriptedBackend::without_log("custom"));
        let err = f.conn.enable_query_log().await.unwrap_err();
        assert!(matches!(err, Error::InvalidDriverState(_)));
        assert!(f.conn.get_query_log().await.is_err());

        // The task is queued before logging fails, so the flag stays set
        f.conn.statement("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        assert!(f.conn.background_sync().await.is_err());
        assert!(f.conn.has_modified_records());
        assert!(f.queue.next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_replica_reads_from_primary() {
        let mut f = fixture();
        f.conn.select("SELECT * FROM t", &[]).await.unwrap();
        assert!(!f.conn.reads_from_replica());
        assert_eq!(f.primary.calls(), vec!["SELECT * FROM t"]);
    }

    #[tokio::test]
    async fn test_explicit_read_handle_serves_reads_only() {
        let primary = Arc::new(ScriptedBackend::new("primary"));
        let replica = Arc::new(ScriptedBackend::new("replica"));
        replica.set_rows(Rows {
            columns: vec!["x".into()],
            rows: vec![vec![Value::Integer(9)]],
        });
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::new(RecordingRunner::succeeding()),
            Arc::new(MemoryQueue::new(1)),
            Duration::from_secs(5),
        ));
        let mut conn = Connection::with_read_handle(
            "main",
            libsql_config("/tmp/replica.db"),
            Arc::clone(&primary) as Arc<dyn SqlBackend>,
            Some(Arc::clone(&replica) as Arc<dyn SqlBackend>),
            coordinator,
        );

        let rows = conn.select("SELECT x FROM t", &[]).await.unwrap();
        assert_eq!(rows.rows, vec![vec![Value::Integer(9)]]);
        conn.statement("UPDATE t SET x = 1", &[]).await.unwrap();

        assert_eq!(replica.calls(), vec!["SELECT x FROM t"]);
        assert_eq!(primary.calls(), vec!["UPDATE t SET x = 1"]);
    }

    #[tokio::test]
    async fn test_sqlite_primary_with_replica_file() {
        let dir = tempdir().unwrap();
        let replica_path = dir.path().join("replica.db");
        {
            let seed = SqliteBackend::open(&replica_path).await.unwrap();
            seed.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
            seed.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
            seed.close().await;
        }

        let primary = Arc::new(SqliteBackend::open_in_memory().await.unwrap());
        primary.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();

        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::new(RecordingRunner::succeeding()),
            Arc::new(MemoryQueue::new(1)),
            Duration::from_secs(5),
        ));
        let mut conn = Connection::new(
            "main",
            libsql_config(replica_path.to_str().unwrap()),
            primary as Arc<dyn SqlBackend>,
            coordinator,
        );

        assert!(conn.insert("INSERT INTO t VALUES (?)", &[Value::Integer(2)]).await.unwrap());
        assert!(conn.has_modified_records());

        // The replica has not seen the write until it is synced
        let replica_rows = conn.select("SELECT x FROM t ORDER BY x", &[]).await.unwrap();
        assert!(conn.reads_from_replica());
        assert_eq!(replica_rows.rows, vec![vec![Value::Integer(1)]]);

        let primary_rows = conn.select_from_primary("SELECT x FROM t ORDER BY x", &[]).await.unwrap();
        assert_eq!(primary_rows.rows, vec![vec![Value::Integer(2)]]);
    }
}
