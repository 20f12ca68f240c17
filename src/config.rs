//! EdgeSync Configuration
//!
//! This module provides configuration structures for connections,
//! the external sync procedure, the background task queue and logging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main EdgeSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSyncConfig {
    /// Name of the connection used when none is given
    #[serde(default = "default_connection_name")]
    pub default: String,

    /// Named database connections
    pub connections: BTreeMap<String, ConnectionConfig>,

    /// External sync procedure configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Background task queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection driver kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Remote libSQL primary with an optional embedded replica
    Libsql,
    /// Plain local SQLite file, never replicated
    Sqlite,
}

/// Per-connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver kind
    pub driver: Driver,

    /// Primary URL (libsql) or database file path (sqlite)
    pub db_url: String,

    /// Auth token for the primary
    #[serde(default)]
    pub access_token: Option<String>,

    /// Local replica file (libsql only)
    #[serde(default)]
    pub db_replica: Option<PathBuf>,

    /// HTTP request timeout for the remote primary, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// External sync procedure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Program to execute
    #[serde(default = "default_sync_program")]
    pub program: String,

    /// Script passed as the first argument
    #[serde(default = "default_sync_script")]
    pub script: String,

    /// Working directory for the sync process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Deadline for one sync run, in seconds
    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,
}

/// Background task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Durable queue database path
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,

    /// Worker poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deliveries before a task is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_connection_name() -> String {
    "main".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_sync_program() -> String {
    "node".to_string()
}

fn default_sync_script() -> String {
    "sync.mjs".to_string()
}

fn default_sync_timeout() -> u64 {
    60
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("/var/lib/edgesync/queue.db")
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            program: default_sync_program(),
            script: default_sync_script(),
            working_dir: None,
            timeout_secs: default_sync_timeout(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ConnectionConfig {
    /// Primary endpoint with the `libsql:` scheme rewritten to `https:`
    pub fn endpoint_url(&self) -> String {
        match self.db_url.strip_prefix("libsql:") {
            Some(rest) => format!("https:{}", rest),
            None => self.db_url.clone(),
        }
    }

    /// Whether this connection is of the replicated kind
    pub fn is_replicated(&self) -> bool {
        self.driver == Driver::Libsql
    }

    /// Configured replica path, if any and non-empty
    pub fn replica_path(&self) -> Option<&PathBuf> {
        self.db_replica
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Auth token, empty when not configured
    pub fn auth_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or("")
    }

    /// Request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl EdgeSyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: EdgeSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.connections.is_empty() {
            return Err(crate::Error::Config("at least one connection is required".into()));
        }

        if !self.connections.contains_key(&self.default) {
            return Err(crate::Error::Config(format!(
                "default connection '{}' is not defined",
                self.default
            )));
        }

        for (name, conn) in &self.connections {
            if conn.db_url.is_empty() {
                return Err(crate::Error::Config(format!(
                    "connections.{}.db_url cannot be empty",
                    name
                )));
            }
        }

        if self.sync.program.is_empty() {
            return Err(crate::Error::Config("sync.program cannot be empty".into()));
        }

        if self.sync.timeout_secs == 0 {
            return Err(crate::Error::Config("sync.timeout_secs must be positive".into()));
        }

        if self.queue.max_attempts == 0 {
            return Err(crate::Error::Config("queue.max_attempts must be positive".into()));
        }

        Ok(())
    }

    /// Look up a connection, falling back to the default when `name` is None
    pub fn connection(&self, name: Option<&str>) -> crate::Result<(&str, &ConnectionConfig)> {
        let name = name.unwrap_or(&self.default);
        self.connections
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| crate::Error::UnknownConnection(name.to_string()))
    }

    /// Get sync deadline as Duration
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout_secs)
    }

    /// How long a worker may hold a queued task before it is presumed dead
    pub fn lease_timeout(&self) -> Duration {
        self.sync_timeout() * 2
    }

    /// Get queue poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    /// Sample configuration written by `edgesync init`
    pub fn sample() -> String {
        r#"default = "main"

[connections.main]
driver = "libsql"
db_url = "libsql://your-database.turso.io"
access_token = ""
db_replica = "/var/lib/edgesync/replica.db"

[sync]
program = "node"
script = "sync.mjs"
timeout_secs = 60

[queue]
path = "/var/lib/edgesync/queue.db"
poll_interval_ms = 500
max_attempts = 3

[logging]
level = "info"
"#
        .to_string()
    }
}
