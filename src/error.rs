//! EdgeSync Error Types

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for EdgeSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// EdgeSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("The connection '{0}' is not a libsql connection")]
    NotReplicated(String),

    #[error("The connection '{0}' does not have a read replica")]
    NoReplica(String),

    // Sync errors
    #[error("Sync command failed: {0}")]
    SyncFailed(String),

    // Routing errors
    #[error("Replica unavailable at {0}")]
    ReplicaUnavailable(PathBuf),

    // Driver errors
    #[error("Invalid driver state: {0}")]
    InvalidDriverState(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote database error: {0}")]
    Remote(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    // Queue errors
    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Task queue closed")]
    QueueClosed,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Errors raised before any sync attempt because the connection
    /// cannot be synchronized at all. Retrying never helps.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::UnknownConnection(_)
                | Error::NotReplicated(_)
                | Error::NoReplica(_)
        )
    }

    /// Whether a failed background sync is worth delivering again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SyncFailed(_) | Error::Http(_) | Error::Remote(_)
        )
    }

    /// Check if this error reports a violated UNIQUE constraint
    pub fn is_unique_constraint_violation(&self) -> bool {
        let message = match self {
            Error::Database(e) => e.to_string(),
            Error::Remote(m) | Error::QueryExecution(m) => m.clone(),
            _ => return false,
        };
        is_unique_violation_message(&message)
    }
}

fn is_unique_violation_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.contains("unique constraint failed") {
        return true;
    }
    // Older SQLite builds: "column email is not unique", "columns a, b are not unique"
    lower.contains("column")
        && (lower.contains(" is not unique") || lower.contains(" are not unique"))
}
