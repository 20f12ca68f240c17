//! EdgeSync - Replica-aware connections for libSQL
//!
//! Coordinates access to a libSQL database that has a single writable remote
//! primary and an optional embedded read replica stored in a local SQLite
//! file. The replica only catches up with the primary after an explicit sync,
//! so every connection tracks whether it has written anything since the last
//! sync and offers two ways to bring the replica up to date.
//!
//! # Architecture
//!
//! - Writes always go to the primary; reads go to the replica when its file
//!   exists, otherwise to the primary
//! - Insert/update/delete mark the connection modified only when they report
//!   an effect; raw statements are classified by their leading keyword
//! - `sync` runs an external sync procedure under a deadline and clears the
//!   modified flag on success
//! - `background_sync` queues the same procedure for a worker and clears the
//!   flag immediately
//!
//! # Features
//!
//! - Hrana-over-HTTP client for the remote primary
//! - Read-only SQLite handles for embedded replicas
//! - In-memory and durable (SQLite) background task queues
//! - Query log mirrored between the connection and the primary client

pub mod backend;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod error;
pub mod log;
pub mod manager;
pub mod queue;
pub mod sync;

pub use config::EdgeSyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{Rows, SqlBackend, Value};
    pub use crate::classifier::{classify, QueryKind};
    pub use crate::config::EdgeSyncConfig;
    pub use crate::connection::Connection;
    pub use crate::error::{Error, Result};
    pub use crate::log::QueryLogEntry;
    pub use crate::manager::DatabaseManager;
    pub use crate::queue::{BackgroundSyncTask, TaskQueue};
    pub use crate::sync::{SyncCoordinator, SyncOutput, SyncRequest, SyncRunner};
}
