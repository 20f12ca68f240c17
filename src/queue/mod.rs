//! Background Task Queue Module
//!
//! Deferred sync requests. Producers only enqueue; workers lease tasks,
//! then ack or release them. Delivery is at-least-once.

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::{QueueStats, SqliteQueue};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Request to sync one connection later. Carries only the connection name
/// so that any worker process can rehydrate it from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundSyncTask {
    pub connection: String,
}

impl BackgroundSyncTask {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
        }
    }
}

/// A task leased to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub id: u64,
    pub task: BackgroundSyncTask,
    /// Deliveries before this one
    pub attempts: u32,
}

/// Producer side of the queue
#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: BackgroundSyncTask) -> Result<()>;
}

/// Consumer side of the queue
#[async_trait::async_trait]
pub trait TaskSource: Send + Sync {
    /// Lease the next available task, if any
    async fn next(&self) -> Result<Option<QueuedTask>>;

    /// Task finished; never deliver it again
    async fn ack(&self, id: u64) -> Result<()>;

    /// Task failed; deliver again unless out of attempts
    async fn release(&self, task: QueuedTask, error: &str) -> Result<()>;
}
