//! In-process task queue backed by a tokio channel.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};

use super::{BackgroundSyncTask, QueuedTask, TaskQueue, TaskSource};
use crate::error::{Error, Result};

/// Channel queue for single-process deployments and tests
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    next_id: AtomicU64,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            next_id: AtomicU64::new(1),
            max_attempts,
        }
    }
}

#[async_trait::async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: BackgroundSyncTask) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Queued background sync {} for '{}'", id, task.connection);
        self.tx
            .send(QueuedTask {
                id,
                task,
                attempts: 0,
            })
            .map_err(|_| Error::QueueClosed)
    }
}

#[async_trait::async_trait]
impl TaskSource for MemoryQueue {
    async fn next(&self) -> Result<Option<QueuedTask>> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(task) => Ok(Some(task)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::QueueClosed),
        }
    }

    async fn ack(&self, _id: u64) -> Result<()> {
        Ok(())
    }

    async fn release(&self, mut task: QueuedTask, error: &str) -> Result<()> {
        task.attempts += 1;
        if task.attempts >= self.max_attempts {
            tracing::error!(
                "Dropping background sync {} for '{}' after {} attempts: {}",
                task.id,
                task.task.connection,
                task.attempts,
                error
            );
            return Ok(());
        }

        tracing::warn!(
            "Requeueing background sync {} for '{}' (attempt {}): {}",
            task.id,
            task.task.connection,
            task.attempts,
            error
        );
        self.tx.send(task).map_err(|_| Error::QueueClosed)
    }
}
