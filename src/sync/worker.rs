//! Background Sync Worker
//!
//! Drains queued sync tasks and runs them through the coordinator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::SyncCoordinator;
use crate::config::EdgeSyncConfig;
use crate::error::Result;
use crate::queue::TaskSource;

/// Worker consuming background sync tasks
pub struct SyncWorker {
    config: Arc<EdgeSyncConfig>,
    coordinator: Arc<SyncCoordinator>,
    source: Arc<dyn TaskSource>,
    poll_interval: Duration,
}

impl SyncWorker {
    pub fn new(
        config: Arc<EdgeSyncConfig>,
        coordinator: Arc<SyncCoordinator>,
        source: Arc<dyn TaskSource>,
    ) -> Self {
        let poll_interval = config.poll_interval();
        Self {
            config,
            coordinator,
            source,
            poll_interval,
        }
    }

    /// Process at most one task. Returns false when the queue was empty.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(queued) = self.source.next().await? else {
            return Ok(false);
        };

        let name = queued.task.connection.clone();
        let outcome = match self.config.connection(Some(&name)) {
            Ok((name, conn)) => self.coordinator.sync(name, conn).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(output) => {
                if !output.stdout.trim().is_empty() {
                    tracing::info!("{}", output.stdout.trim());
                }
                self.source.ack(queued.id).await?;
            }
            Err(e) if e.is_retryable() => {
                self.source.release(queued, &e.to_string()).await?;
            }
            Err(e) => {
                tracing::error!("Discarding background sync {} for '{}': {}", queued.id, name, e);
                self.source.ack(queued.id).await?;
            }
        }

        Ok(true)
    }

    /// Poll the queue until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Sync worker started (poll interval {:?})", self.poll_interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Drain everything available before sleeping
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!("Sync worker error: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sync worker stopped");
        Ok(())
    }
}
