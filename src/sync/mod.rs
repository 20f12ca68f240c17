//! Replica Sync Module
//!
//! Drives the external procedure that pulls the primary's changes into the
//! local replica file, either in the foreground (bounded by a deadline) or by
//! handing a task to the background queue.

mod process;
mod worker;

pub use process::ProcessSyncRunner;
pub use worker::SyncWorker;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::queue::{BackgroundSyncTask, TaskQueue};

/// Coordinates of one sync run
#[derive(Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub endpoint_url: String,
    pub auth_token: String,
    pub replica_path: PathBuf,
    pub timeout: Duration,
}

impl fmt::Debug for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRequest")
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &"<redacted>")
            .field("replica_path", &self.replica_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Captured output of a successful sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs the external sync procedure
#[async_trait::async_trait]
pub trait SyncRunner: Send + Sync {
    /// Run to completion within `request.timeout`. A non-success status or
    /// an expired deadline is reported as `Error::SyncFailed`.
    async fn run(&self, request: SyncRequest) -> Result<SyncOutput>;
}

/// Foreground and background sync entry points shared by connections
pub struct SyncCoordinator {
    runner: Arc<dyn SyncRunner>,
    queue: Arc<dyn TaskQueue>,
    timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(runner: Arc<dyn SyncRunner>, queue: Arc<dyn TaskQueue>, timeout: Duration) -> Self {
        Self {
            runner,
            queue,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check that `config` can be synced and build its request
    pub fn prepare(&self, name: &str, config: &ConnectionConfig) -> Result<SyncRequest> {
        if !config.is_replicated() {
            return Err(Error::NotReplicated(name.to_string()));
        }

        let replica_path = config
            .replica_path()
            .ok_or_else(|| Error::NoReplica(name.to_string()))?;

        Ok(SyncRequest {
            endpoint_url: config.endpoint_url(),
            auth_token: config.auth_token().to_string(),
            replica_path: replica_path.clone(),
            timeout: self.timeout,
        })
    }

    /// Run one foreground sync. No retry; the caller owns any state reset.
    pub async fn sync(&self, name: &str, config: &ConnectionConfig) -> Result<SyncOutput> {
        let request = self.prepare(name, config)?;

        tracing::info!(
            "Syncing replica {:?} for connection '{}' (timeout {:?})",
            request.replica_path,
            name,
            request.timeout
        );

        match self.runner.run(request).await {
            Ok(output) => {
                tracing::info!("Replica sync for '{}' completed", name);
                Ok(output)
            }
            Err(e) => {
                tracing::warn!("Replica sync for '{}' failed: {}", name, e);
                Err(e)
            }
        }
    }

    /// Queue a background sync for `name`
    pub async fn schedule(&self, name: &str) -> Result<()> {
        self.queue.enqueue(BackgroundSyncTask::new(name)).await?;
        tracing::debug!("Scheduled background sync for '{}'", name);
        Ok(())
    }
}
