//! Connection Manager
//!
//! Builds connections from configuration and shares one sync coordinator
//! between them.

use std::path::Path;
use std::sync::Arc;

use crate::backend::{RemoteClient, SqlBackend, SqliteBackend};
use crate::config::{ConnectionConfig, Driver, EdgeSyncConfig};
use crate::connection::Connection;
use crate::error::Result;
use crate::sync::SyncCoordinator;

/// Factory for named connections
pub struct DatabaseManager {
    config: Arc<EdgeSyncConfig>,
    coordinator: Arc<SyncCoordinator>,
}

impl DatabaseManager {
    pub fn new(config: Arc<EdgeSyncConfig>, coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn config(&self) -> &EdgeSyncConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Open the named connection (`None` = default)
    pub async fn connection(&self, name: Option<&str>) -> Result<Connection> {
        let (name, conn_config) = self.config.connection(name)?;
        let primary = open_primary(conn_config).await?;

        tracing::debug!(
            "Opened connection '{}' ({} primary, replica {:?})",
            name,
            primary.kind(),
            conn_config.replica_path()
        );

        Ok(Connection::new(
            name,
            conn_config.clone(),
            primary,
            Arc::clone(&self.coordinator),
        ))
    }
}

/// Primary handle for a connection's driver
async fn open_primary(config: &ConnectionConfig) -> Result<Arc<dyn SqlBackend>> {
    let primary: Arc<dyn SqlBackend> = match config.driver {
        Driver::Libsql => Arc::new(RemoteClient::new(
            &config.endpoint_url(),
            config.access_token.clone(),
            config.request_timeout(),
        )?),
        Driver::Sqlite => {
            let path = config.db_url.strip_prefix("sqlite:").unwrap_or(&config.db_url);
            Arc::new(SqliteBackend::open(Path::new(path)).await?)
        }
    };
    Ok(primary)
}
