//! Read/Write Routing
//!
//! Writes always go to the primary. Reads go to the local replica once it
//! has been opened, otherwise to the primary.

use std::path::Path;
use std::sync::Arc;

use crate::backend::{SqlBackend, SqliteBackend};

/// Open a read-only handle on the replica file, or `None` when there is no
/// usable replica and reads should fall back to the primary.
pub async fn open_read_handle(replica_path: &Path) -> Option<SqliteBackend> {
    if replica_path.as_os_str().is_empty() {
        return None;
    }

    if !replica_path.exists() {
        tracing::debug!("Replica {:?} not present; reads use the primary", replica_path);
        return None;
    }

    match SqliteBackend::open_read_only(replica_path).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("{}; reads fall back to the primary", e);
            None
        }
    }
}

/// Read handle selection for one connection
pub(crate) enum ReadHandle {
    /// Not resolved yet; resolved on the first read
    Unresolved,
    /// No replica; reads use the primary
    Primary,
    /// Designated replica handle for the rest of the connection's life
    Replica(Arc<dyn SqlBackend>),
}

impl ReadHandle {
    pub(crate) fn is_resolved(&self) -> bool {
        !matches!(self, ReadHandle::Unresolved)
    }
}

/// Router over a primary and an optional lazily-opened replica
pub(crate) struct Router {
    primary: Arc<dyn SqlBackend>,
    read: ReadHandle,
}

impl Router {
    pub(crate) fn new(primary: Arc<dyn SqlBackend>) -> Self {
        Self {
            primary,
            read: ReadHandle::Unresolved,
        }
    }

    pub(crate) fn with_read_handle(primary: Arc<dyn SqlBackend>, read: Option<Arc<dyn SqlBackend>>) -> Self {
        Self {
            primary,
            read: match read {
                Some(handle) => ReadHandle::Replica(handle),
                None => ReadHandle::Primary,
            },
        }
    }

    pub(crate) fn primary(&self) -> &Arc<dyn SqlBackend> {
        &self.primary
    }

    /// Handle that serves reads, opening the replica on first use
    pub(crate) async fn read(&mut self, replica_path: Option<&Path>) -> Arc<dyn SqlBackend> {
        if !self.read.is_resolved() {
            self.read = match replica_path {
                Some(path) => match open_read_handle(path).await {
                    Some(handle) => {
                        tracing::debug!("Reads served by replica {:?}", path);
                        ReadHandle::Replica(Arc::new(handle))
                    }
                    None => ReadHandle::Primary,
                },
                None => ReadHandle::Primary,
            };
        }

        match &self.read {
            ReadHandle::Replica(handle) => Arc::clone(handle),
            _ => Arc::clone(&self.primary),
        }
    }

    pub(crate) fn uses_replica(&self) -> bool {
        matches!(self.read, ReadHandle::Replica(_))
    }
}
