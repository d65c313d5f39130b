//! Server deletion, normal and forced.
//!
//! Forced mode is what the creation saga uses for compensation: daemon-side
//! failures are logged and swallowed so the local record is always removed.
//! Normal mode surfaces daemon failures and leaves the record in place.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::daemon::{DaemonClient, DaemonError};
use crate::db::{DbError, NodeStore, Server, ServerStore};

/// Errors from server deletion.
#[derive(Debug, Error)]
pub enum DeletionError {
    /// The server's node no longer exists; only reported in normal mode.
    #[error("node {0} does not exist")]
    UnknownNode(i32),

    /// The daemon refused the delete; only reported in normal mode.
    #[error(transparent)]
    Remote(#[from] DaemonError),

    #[error("failed to remove server record: {0}")]
    Database(#[from] DbError),
}

/// Removes a server from the panel and, best-effort, from its node.
#[async_trait]
pub trait ServerDeletion: Send + Sync {
    async fn delete(&self, server: &Server, force: bool) -> Result<(), DeletionError>;
}

/// Concrete deletion service: daemon cleanup first, then the transactional
/// removal of the record, its variable rows, and its allocation binds.
pub struct ServerDeletionService {
    servers: Arc<dyn ServerStore>,
    nodes: Arc<dyn NodeStore>,
    daemon: Arc<dyn DaemonClient>,
}

impl ServerDeletionService {
    pub fn new(
        servers: Arc<dyn ServerStore>,
        nodes: Arc<dyn NodeStore>,
        daemon: Arc<dyn DaemonClient>,
    ) -> Self {
        Self {
            servers,
            nodes,
            daemon,
        }
    }
}

#[async_trait]
impl ServerDeletion for ServerDeletionService {
    async fn delete(&self, server: &Server, force: bool) -> Result<(), DeletionError> {
        match self.nodes.find(server.node_id).await? {
            Some(node) => {
                if let Err(e) = self.daemon.delete_server(&node, server).await {
                    if !force {
                        return Err(e.into());
                    }
                    warn!(
                        uuid = %server.uuid,
                        node_id = node.id,
                        error = %e,
                        "Daemon delete failed, continuing forced deletion"
                    );
                }
            }
            None if force => {
                warn!(
                    uuid = %server.uuid,
                    node_id = server.node_id,
                    "Server's node is gone, removing local record only"
                );
            }
            None => return Err(DeletionError::UnknownNode(server.node_id)),
        }

        self.servers.delete_server(server.id).await?;

        info!(uuid = %server.uuid, force, "Server deleted");
        Ok(())
    }
}
