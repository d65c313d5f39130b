//! Application state shared across request handlers.

use std::sync::Arc;

use crate::db::{Database, ServerStore};
use crate::servers::ServerCreationService;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    servers: Arc<dyn ServerStore>,
    creation: Arc<ServerCreationService>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        db: Database,
        servers: Arc<dyn ServerStore>,
        creation: Arc<ServerCreationService>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                db,
                servers,
                creation,
            }),
        }
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    /// Get the server record store.
    pub fn servers(&self) -> &Arc<dyn ServerStore> {
        &self.inner.servers
    }

    /// Get the provisioning orchestrator.
    pub fn creation(&self) -> &Arc<ServerCreationService> {
        &self.inner.creation
    }
}
