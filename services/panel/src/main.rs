//! roost panel
//!
//! The panel is the coordination service of the fleet: it owns the
//! authoritative server records and drives provisioning against the per-node
//! daemons.

use std::sync::Arc;

use anyhow::Result;
use roost_panel::{
    api, config,
    daemon::{DaemonClient, HttpDaemonClient},
    db::{
        AllocationStore, Database, EggStore, NodeStore, PgAllocationStore, PgEggStore,
        PgNodeStore, PgServerStore, ServerStore,
    },
    deployment::{AllocationSelection, AllocationSelector, FindViableNodes, NodeFinder},
    servers::{
        EggVariableValidator, ServerCreationService, ServerDeletion, ServerDeletionService,
        VariableValidator,
    },
    state::AppState,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ROOST_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting roost panel");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    // Wire the provisioning services. Each collaborator sits behind a trait
    // so tests can swap it out; production uses the Postgres and HTTP
    // implementations exclusively.
    let pool = db.pool().clone();
    let servers: Arc<dyn ServerStore> = Arc::new(PgServerStore::new(pool.clone()));
    let allocations: Arc<dyn AllocationStore> = Arc::new(PgAllocationStore::new(pool.clone()));
    let eggs: Arc<dyn EggStore> = Arc::new(PgEggStore::new(pool.clone()));
    let nodes: Arc<dyn NodeStore> = Arc::new(PgNodeStore::new(pool.clone()));
    let node_finder: Arc<dyn NodeFinder> = Arc::new(FindViableNodes::new(pool.clone()));
    let allocation_selector: Arc<dyn AllocationSelector> =
        Arc::new(AllocationSelection::new(pool.clone()));
    let validator: Arc<dyn VariableValidator> =
        Arc::new(EggVariableValidator::new(eggs.clone()));
    let daemon: Arc<dyn DaemonClient> = Arc::new(HttpDaemonClient::new()?);
    let deletion: Arc<dyn ServerDeletion> = Arc::new(ServerDeletionService::new(
        servers.clone(),
        nodes.clone(),
        daemon.clone(),
    ));

    let creation = Arc::new(ServerCreationService::new(
        servers.clone(),
        allocations,
        eggs,
        nodes,
        node_finder,
        allocation_selector,
        validator,
        daemon,
        deletion,
    ));

    // Create application state
    let state = AppState::new(db, servers, creation);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Panel shutdown complete");
    Ok(())
}
