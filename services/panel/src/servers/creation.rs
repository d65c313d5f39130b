//! The provisioning orchestrator.
//!
//! Creating a server straddles two consistency domains: the local Postgres
//! store, which is ACID, and the per-node daemon, which is only eventually
//! reachable. The sequence is deliberate:
//!
//! 1. resolve placement and linkage (reads only, fail fast)
//! 2. validate egg variables (reads only, fail fast)
//! 3. commit the record, allocation binds, and variable rows in one
//!    transaction
//! 4. tell the daemon to materialize the server
//! 5. if the daemon call fails, force-delete the record (compensation) and
//!    re-raise the daemon's error
//!
//! The local database stays authoritative for "does this server logically
//! exist": a record must never survive a failed daemon create.

use std::collections::HashMap;
use std::sync::Arc;

use roost_id::ServerUuid;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::daemon::{DaemonClient, DaemonError};
use crate::db::{
    Allocation, AllocationStore, DbError, EggStore, NewServer, NodeStore, Server, ServerStore,
    VariableAssignment,
};
use crate::deployment::{AllocationSelector, NodeFinder, PlacementError};
use crate::servers::{
    configuration, ConfigurationError, ServerDeletion, UserLevel, ValidatedVariable,
    VariableValidator,
};

/// Cap on uuid regeneration. A v4 collision is statistically unobservable;
/// hitting this cap means the random source is broken, not that we were
/// unlucky.
pub const MAX_UUID_ATTEMPTS: u32 = 10;

/// Resource limits for a new server.
#[derive(Debug, Clone)]
pub struct Limits {
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: i16,
    pub cpu: i32,
    pub threads: Option<String>,
    /// Defaults to true when absent.
    pub oom_disabled: Option<bool>,
}

/// Limits on dependent resources. All default to zero.
#[derive(Debug, Clone, Default)]
pub struct FeatureLimits {
    pub databases: Option<i32>,
    pub allocations: Option<i32>,
    pub backups: Option<i32>,
}

/// Caller intent for a new server.
///
/// Placement is either explicit (`node_id` + `allocation_id`) or delegated
/// via a [`Deployment`]; when a deployment is supplied, the resolver's result
/// overwrites whatever explicit fields were set.
#[derive(Debug, Clone)]
pub struct CreateServer {
    pub external_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: i32,
    pub node_id: Option<i32>,
    pub allocation_id: Option<i32>,
    pub additional_allocation_ids: Vec<i32>,
    pub nest_id: Option<i32>,
    pub egg_id: i32,
    pub startup: String,
    pub image: String,
    /// Absent and present-but-false are equivalent.
    pub skip_scripts: bool,
    pub environment: HashMap<String, String>,
    pub limits: Limits,
    pub feature_limits: FeatureLimits,
}

/// Constraints for automatic placement.
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Candidate location ids; empty means any location.
    pub locations: Vec<i32>,
    /// Require an ip with no other assigned allocation.
    pub dedicated: bool,
    /// Acceptable ports, single (`"25565"`) or ranged (`"25565-25570"`).
    pub ports: Vec<String>,
}

/// Errors from the creation saga.
#[derive(Debug, Error)]
pub enum CreationError {
    /// The request is missing or referencing linkage data that cannot be
    /// resolved (node, allocation, nest, egg). Raised before any write.
    #[error("invalid server creation request: {0}")]
    Validation(String),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Local store failure. The transaction rolled back; there is nothing to
    /// compensate.
    #[error("failed to persist server: {0}")]
    Persistence(#[from] DbError),

    /// The daemon was unreachable or rejected the create. Compensation has
    /// already run by the time this is returned.
    // Deliberately no #[from]: the daemon call site must run compensation
    // before converting, and `?` would skip it.
    #[error(transparent)]
    Remote(DaemonError),

    /// The uuid retry cap was exhausted.
    #[error("could not generate a unique uuid pair after {0} attempts")]
    UuidExhausted(u32),
}

/// Sequences placement, validation, the transactional create, and the daemon
/// call into a single create-or-fail operation.
pub struct ServerCreationService {
    servers: Arc<dyn ServerStore>,
    allocations: Arc<dyn AllocationStore>,
    eggs: Arc<dyn EggStore>,
    nodes: Arc<dyn NodeStore>,
    node_finder: Arc<dyn NodeFinder>,
    allocation_selector: Arc<dyn AllocationSelector>,
    validator: Arc<dyn VariableValidator>,
    daemon: Arc<dyn DaemonClient>,
    deletion: Arc<dyn ServerDeletion>,
}

impl ServerCreationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        servers: Arc<dyn ServerStore>,
        allocations: Arc<dyn AllocationStore>,
        eggs: Arc<dyn EggStore>,
        nodes: Arc<dyn NodeStore>,
        node_finder: Arc<dyn NodeFinder>,
        allocation_selector: Arc<dyn AllocationSelector>,
        validator: Arc<dyn VariableValidator>,
        daemon: Arc<dyn DaemonClient>,
        deletion: Arc<dyn ServerDeletion>,
    ) -> Self {
        Self {
            servers,
            allocations,
            eggs,
            nodes,
            node_finder,
            allocation_selector,
            validator,
            daemon,
            deletion,
        }
    }

    /// Create a server record and instruct the owning node's daemon to
    /// materialize it.
    ///
    /// Retries, if any, are a caller concern; nothing here is retried except
    /// uuid regeneration on collision.
    #[instrument(
        skip(self, data, deployment),
        fields(name = %data.name, egg_id = data.egg_id)
    )]
    pub async fn create(
        &self,
        mut data: CreateServer,
        deployment: Option<Deployment>,
    ) -> Result<Server, CreationError> {
        // Automatic placement overwrites any explicit node/allocation in the
        // request; the two modes never mix.
        if let Some(deployment) = &deployment {
            let allocation = self.configure_deployment(&data, deployment).await?;
            data.node_id = Some(allocation.node_id);
            data.allocation_id = Some(allocation.id);
        }

        let allocation_id = data.allocation_id.ok_or_else(|| {
            CreationError::Validation(
                "expected a non-empty allocation_id in server creation data".to_string(),
            )
        })?;

        let node_id = match data.node_id {
            Some(id) => id,
            None => self
                .allocations
                .node_id_for(allocation_id)
                .await?
                .ok_or_else(|| {
                    CreationError::Validation(format!("allocation {allocation_id} does not exist"))
                })?,
        };

        let nest_id = match data.nest_id {
            Some(id) => id,
            None => self
                .eggs
                .nest_id_for(data.egg_id)
                .await?
                .ok_or_else(|| {
                    CreationError::Validation(format!("egg {} does not exist", data.egg_id))
                })?,
        };

        let node = self
            .nodes
            .find(node_id)
            .await?
            .ok_or_else(|| CreationError::Validation(format!("node {node_id} does not exist")))?;

        let (primary, additional) = self
            .resolve_allocations(allocation_id, &data.additional_allocation_ids)
            .await?;

        // The creation path is privileged: validate as admin so that
        // otherwise-restricted variables can be set.
        let variables = self
            .validator
            .validate(data.egg_id, &data.environment, UserLevel::Admin)
            .await?;

        let uuid = self.generate_unique_uuid_combo().await?;
        let record = build_record(data, uuid, node_id, allocation_id, nest_id, &variables);
        let server = match self.servers.create_server(record).await {
            Ok(server) => server,
            Err(e) => {
                if e.is_unique_violation() {
                    // Lost the race between the uuid probe and the insert;
                    // the backstop index caught it.
                    warn!(uuid = %uuid, "Unique index rejected a uuid pair that probed free");
                }
                return Err(CreationError::Persistence(e));
            }
        };

        info!(
            uuid = %server.uuid,
            node_id = server.node_id,
            allocation_id = server.allocation_id,
            "Server record committed"
        );

        // The daemon cannot participate in the local transaction, so this
        // runs strictly after commit and owns its own undo.
        let structure = configuration::structure(&server, &primary, &additional, &variables);
        if let Err(remote) = self.daemon.create_server(&node, &server, &structure).await {
            warn!(
                uuid = %server.uuid,
                node_id = node.id,
                error = %remote,
                "Daemon create failed, compensating with forced deletion"
            );

            if let Err(cleanup) = self.deletion.delete(&server, true).await {
                // Compensation is best-effort; the caller gets the daemon's
                // error either way.
                warn!(uuid = %server.uuid, error = %cleanup, "Compensating deletion failed");
            }

            return Err(CreationError::Remote(remote));
        }

        Ok(server)
    }

    /// Resolves automatic placement: viable nodes first, then one free
    /// allocation on them. Either stage failing aborts placement entirely.
    async fn configure_deployment(
        &self,
        data: &CreateServer,
        deployment: &Deployment,
    ) -> Result<Allocation, CreationError> {
        let nodes = self
            .node_finder
            .viable_nodes(&deployment.locations, data.limits.disk, data.limits.memory)
            .await?;

        let allocation = self
            .allocation_selector
            .select(&nodes, &deployment.ports, deployment.dedicated)
            .await?;

        Ok(allocation)
    }

    /// Prefetches the primary and additional allocations so the daemon
    /// payload can be built without re-reading after commit.
    async fn resolve_allocations(
        &self,
        primary_id: i32,
        additional_ids: &[i32],
    ) -> Result<(Allocation, Vec<Allocation>), CreationError> {
        let mut wanted = vec![primary_id];
        wanted.extend(additional_ids);
        wanted.sort_unstable();
        wanted.dedup();

        let fetched = self.allocations.get_many(&wanted).await?;
        if fetched.len() != wanted.len() {
            return Err(CreationError::Validation(
                "one or more requested allocations do not exist".to_string(),
            ));
        }

        let mut primary = None;
        let mut additional = Vec::with_capacity(fetched.len() - 1);
        for allocation in fetched {
            if allocation.id == primary_id {
                primary = Some(allocation);
            } else {
                additional.push(allocation);
            }
        }

        let primary = primary.ok_or_else(|| {
            CreationError::Validation(format!("allocation {primary_id} does not exist"))
        })?;

        Ok((primary, additional))
    }

    /// Generates a uuid pair not yet used by any server. The check covers
    /// both forms because the short form can collide independently of the
    /// full one.
    async fn generate_unique_uuid_combo(&self) -> Result<ServerUuid, CreationError> {
        for _ in 0..MAX_UUID_ATTEMPTS {
            let uuid = ServerUuid::generate();
            if !self
                .servers
                .uuid_combo_exists(&uuid.full(), &uuid.short())
                .await?
            {
                return Ok(uuid);
            }
        }

        Err(CreationError::UuidExhausted(MAX_UUID_ATTEMPTS))
    }
}

/// Maps the canonical request onto the record to insert, applying creation
/// defaults: empty description, suspended=false (store-side), oom kill
/// disabled, zeroed feature limits.
fn build_record(
    data: CreateServer,
    uuid: ServerUuid,
    node_id: i32,
    allocation_id: i32,
    nest_id: i32,
    variables: &[ValidatedVariable],
) -> NewServer {
    NewServer {
        external_id: data.external_id,
        uuid,
        node_id,
        name: data.name,
        description: data.description.unwrap_or_default(),
        skip_scripts: data.skip_scripts,
        owner_id: data.owner_id,
        memory: data.limits.memory,
        swap: data.limits.swap,
        disk: data.limits.disk,
        io: data.limits.io,
        cpu: data.limits.cpu,
        threads: data.limits.threads,
        oom_disabled: data.limits.oom_disabled.unwrap_or(true),
        allocation_id,
        additional_allocation_ids: data.additional_allocation_ids,
        nest_id,
        egg_id: data.egg_id,
        startup: data.startup,
        image: data.image,
        database_limit: data.feature_limits.databases.unwrap_or(0),
        allocation_limit: data.feature_limits.allocations.unwrap_or(0),
        backup_limit: data.feature_limits.backups.unwrap_or(0),
        variables: variables
            .iter()
            .map(|v| VariableAssignment {
                variable_id: v.variable_id,
                value: v.value.clone(),
            })
            .collect(),
    }
}
