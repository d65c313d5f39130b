//! Server API endpoints.
//!
//! Admin-facing endpoints for provisioning and inspecting servers. Creation
//! is synchronous through the full saga: the 201 means the record is
//! committed and the owning daemon accepted the create.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::api::error::ApiError;
use crate::db::Server;
use crate::servers::{CreateServer, Deployment, FeatureLimits, Limits};
use crate::state::AppState;

/// Create server routes: /api/servers
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_server))
        .route("/{uuid}", get(get_server))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to create a new server.
#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    /// Optional external reference id.
    #[serde(default)]
    pub external_id: Option<String>,

    /// Display name.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,

    /// Owning user id.
    pub owner_id: i32,

    /// Explicit target node. Ignored when `deploy` is present.
    #[serde(default)]
    pub node_id: Option<i32>,

    /// Explicit primary allocation. Ignored when `deploy` is present.
    #[serde(default)]
    pub allocation_id: Option<i32>,

    /// Extra allocations to bind beyond the primary.
    #[serde(default)]
    pub additional_allocation_ids: Vec<i32>,

    /// Nest the egg belongs to; derived from the egg when absent.
    #[serde(default)]
    pub nest_id: Option<i32>,

    /// Egg to provision from.
    pub egg_id: i32,

    /// Startup command template.
    pub startup: String,

    /// Container image.
    pub image: String,

    /// Skip the egg's install scripts.
    #[serde(default)]
    pub skip_scripts: bool,

    /// Egg variable values keyed by environment variable name.
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Resource limits.
    pub limits: LimitsRequest,

    /// Dependent resource limits.
    #[serde(default)]
    pub feature_limits: FeatureLimitsRequest,

    /// Automatic placement constraints. Overrides node_id/allocation_id.
    #[serde(default)]
    pub deploy: Option<DeployRequest>,
}

/// Resource limits for a new server.
#[derive(Debug, Deserialize)]
pub struct LimitsRequest {
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: i16,
    pub cpu: i32,
    #[serde(default)]
    pub threads: Option<String>,
    #[serde(default)]
    pub oom_disabled: Option<bool>,
}

/// Dependent resource limits. Absent fields default to zero downstream.
#[derive(Debug, Default, Deserialize)]
pub struct FeatureLimitsRequest {
    #[serde(default)]
    pub databases: Option<i32>,
    #[serde(default)]
    pub allocations: Option<i32>,
    #[serde(default)]
    pub backups: Option<i32>,
}

/// Automatic placement constraints.
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    /// Candidate location ids; empty means any.
    #[serde(default)]
    pub locations: Vec<i32>,

    /// Require an ip with no other assigned allocation.
    #[serde(default)]
    pub dedicated_ip: bool,

    /// Acceptable ports, single ("25565") or ranged ("25565-25570").
    #[serde(default)]
    pub port_range: Vec<String>,
}

/// Response for a single server.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ServerResponse {
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub uuid: String,
    pub uuid_short: String,
    pub node_id: i32,
    pub name: String,
    pub description: String,
    pub suspended: bool,
    pub owner_id: i32,
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: i16,
    pub cpu: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<String>,
    pub oom_disabled: bool,
    pub allocation_id: i32,
    pub nest_id: i32,
    pub egg_id: i32,
    pub startup: String,
    pub image: String,
    pub database_limit: i32,
    pub allocation_limit: i32,
    pub backup_limit: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Server> for ServerResponse {
    fn from(server: Server) -> Self {
        Self {
            id: server.id,
            external_id: server.external_id,
            uuid: server.uuid.full(),
            uuid_short: server.uuid_short,
            node_id: server.node_id,
            name: server.name,
            description: server.description,
            suspended: server.suspended,
            owner_id: server.owner_id,
            memory: server.memory,
            swap: server.swap,
            disk: server.disk,
            io: server.io,
            cpu: server.cpu,
            threads: server.threads,
            oom_disabled: server.oom_disabled,
            allocation_id: server.allocation_id,
            nest_id: server.nest_id,
            egg_id: server.egg_id,
            startup: server.startup,
            image: server.image,
            database_limit: server.database_limit,
            allocation_limit: server.allocation_limit,
            backup_limit: server.backup_limit,
            created_at: server.created_at.to_rfc3339(),
            updated_at: server.updated_at.to_rfc3339(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/servers - provision a new server.
async fn create_server(
    State(state): State<AppState>,
    Json(request): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::unprocessable(
            "invalid_request",
            "name must not be empty",
        ));
    }

    let deployment = request.deploy.map(|deploy| Deployment {
        locations: deploy.locations,
        dedicated: deploy.dedicated_ip,
        ports: deploy.port_range,
    });

    let data = CreateServer {
        external_id: request.external_id,
        name: request.name,
        description: request.description,
        owner_id: request.owner_id,
        node_id: request.node_id,
        allocation_id: request.allocation_id,
        additional_allocation_ids: request.additional_allocation_ids,
        nest_id: request.nest_id,
        egg_id: request.egg_id,
        startup: request.startup,
        image: request.image,
        skip_scripts: request.skip_scripts,
        environment: request.environment,
        limits: Limits {
            memory: request.limits.memory,
            swap: request.limits.swap,
            disk: request.limits.disk,
            io: request.limits.io,
            cpu: request.limits.cpu,
            threads: request.limits.threads,
            oom_disabled: request.limits.oom_disabled,
        },
        feature_limits: FeatureLimits {
            databases: request.feature_limits.databases,
            allocations: request.feature_limits.allocations,
            backups: request.feature_limits.backups,
        },
    };

    let server = state.creation().create(data, deployment).await?;

    Ok((
        StatusCode::CREATED,
        Json(ServerResponse::from(server)),
    ))
}

/// GET /api/servers/{uuid} - fetch a server by its full uuid.
async fn get_server(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let server = state
        .servers()
        .find_by_uuid(&uuid)
        .await
        .map_err(|e| ApiError::internal("storage_failure", e.to_string()))?
        .ok_or_else(|| ApiError::not_found("server_not_found", format!("no server with uuid {uuid}")))?;

    Ok(Json(ServerResponse::from(server)))
}
