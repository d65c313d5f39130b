//! End-to-end tests for the server creation saga, driven over in-memory
//! stores and a recording daemon so every branch of the sequence is
//! observable: placement, validation, the committed record, and the
//! compensating deletion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use roost_panel::daemon::{DaemonClient, DaemonError};
use roost_panel::db::{
    Allocation, AllocationStore, DbError, EggStore, EggVariable, NewServer, Node, NodeStore,
    Server, ServerStore,
};
use roost_panel::deployment::{AllocationSelector, NodeFinder, PlacementError};
use roost_panel::servers::{
    CreateServer, CreationError, Deployment, DeletionError, EggVariableValidator, FeatureLimits,
    Limits, ServerConfiguration, ServerCreationService, ServerDeletion, ServerDeletionService,
    MAX_UUID_ATTEMPTS,
};

// =============================================================================
// In-memory collaborators
// =============================================================================

/// Server store over a Vec, with an injectable number of uuid collisions.
#[derive(Default)]
struct InMemoryServers {
    records: Mutex<Vec<Server>>,
    /// How many uuid probes should report a collision before succeeding.
    collisions_remaining: AtomicU32,
    uuid_probes: AtomicU32,
}

impl InMemoryServers {
    fn with_collisions(n: u32) -> Self {
        let store = Self::default();
        store.collisions_remaining.store(n, Ordering::SeqCst);
        store
    }

    fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn first(&self) -> Option<Server> {
        self.records.lock().unwrap().first().cloned()
    }
}

#[async_trait]
impl ServerStore for InMemoryServers {
    async fn uuid_combo_exists(&self, _uuid: &str, _uuid_short: &str) -> Result<bool, DbError> {
        self.uuid_probes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.collisions_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.collisions_remaining.store(remaining - 1, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(false)
    }

    async fn create_server(&self, server: NewServer) -> Result<Server, DbError> {
        let mut records = self.records.lock().unwrap();
        let record = Server {
            id: records.len() as i32 + 1,
            external_id: server.external_id,
            uuid: server.uuid,
            uuid_short: server.uuid.short(),
            node_id: server.node_id,
            name: server.name,
            description: server.description,
            skip_scripts: server.skip_scripts,
            suspended: false,
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Server>, DbError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.uuid.full() == uuid)
            .cloned())
    }

    async fn delete_server(&self, server_id: i32) -> Result<(), DbError> {
        self.records.lock().unwrap().retain(|s| s.id != server_id);
        Ok(())
    }
}

struct StaticAllocations {
    by_id: HashMap<i32, Allocation>,
}

impl StaticAllocations {
    fn new(allocations: Vec<Allocation>) -> Self {
        Self {
            by_id: allocations.into_iter().map(|a| (a.id, a)).collect(),
        }
    }
}

#[async_trait]
impl AllocationStore for StaticAllocations {
    async fn node_id_for(&self, allocation_id: i32) -> Result<Option<i32>, DbError> {
        Ok(self.by_id.get(&allocation_id).map(|a| a.node_id))
    }

    async fn get_many(&self, allocation_ids: &[i32]) -> Result<Vec<Allocation>, DbError> {
        Ok(allocation_ids
            .iter()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect())
    }
}

struct StaticEggs {
    nests: HashMap<i32, i32>,
    variables: HashMap<i32, Vec<EggVariable>>,
}

#[async_trait]
impl EggStore for StaticEggs {
    async fn nest_id_for(&self, egg_id: i32) -> Result<Option<i32>, DbError> {
        Ok(self.nests.get(&egg_id).copied())
    }

    async fn variables_for(&self, egg_id: i32) -> Result<Vec<EggVariable>, DbError> {
        Ok(self.variables.get(&egg_id).cloned().unwrap_or_default())
    }
}

struct StaticNodes {
    by_id: HashMap<i32, Node>,
}

#[async_trait]
impl NodeStore for StaticNodes {
    async fn find(&self, node_id: i32) -> Result<Option<Node>, DbError> {
        Ok(self.by_id.get(&node_id).cloned())
    }
}

/// Node finder that records its arguments and returns a fixed candidate set.
#[derive(Default)]
struct StubFinder {
    candidates: Vec<i32>,
    seen: Mutex<Option<(Vec<i32>, i64, i64)>>,
}

#[async_trait]
impl NodeFinder for StubFinder {
    async fn viable_nodes(
        &self,
        locations: &[i32],
        disk: i64,
        memory: i64,
    ) -> Result<Vec<i32>, PlacementError> {
        *self.seen.lock().unwrap() = Some((locations.to_vec(), disk, memory));
        if self.candidates.is_empty() {
            return Err(PlacementError::NoViableNode);
        }
        Ok(self.candidates.clone())
    }
}

/// Allocation selector returning a fixed pick.
struct StubSelector {
    pick: Option<Allocation>,
}

#[async_trait]
impl AllocationSelector for StubSelector {
    async fn select(
        &self,
        _nodes: &[i32],
        _ports: &[String],
        _dedicated: bool,
    ) -> Result<Allocation, PlacementError> {
        self.pick
            .clone()
            .ok_or(PlacementError::NoViableAllocation)
    }
}

/// Daemon that records every call and fails on demand.
#[derive(Default)]
struct RecordingDaemon {
    fail_create: bool,
    fail_delete: bool,
    calls: Mutex<Vec<String>>,
    last_configuration: Mutex<Option<ServerConfiguration>>,
}

impl RecordingDaemon {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DaemonClient for RecordingDaemon {
    async fn create_server(
        &self,
        _node: &Node,
        server: &Server,
        configuration: &ServerConfiguration,
    ) -> Result<(), DaemonError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {}", server.uuid_short));
        *self.last_configuration.lock().unwrap() = Some(configuration.clone());
        if self.fail_create {
            return Err(DaemonError::Rejected {
                status: 500,
                detail: "disk full".to_string(),
            });
        }
        Ok(())
    }

    async fn delete_server(&self, _node: &Node, server: &Server) -> Result<(), DaemonError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {}", server.uuid_short));
        if self.fail_delete {
            return Err(DaemonError::Rejected {
                status: 500,
                detail: "not found".to_string(),
            });
        }
        Ok(())
    }
}

/// Deletion stub whose database half always fails.
struct BrokenDeletion;

#[async_trait]
impl ServerDeletion for BrokenDeletion {
    async fn delete(&self, _server: &Server, _force: bool) -> Result<(), DeletionError> {
        Err(DeletionError::Database(DbError::AllocationsUnavailable {
            requested: 1,
            bound: 0,
        }))
    }
}

// =============================================================================
// Harness
// =============================================================================

fn allocation(id: i32, node_id: i32, ip: &str, port: i32) -> Allocation {
    Allocation {
        id,
        node_id,
        ip: ip.to_string(),
        port,
        alias: None,
        server_id: None,
    }
}

fn node(id: i32) -> Node {
    Node {
        id,
        location_id: 1,
        name: format!("node-{id}"),
        fqdn: format!("node-{id}.example.test"),
        scheme: "http".to_string(),
        daemon_listen: 8080,
        daemon_token: "token".to_string(),
    }
}

fn variable(id: i32, egg_id: i32, env: &str, default: &str, rules: &str) -> EggVariable {
    EggVariable {
        id,
        egg_id,
        name: env.to_string(),
        env_variable: env.to_string(),
        default_value: default.to_string(),
        user_viewable: true,
        user_editable: true,
        rules: rules.to_string(),
    }
}

struct Harness {
    servers: Arc<InMemoryServers>,
    daemon: Arc<RecordingDaemon>,
    finder: Arc<StubFinder>,
    service: ServerCreationService,
}

impl Harness {
    fn build(
        servers: InMemoryServers,
        daemon: RecordingDaemon,
        finder: StubFinder,
        selector: StubSelector,
        egg_variables: Vec<EggVariable>,
    ) -> Self {
        let servers = Arc::new(servers);
        let daemon = Arc::new(daemon);
        let finder = Arc::new(finder);

        let allocations = Arc::new(StaticAllocations::new(vec![
            allocation(42, 5, "10.0.0.4", 25565),
            allocation(43, 5, "10.0.0.4", 25566),
        ]));
        let eggs = Arc::new(StaticEggs {
            nests: HashMap::from([(7, 3)]),
            variables: HashMap::from([(7, egg_variables)]),
        });
        let nodes = Arc::new(StaticNodes {
            by_id: HashMap::from([(5, node(5))]),
        });
        let validator = Arc::new(EggVariableValidator::new(eggs.clone()));
        let deletion = Arc::new(ServerDeletionService::new(
            servers.clone(),
            nodes.clone(),
            daemon.clone(),
        ));

        let service = ServerCreationService::new(
            servers.clone(),
            allocations,
            eggs,
            nodes,
            finder.clone(),
            Arc::new(selector),
            validator,
            daemon.clone(),
            deletion,
        );

        Self {
            servers,
            daemon,
            finder,
            service,
        }
    }

    fn default() -> Self {
        Self::build(
            InMemoryServers::default(),
            RecordingDaemon::default(),
            StubFinder::default(),
            StubSelector { pick: None },
            Vec::new(),
        )
    }
}

fn request() -> CreateServer {
    CreateServer {
        external_id: None,
        name: "alpha".to_string(),
        description: None,
        owner_id: 2,
        node_id: None,
        allocation_id: Some(42),
        additional_allocation_ids: Vec::new(),
        nest_id: None,
        egg_id: 7,
        startup: "./start.sh".to_string(),
        image: "ghcr.io/roost/runtime:java17".to_string(),
        skip_scripts: false,
        environment: HashMap::new(),
        limits: Limits {
            memory: 1024,
            swap: 0,
            disk: 2048,
            io: 500,
            cpu: 0,
            threads: None,
            oom_disabled: None,
        },
        feature_limits: FeatureLimits::default(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_explicit_placement_resolves_linkage_and_applies_defaults() {
    let harness = Harness::default();

    let server = harness
        .service
        .create(request(), None)
        .await
        .expect("creation should succeed");

    // node and nest were derived, never supplied
    assert_eq!(server.node_id, 5);
    assert_eq!(server.nest_id, 3);
    assert_eq!(server.allocation_id, 42);

    // creation defaults
    assert_eq!(server.description, "");
    assert!(!server.suspended);
    assert!(server.oom_disabled);
    assert_eq!(server.database_limit, 0);
    assert_eq!(server.allocation_limit, 0);
    assert_eq!(server.backup_limit, 0);

    assert_eq!(harness.servers.count(), 1);
    assert_eq!(
        harness.daemon.calls(),
        vec![format!("create {}", server.uuid_short)]
    );

    let config = harness
        .daemon
        .last_configuration
        .lock()
        .unwrap()
        .clone()
        .expect("daemon received a configuration");
    assert_eq!(config.environment["SERVER_IP"], "10.0.0.4");
    assert_eq!(config.environment["SERVER_PORT"], "25565");
    assert_eq!(config.environment["SERVER_MEMORY"], "1024");
    assert_eq!(config.allocations.default.port, 25565);
}

#[tokio::test]
async fn test_deployment_overrides_explicit_placement() {
    let harness = Harness::build(
        InMemoryServers::default(),
        RecordingDaemon::default(),
        StubFinder {
            candidates: vec![5],
            seen: Mutex::new(None),
        },
        StubSelector {
            pick: Some(allocation(42, 5, "10.0.0.4", 25565)),
        },
        Vec::new(),
    );

    let mut data = request();
    // Explicit placement that the deployment must override.
    data.node_id = Some(99);
    data.allocation_id = Some(999);

    let deployment = Deployment {
        locations: vec![1, 2],
        dedicated: false,
        ports: vec!["25565".to_string()],
    };

    let server = harness
        .service
        .create(data, Some(deployment))
        .await
        .expect("creation should succeed");

    assert_eq!(server.node_id, 5);
    assert_eq!(server.allocation_id, 42);

    // The finder saw the deployment constraints and the requested size.
    let seen = harness.finder.seen.lock().unwrap().clone();
    assert_eq!(seen, Some((vec![1, 2], 2048, 1024)));
}

#[tokio::test]
async fn test_no_viable_node_aborts_before_any_write() {
    let harness = Harness::default();

    let deployment = Deployment {
        locations: vec![1],
        dedicated: false,
        ports: Vec::new(),
    };

    let err = harness
        .service
        .create(request(), Some(deployment))
        .await
        .expect_err("placement should fail");

    assert!(matches!(
        err,
        CreationError::Placement(PlacementError::NoViableNode)
    ));
    assert_eq!(harness.servers.count(), 0);
    assert!(harness.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_missing_allocation_id_is_rejected() {
    let harness = Harness::default();

    let mut data = request();
    data.allocation_id = None;

    let err = harness
        .service
        .create(data, None)
        .await
        .expect_err("creation should fail");

    match err {
        CreationError::Validation(message) => {
            assert!(message.contains("allocation_id"), "got: {message}");
        }
        other => panic!("expected validation error, got: {other}"),
    }
    assert_eq!(harness.servers.count(), 0);
    assert!(harness.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_egg_is_rejected() {
    let harness = Harness::default();

    let mut data = request();
    data.egg_id = 404;

    let err = harness
        .service
        .create(data, None)
        .await
        .expect_err("creation should fail");

    assert!(matches!(err, CreationError::Validation(_)));
    assert_eq!(harness.servers.count(), 0);
}

#[tokio::test]
async fn test_unknown_additional_allocation_is_rejected() {
    let harness = Harness::default();

    let mut data = request();
    data.additional_allocation_ids = vec![43, 500];

    let err = harness
        .service
        .create(data, None)
        .await
        .expect_err("creation should fail");

    assert!(matches!(err, CreationError::Validation(_)));
    assert_eq!(harness.servers.count(), 0);
}

#[tokio::test]
async fn test_daemon_failure_triggers_compensating_deletion() {
    let harness = Harness::build(
        InMemoryServers::default(),
        RecordingDaemon {
            fail_create: true,
            ..Default::default()
        },
        StubFinder::default(),
        StubSelector { pick: None },
        Vec::new(),
    );

    let err = harness
        .service
        .create(request(), None)
        .await
        .expect_err("creation should fail");

    // The caller sees the daemon's error, not the compensation's outcome.
    assert!(matches!(
        err,
        CreationError::Remote(DaemonError::Rejected { status: 500, .. })
    ));

    // The record was committed and then removed again.
    assert_eq!(harness.servers.count(), 0);

    let calls = harness.daemon.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("create "));
    assert!(calls[1].starts_with("delete "));
}

#[tokio::test]
async fn test_forced_compensation_swallows_daemon_delete_failure() {
    let harness = Harness::build(
        InMemoryServers::default(),
        RecordingDaemon {
            fail_create: true,
            fail_delete: true,
            ..Default::default()
        },
        StubFinder::default(),
        StubSelector { pick: None },
        Vec::new(),
    );

    let err = harness
        .service
        .create(request(), None)
        .await
        .expect_err("creation should fail");

    assert!(matches!(err, CreationError::Remote(_)));
    // Forced deletion ignores the daemon's delete failure and removes the
    // record anyway.
    assert_eq!(harness.servers.count(), 0);
}

#[tokio::test]
async fn test_failed_compensation_still_returns_daemon_error() {
    let servers = Arc::new(InMemoryServers::default());
    let daemon = Arc::new(RecordingDaemon {
        fail_create: true,
        ..Default::default()
    });
    let allocations = Arc::new(StaticAllocations::new(vec![allocation(
        42, 5, "10.0.0.4", 25565,
    )]));
    let eggs = Arc::new(StaticEggs {
        nests: HashMap::from([(7, 3)]),
        variables: HashMap::new(),
    });
    let nodes = Arc::new(StaticNodes {
        by_id: HashMap::from([(5, node(5))]),
    });
    let validator = Arc::new(EggVariableValidator::new(eggs.clone()));

    let service = ServerCreationService::new(
        servers.clone(),
        allocations,
        eggs,
        nodes,
        Arc::new(StubFinder::default()),
        Arc::new(StubSelector { pick: None }),
        validator,
        daemon,
        Arc::new(BrokenDeletion),
    );

    let err = service
        .create(request(), None)
        .await
        .expect_err("creation should fail");

    // Even when compensation itself fails, the original daemon error wins.
    assert!(matches!(err, CreationError::Remote(_)));
    // The orphaned record survives; compensation failure is only logged.
    assert_eq!(servers.count(), 1);
}

#[tokio::test]
async fn test_uuid_collisions_are_retried() {
    let harness = Harness::build(
        InMemoryServers::with_collisions(3),
        RecordingDaemon::default(),
        StubFinder::default(),
        StubSelector { pick: None },
        Vec::new(),
    );

    harness
        .service
        .create(request(), None)
        .await
        .expect("creation should succeed after retries");

    assert_eq!(harness.servers.uuid_probes.load(Ordering::SeqCst), 4);
    assert_eq!(harness.servers.count(), 1);
}

#[tokio::test]
async fn test_uuid_exhaustion_fails_without_writes() {
    let harness = Harness::build(
        InMemoryServers::with_collisions(u32::MAX),
        RecordingDaemon::default(),
        StubFinder::default(),
        StubSelector { pick: None },
        Vec::new(),
    );

    let err = harness
        .service
        .create(request(), None)
        .await
        .expect_err("creation should fail");

    assert!(matches!(
        err,
        CreationError::UuidExhausted(n) if n == MAX_UUID_ATTEMPTS
    ));
    assert_eq!(
        harness.servers.uuid_probes.load(Ordering::SeqCst),
        MAX_UUID_ATTEMPTS
    );
    assert_eq!(harness.servers.count(), 0);
    assert!(harness.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_variable_value_blocks_creation() {
    let harness = Harness::build(
        InMemoryServers::default(),
        RecordingDaemon::default(),
        StubFinder::default(),
        StubSelector { pick: None },
        vec![variable(9, 7, "SERVER_PORT_COUNT", "1", "required|integer")],
    );

    let mut data = request();
    data.environment
        .insert("SERVER_PORT_COUNT".to_string(), "many".to_string());

    let err = harness
        .service
        .create(data, None)
        .await
        .expect_err("creation should fail");

    assert!(matches!(err, CreationError::Configuration(_)));
    assert_eq!(harness.servers.count(), 0);
    assert!(harness.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_variable_defaults_flow_into_daemon_environment() {
    let harness = Harness::build(
        InMemoryServers::default(),
        RecordingDaemon::default(),
        StubFinder::default(),
        StubSelector { pick: None },
        vec![variable(9, 7, "SERVER_JARFILE", "server.jar", "required|string")],
    );

    harness
        .service
        .create(request(), None)
        .await
        .expect("creation should succeed");

    let config = harness
        .daemon
        .last_configuration
        .lock()
        .unwrap()
        .clone()
        .expect("daemon received a configuration");
    assert_eq!(config.environment["SERVER_JARFILE"], "server.jar");
}
