//! Wire-level tests for the daemon HTTP client against a mocked daemon.

use std::collections::BTreeMap;

use chrono::Utc;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use roost_id::ServerUuid;
use roost_panel::daemon::{DaemonClient, DaemonError, HttpDaemonClient};
use roost_panel::db::{Node, Server};
use roost_panel::servers::{
    AllocationBinding, AllocationMappings, BuildLimits, Container, EggRef, ServerConfiguration,
};

fn node_for(mock: &MockServer) -> Node {
    let address = mock.address();
    Node {
        id: 5,
        location_id: 1,
        name: "node-5".to_string(),
        fqdn: address.ip().to_string(),
        scheme: "http".to_string(),
        daemon_listen: i32::from(address.port()),
        daemon_token: "s3cr3t".to_string(),
    }
}

fn sample_server() -> Server {
    let uuid = ServerUuid::generate();
    Server {
        id: 1,
        external_id: None,
        uuid,
        uuid_short: uuid.short(),
        node_id: 5,
        name: "alpha".to_string(),
        description: String::new(),
        skip_scripts: false,
        suspended: false,
        owner_id: 2,
        memory: 1024,
        swap: 0,
        disk: 2048,
        io: 500,
        cpu: 0,
        threads: None,
        oom_disabled: true,
        allocation_id: 42,
        nest_id: 3,
        egg_id: 7,
        startup: "./start.sh".to_string(),
        image: "ghcr.io/roost/runtime:java17".to_string(),
        database_limit: 0,
        allocation_limit: 0,
        backup_limit: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn sample_configuration(server: &Server) -> ServerConfiguration {
    ServerConfiguration {
        uuid: server.uuid.full(),
        uuid_short: server.uuid_short.clone(),
        name: server.name.clone(),
        suspended: false,
        invocation: server.startup.clone(),
        skip_egg_scripts: false,
        environment: BTreeMap::new(),
        build: BuildLimits {
            memory_limit: server.memory,
            swap: server.swap,
            io_weight: server.io,
            cpu_limit: server.cpu,
            threads: None,
            disk_space: server.disk,
            oom_disabled: true,
        },
        container: Container {
            image: server.image.clone(),
            requires_rebuild: false,
        },
        allocations: AllocationMappings {
            default: AllocationBinding {
                ip: "10.0.0.4".to_string(),
                port: 25565,
            },
            mappings: BTreeMap::from([("10.0.0.4".to_string(), vec![25565])]),
        },
        egg: EggRef { id: 7, nest_id: 3 },
    }
}

#[tokio::test]
async fn test_create_posts_configuration_with_bearer_token() {
    let mock = MockServer::start().await;
    let server = sample_server();

    Mock::given(method("POST"))
        .and(path("/api/servers"))
        .and(bearer_token("s3cr3t"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;

    let client = HttpDaemonClient::new().expect("client builds");
    client
        .create_server(&node_for(&mock), &server, &sample_configuration(&server))
        .await
        .expect("daemon accepts the create");
}

#[tokio::test]
async fn test_create_surfaces_daemon_rejection() {
    let mock = MockServer::start().await;
    let server = sample_server();

    Mock::given(method("POST"))
        .and(path("/api/servers"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&mock)
        .await;

    let client = HttpDaemonClient::new().expect("client builds");
    let err = client
        .create_server(&node_for(&mock), &server, &sample_configuration(&server))
        .await
        .expect_err("daemon rejects the create");

    match err {
        DaemonError::Rejected { status, detail } => {
            assert_eq!(status, 500);
            assert_eq!(detail, "disk full");
        }
        other => panic!("expected rejection, got: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_daemon_is_a_connection_error() {
    let mock = MockServer::start().await;
    let mut node = node_for(&mock);
    drop(mock);
    // Nothing is listening on the mock's old port anymore.
    node.daemon_listen = 1;

    let server = sample_server();
    let client = HttpDaemonClient::new().expect("client builds");
    let err = client
        .create_server(&node, &server, &sample_configuration(&server))
        .await
        .expect_err("connection should fail");

    assert!(matches!(err, DaemonError::Connection(_)));
}

#[tokio::test]
async fn test_delete_targets_the_server_uuid() {
    let mock = MockServer::start().await;
    let server = sample_server();

    Mock::given(method("DELETE"))
        .and(path(format!("/api/servers/{}", server.uuid)))
        .and(bearer_token("s3cr3t"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;

    let client = HttpDaemonClient::new().expect("client builds");
    client
        .delete_server(&node_for(&mock), &server)
        .await
        .expect("daemon accepts the delete");
}
