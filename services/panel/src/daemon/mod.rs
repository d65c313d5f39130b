//! HTTP client for the per-node provisioning daemon.
//!
//! Each node runs a daemon that materializes servers on that machine. The
//! panel talks to it over a small token-authenticated HTTP API; from the
//! orchestrator's point of view the daemon holds no state the panel trusts,
//! so every call here is fire-and-check rather than reconcile.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::db::{Node, Server};
use crate::servers::ServerConfiguration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from daemon calls.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The daemon could not be reached at all (refused, timed out, TLS).
    #[error("failed to reach daemon: {0}")]
    Connection(#[from] reqwest::Error),

    /// The daemon answered with a non-success status.
    #[error("daemon returned {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

/// Remote calls the orchestrator and deletion service make against a node's
/// daemon. The create call is idempotency-unaware and never retried here.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    async fn create_server(
        &self,
        node: &Node,
        server: &Server,
        configuration: &ServerConfiguration,
    ) -> Result<(), DaemonError>;

    async fn delete_server(&self, node: &Node, server: &Server) -> Result<(), DaemonError>;
}

/// Concrete reqwest-based daemon client.
pub struct HttpDaemonClient {
    http: reqwest::Client,
}

impl HttpDaemonClient {
    pub fn new() -> Result<Self, DaemonError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    fn base_url(node: &Node) -> String {
        format!("{}://{}:{}", node.scheme, node.fqdn, node.daemon_listen)
    }

    async fn check(response: reqwest::Response) -> Result<(), DaemonError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        Err(DaemonError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }
}

#[async_trait]
impl DaemonClient for HttpDaemonClient {
    async fn create_server(
        &self,
        node: &Node,
        server: &Server,
        configuration: &ServerConfiguration,
    ) -> Result<(), DaemonError> {
        debug!(
            node_id = node.id,
            uuid = %server.uuid,
            "Sending create to daemon"
        );

        let response = self
            .http
            .post(format!("{}/api/servers", Self::base_url(node)))
            .bearer_auth(&node.daemon_token)
            .json(configuration)
            .send()
            .await?;

        Self::check(response).await
    }

    async fn delete_server(&self, node: &Node, server: &Server) -> Result<(), DaemonError> {
        debug!(
            node_id = node.id,
            uuid = %server.uuid,
            "Sending delete to daemon"
        );

        let response = self
            .http
            .delete(format!(
                "{}/api/servers/{}",
                Self::base_url(node),
                server.uuid
            ))
            .bearer_auth(&node.daemon_token)
            .send()
            .await?;

        Self::check(response).await
    }
}
