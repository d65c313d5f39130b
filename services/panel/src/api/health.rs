//! Health check endpoints.
//!
//! Used by load balancers and orchestration systems to decide whether the
//! panel is healthy and ready to receive traffic.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// Detailed component health (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

/// Component health details.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    /// Database connection status.
    pub database: ComponentStatus,
}

/// Individual component status.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// Status: "ok" or "unavailable".
    pub status: String,

    /// Optional message with details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

/// Basic health check - is the service running?
///
/// Simple liveness probe that returns 200 if the server is up.
/// Does not check dependencies.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "panel".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: None,
    })
}

/// Readiness check - is the service ready to receive traffic?
///
/// Checks that the database is reachable. Returns 503 when it is not.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let db_result = state.db().health_check().await;
    let db_ok = db_result.is_ok();
    let db_message = db_result.err().map(|e| e.to_string());

    let components = ComponentHealth {
        database: ComponentStatus {
            status: if db_ok { "ok" } else { "unavailable" }.to_string(),
            message: db_message,
        },
    };

    let response = HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        service: "panel".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: Some(components),
    };

    if db_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Liveness check for Kubernetes probes. Returns an empty 200.
async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
