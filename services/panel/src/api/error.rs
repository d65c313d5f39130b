//! Problem+json error responses.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::servers::{ConfigurationError, CreationError};

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://roost.sh/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            violations: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            problem: Box::new(ProblemDetails::new(status, code, message)),
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unprocessable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn gateway_timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, code, message)
    }

    pub fn with_violations(mut self, violations: Vec<FieldError>) -> Self {
        self.problem.violations = Some(violations);
        self
    }
}

impl From<CreationError> for ApiError {
    fn from(err: CreationError) -> Self {
        match &err {
            CreationError::Validation(_) => Self::unprocessable("invalid_request", err.to_string()),
            CreationError::Placement(_) => Self::bad_request("no_viable_placement", err.to_string()),
            CreationError::Configuration(ConfigurationError::Invalid(violations)) => {
                let fields = violations
                    .iter()
                    .map(|v| FieldError {
                        field: v.env_variable.clone(),
                        message: v.detail.clone(),
                    })
                    .collect();
                Self::unprocessable("invalid_egg_variables", err.to_string())
                    .with_violations(fields)
            }
            CreationError::Configuration(_) | CreationError::Persistence(_) => {
                Self::internal("storage_failure", "failed to persist server")
            }
            CreationError::Remote(_) => Self::gateway_timeout("daemon_unreachable", err.to_string()),
            CreationError::UuidExhausted(_) => {
                Self::internal("uuid_exhausted", "could not allocate a server identity")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
