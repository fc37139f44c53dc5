//! Domain error types with HTTP status code mappings.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// API error response format.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// Domain errors with HTTP status code mappings.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// A timestamp at a trust boundary was not timezone-aware (400).
    #[error("timestamp is not UTC-aware: {0}")]
    BadTime(String),

    /// Schema violation: bad enum value, malformed id, out-of-range field (400).
    #[error("bad input: {0}")]
    BadInput(String),

    /// Single-field validation error (400).
    #[error("validation error: {0}")]
    Validation(String),

    /// Multiple validation errors, e.g. from `validator::Validate` (400).
    #[error("validation failed")]
    ValidationErrors(Vec<String>),

    /// Resource not found (404).
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Unauthorized (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Requested state transition is not in the allowed set (409).
    #[error("transition not allowed: {0}")]
    TransitionNotAllowed(String),

    /// An auxiliary upstream service failed or timed out (502).
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// Unexpected internal error (500). Never surfaced to clients verbatim.
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    /// Storage layer failure (500).
    #[error("database error")]
    Database(String),
}

impl DomainError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DomainError::BadTime(_)
            | DomainError::BadInput(_)
            | DomainError::Validation(_)
            | DomainError::ValidationErrors(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DomainError::TransitionNotAllowed(_) => StatusCode::CONFLICT,
            DomainError::Upstream(_) => StatusCode::BAD_GATEWAY,
            DomainError::Internal(_) | DomainError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Build a `ValidationErrors` variant from `validator` crate output.
    pub fn from_validation_errors(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error
                            .message
                            .as_ref()
                            .unwrap_or(&std::borrow::Cow::Borrowed("validation failed"))
                    )
                })
            })
            .collect();

        if messages.is_empty() {
            DomainError::Validation("invalid input".to_string())
        } else {
            DomainError::ValidationErrors(messages)
        }
    }
}

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if matches!(self, DomainError::Internal(_) | DomainError::Database(_)) {
            tracing::error!(error = %self, "internal error");
        }

        let body = match &self {
            DomainError::ValidationErrors(details) => ErrorResponse {
                error: "validation failed".to_string(),
                details: Some(details.clone()),
            },
            _ => ErrorResponse {
                error: self.to_string(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Database(err.to_string())
    }
}
