use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use intake::{FieldErrors, IntakeError};
use serde_json::json;

pub type ServerResult<T> = Result<T, ServerError>;

/// Failures that end a request before it produces a submission outcome.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Origin not allowed")]
    OriginNotAllowed,

    #[error("Payload too large: max {limit} bytes allowed")]
    PayloadTooLarge { limit: usize },

    #[error("Invalid JSON: {0}")]
    MalformedJson(String),

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::OriginNotAllowed => StatusCode::FORBIDDEN,
            ServerError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::MalformedJson(_) => StatusCode::BAD_REQUEST,
            ServerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) | ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::OriginNotAllowed => "ORIGIN_NOT_ALLOWED",
            ServerError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ServerError::MalformedJson(_) => "MALFORMED_JSON",
            ServerError::Validation(_) => "VALIDATION_FAILED",
            ServerError::NotFound => "NOT_FOUND",
            ServerError::Unauthorized => "UNAUTHORIZED",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Timeout => "TIMEOUT",
            ServerError::Upstream(_) => "UPSTREAM_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ServerError::OriginNotAllowed => json!({ "error": "Origin not allowed" }),
            ServerError::PayloadTooLarge { .. } => json!({ "error": "Payload too large" }),
            ServerError::MalformedJson(detail) => json!({
                "error": "Invalid JSON",
                "message": detail,
            }),
            ServerError::Validation(details) => json!({
                "error": "Validation failed",
                "details": details,
            }),
            ServerError::NotFound => json!({ "error": "Not found" }),
            ServerError::Unauthorized => json!({ "error": "Unauthorized" }),
            ServerError::BadRequest(detail) => json!({
                "error": "Bad request",
                "message": detail,
            }),
            ServerError::Timeout => json!({ "error": "Request timeout" }),
            ServerError::Upstream(detail) => json!({
                "error": "Upstream request failed",
                "message": detail,
            }),
            ServerError::Internal(_) | ServerError::Config(_) => {
                tracing::error!(code = self.error_code(), error = %self, "internal error");
                json!({ "error": "Internal Server Error" })
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<IntakeError> for ServerError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::PayloadTooLarge { limit, .. } => ServerError::PayloadTooLarge { limit },
            IntakeError::MalformedJson(detail) => ServerError::MalformedJson(detail),
            IntakeError::Validation(details) => ServerError::Validation(details),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
