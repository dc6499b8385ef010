//! API route handlers
//!
//! - `admin`: token-guarded provisioning of the consent fields
//! - `health`: liveness, readiness and Prometheus metrics
//! - `submit`: form submission and the response composer

pub mod admin;
pub mod health;
pub mod submit;

use crate::error::ServerError;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Service name and version (GET /).
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "leadgate",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/submit",
            "/submit/{route}",
            "/admin/consent-fields",
            "/health",
            "/ready",
            "/metrics"
        ]
    }))
}

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
