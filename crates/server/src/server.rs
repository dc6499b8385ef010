//! Server initialization and routing
//!
//! This module handles the Axum server setup including:
//! - Router configuration with the submission and operational endpoints
//! - Middleware stack (correlation id, logging, deadline, panic capture, CORS)
//! - Graceful shutdown handling

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::cors::negotiate;
use crate::middleware::{admin_auth, correlation_id, deadline, log_requests};
use crate::routes::{admin, api_info, health, not_found, submit};
use crate::state::ServerState;

/// Build the Axum router with all routes and middleware
///
/// Submission routes sit behind CORS negotiation; the operational routes
/// (`/`, `/health`, `/ready`, `/metrics`) do not, and `/admin/*` requires
/// the admin token instead.
///
/// Middleware stack, outermost first:
/// 1. HTTP trace spans
/// 2. Correlation id
/// 3. Request logging
/// 4. CORS negotiation or admin token (per route group)
/// 5. Request deadline (JSON 408)
/// 6. Panic capture
///
/// The deadline and panic capture sit inside CORS so that 408 and 500
/// responses to a browser still carry the CORS headers.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(state.clone(), deadline));

    let admin_routes = Router::new()
        .route("/admin/consent-fields", post(admin::provision_consent))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(state.clone(), deadline))
        .route_layer(from_fn_with_state(state.clone(), admin_auth));

    let submit_routes = Router::new()
        .route(
            "/submit",
            post(submit::submit_default).options(submit::preflight),
        )
        .route(
            "/submit/{route}",
            post(submit::submit_route).options(submit::preflight),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(state.clone(), deadline))
        .route_layer(from_fn_with_state(state.clone(), negotiate));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(submit_routes)
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(log_requests))
        .layer(from_fn(correlation_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal Server Error" })),
    )
        .into_response()
}

/// Start the leadgate HTTP server
///
/// Initializes logging and metrics, connects the counter store and CRM
/// client, then serves until SIGTERM or Ctrl+C.
///
/// # Example
///
/// ```rust,no_run
/// use server::ServerConfig;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig::load()?;
///     server::start_server(config).await?;
///     Ok(())
/// }
/// ```
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .init();

    let mut state = ServerState::from_config(config.clone()).await?;
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(err) => tracing::warn!(error = %err, "metrics recorder not installed"),
    }

    let app = build_router(Arc::new(state));
    let addr: SocketAddr = config.socket_addr()?;

    tracing::info!(%addr, "Starting leadgate server");
    tracing::info!(
        timeout_secs = config.timeout_secs,
        max_body_bytes = config.max_body_bytes,
        "Request limits"
    );
    tracing::info!(
        window_secs = config.rate_limit.window_secs,
        max_per_window = config.rate_limit.max_per_window,
        store = ?config.rate_limit.store,
        "Rate limit"
    );
    tracing::info!(
        origins = ?config.allowed_origins,
        dry_run = config.upstream.dry_run,
        "CORS and upstream"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
