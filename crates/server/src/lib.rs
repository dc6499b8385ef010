//! leadgate server - HTTP gateway for website form submissions
//!
//! Accepts lead and questionnaire payloads from a website and forwards them
//! to the CRM, with:
//!
//! - **CORS negotiation**: allowlisted origins only; disallowed origins are
//!   refused before the body is read or any counter is touched
//! - **Rate limiting**: fixed windows per client identity and route, over an
//!   in-process or Redis counter store
//! - **Intake**: byte budget, honeypot, whitelist and typed validation
//! - **Submission**: schema resolution, option normalization, consent
//!   stamping and record creation through [`leadgate::LeadPipeline`]
//! - **Health & Metrics**: liveness/readiness checks and Prometheus metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `POST /submit`, `OPTIONS /submit` - default (`form`) route
//! - `POST /submit/{route}`, `OPTIONS /submit/{route}` - any configured route
//! - `POST /admin/consent-fields` - create missing consent fields upstream
//!   (requires `X-Admin-Token`)
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check
//! - `GET /metrics` - Prometheus metrics

pub mod config;
pub mod context;
pub mod cors;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{AdminConfig, RateLimitConfig, ServerConfig, StoreKind};
pub use cors::CorsPolicy;
pub use error::{ServerError, ServerResult};
pub use middleware::CorrelationId;
pub use ratelimit::{Admission, CounterStore, MemoryCounterStore, RateLimiter, StoreError};
pub use server::{build_router, start_server};
pub use state::ServerState;

#[cfg(feature = "redis")]
pub use ratelimit::RedisCounterStore;
