use std::collections::BTreeMap;
use std::sync::Arc;

use leadgate::{CrmClient, GraphqlCrmClient, IntakeConfig, LeadPipeline, RouteProfile};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::{ServerConfig, StoreKind};
use crate::cors::CorsPolicy;
use crate::error::{ServerError, ServerResult};
use crate::ratelimit::{CounterStore, MemoryCounterStore, RateLimiter};

/// Shared application state
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    pub cors: CorsPolicy,
    pub limiter: RateLimiter,
    pub intake: IntakeConfig,
    pub routes: BTreeMap<String, RouteProfile>,
    pub pipeline: LeadPipeline,
    /// CRM client for administrative calls; `None` in dry runs.
    pub crm: Option<Arc<dyn CrmClient>>,
    /// Present when a Prometheus recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Assemble state from explicit collaborators. `client` may be `None`
    /// only for dry runs.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn CounterStore>,
        client: Option<Arc<dyn CrmClient>>,
    ) -> Self {
        let limiter = RateLimiter::new(
            store,
            config.rate_limit.window_secs,
            config.rate_limit.max_per_window,
            config.rate_limit.store_timeout(),
        );
        let pipeline = match client.clone() {
            Some(client) => LeadPipeline::new(client, config.pipeline()),
            None => LeadPipeline::dry_run(config.pipeline()),
        };

        Self {
            cors: CorsPolicy::new(&config.allowed_origins),
            intake: config.intake(),
            routes: config.route_profiles(),
            limiter,
            pipeline,
            crm: client,
            metrics: None,
            config: Arc::new(config),
        }
    }

    /// Build the counter store and CRM client the configuration names.
    pub async fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let store: Arc<dyn CounterStore> = match config.rate_limit.store {
            StoreKind::Memory => Arc::new(MemoryCounterStore::new()),
            StoreKind::Redis => redis_store(&config).await?,
        };

        let client: Option<Arc<dyn CrmClient>> = if config.upstream.is_configured() {
            let client = GraphqlCrmClient::new(&config.upstream)
                .map_err(|err| ServerError::Config(err.to_string()))?;
            Some(Arc::new(client))
        } else {
            None
        };

        Ok(Self::new(config, store, client))
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn route(&self, name: &str) -> Option<&RouteProfile> {
        self.routes.get(name)
    }
}

#[cfg(feature = "redis")]
async fn redis_store(config: &ServerConfig) -> ServerResult<Arc<dyn CounterStore>> {
    let url = config
        .rate_limit
        .redis_url
        .as_deref()
        .ok_or_else(|| ServerError::Config("rate_limit.redis_url is not set".into()))?;
    let store = crate::ratelimit::RedisCounterStore::connect(url)
        .await
        .map_err(|err| ServerError::Config(err.to_string()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn redis_store(_config: &ServerConfig) -> ServerResult<Arc<dyn CounterStore>> {
    Err(ServerError::Config(
        "rate_limit.store = \"redis\" needs the `redis` feature".into(),
    ))
}
