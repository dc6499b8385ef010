use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use leadgate::{default_routes, ConsentConfig, IntakeConfig, PipelineConfig, RouteProfile};
use serde::{Deserialize, Deserializer, Serialize};
use upstream::UpstreamConfig;

use crate::error::{ServerError, ServerResult};

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Origins allowed to submit; `*` admits any.
    #[serde(default, deserialize_with = "origin_list")]
    pub allowed_origins: Vec<String>,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Platform header carrying the client address, consulted before
    /// `X-Forwarded-For`.
    #[serde(default)]
    pub client_ip_header: Option<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Logical key to upstream field id.
    #[serde(default)]
    pub field_overrides: BTreeMap<String, String>,

    #[serde(default)]
    pub consent: ConsentConfig,

    /// Route profiles by name; merged over the built-in ones.
    #[serde(default)]
    pub routes: BTreeMap<String, RouteProfile>,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Administrative endpoints.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Shared secret expected in `X-Admin-Token`; admin calls are refused
    /// while unset.
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_per_window: u64,
    pub store: StoreKind,
    pub redis_url: Option<String>,
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_per_window: 60,
            store: StoreKind::Memory,
            redis_url: None,
            store_timeout_ms: 500,
        }
    }
}

impl RateLimitConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
            allowed_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            client_ip_header: None,
            rate_limit: RateLimitConfig::default(),
            upstream: UpstreamConfig::default(),
            field_overrides: BTreeMap::new(),
            consent: ConsentConfig::default(),
            routes: BTreeMap::new(),
            admin: AdminConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `leadgate.{toml,yaml,json}` and `LEADGATE__*`
    /// style environment variables (`.env` honoured).
    pub fn load() -> anyhow::Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(error = %err, "ignoring unreadable .env file");
            }
        }

        let builder = config::Config::builder()
            .add_source(config::File::with_name("leadgate").required(false))
            .add_source(config::Environment::with_prefix("LEADGATE").separator("__"));

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        if self.rate_limit.window_secs == 0 {
            return Err(ServerError::Config("rate_limit.window_secs must be > 0".into()));
        }
        if self.rate_limit.max_per_window == 0 {
            return Err(ServerError::Config("rate_limit.max_per_window must be > 0".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(ServerError::Config("max_body_bytes must be > 0".into()));
        }
        if self.rate_limit.store == StoreKind::Redis && self.rate_limit.redis_url.is_none() {
            return Err(ServerError::Config(
                "rate_limit.redis_url is required for the redis store".into(),
            ));
        }
        let worst_case = self.upstream.timeout() * 3 + self.rate_limit.store_timeout();
        if self.timeout() <= worst_case {
            return Err(ServerError::Config(format!(
                "timeout_secs must exceed {}ms (three upstream calls plus the counter store)",
                worst_case.as_millis()
            )));
        }
        if !self.upstream.dry_run && !self.upstream.is_configured() {
            return Err(ServerError::Config(
                "upstream.token and upstream.form_id are required unless upstream.dry_run is set"
                    .into(),
            ));
        }
        self.intake()
            .validate()
            .map_err(|err| ServerError::Config(err.to_string()))
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn intake(&self) -> IntakeConfig {
        IntakeConfig {
            max_body_bytes: self.max_body_bytes,
            ..IntakeConfig::default()
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            form_id: self.upstream.form_id.clone(),
            dry_run: self.upstream.dry_run,
            field_overrides: self.field_overrides.clone(),
            consent: self.consent.clone(),
            timeout: self.upstream.timeout(),
        }
    }

    /// Built-in profiles with configured ones layered on top, by name.
    pub fn route_profiles(&self) -> BTreeMap<String, RouteProfile> {
        let mut profiles: BTreeMap<String, RouteProfile> = default_routes()
            .into_iter()
            .map(|profile| (profile.name.clone(), profile))
            .collect();
        for (name, profile) in &self.routes {
            let mut profile = profile.clone();
            profile.name = name.clone();
            profiles.insert(name.clone(), profile);
        }
        profiles
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Accepts a comma-separated string or a list.
fn origin_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let items = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(joined) => joined.split(',').map(str::to_string).collect(),
        OneOrMany::Many(items) => items,
    };
    Ok(items
        .into_iter()
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect())
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    45
}

fn default_max_body_bytes() -> usize {
    100 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}
