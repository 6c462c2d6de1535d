//! Configuration for canon-daemon

use canon_ledger::LedgerConfig;
use canon_optr::{OptrBounds, OptrWeights, DEFAULT_WEIGHTS};
use canon_service::config::default_required_canon;
use canon_service::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable ledger archive
    #[serde(default)]
    pub storage: StorageConfig,

    /// Fast store namespacing and retention
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Decision pipeline tuning
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory archive (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL archive
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Leading segment of every fast-store key
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,

    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,

    #[serde(default = "default_retention_ttl")]
    pub ledger_ttl_secs: u64,

    #[serde(default = "default_retention_ttl")]
    pub denial_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_cache_prefix(),
            idempotency_ttl_secs: default_idempotency_ttl(),
            ledger_ttl_secs: default_retention_ttl(),
            denial_ttl_secs: default_retention_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Trust `X-Tenant-Id` as given
    #[default]
    None,
    /// HS256 bearer tokens carrying the tenant claim
    Jwt,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    /// HS256 shared secret, required in jwt mode
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,
}

/// Fixed-window request budget per tenant. `max_requests = 0` disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_window(),
            max_requests: default_max_requests(),
        }
    }
}

/// OPTR weights and bounds, required canon per action class, and store bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_lambda_c")]
    pub lambda_c: f64,

    #[serde(default = "default_lambda_r")]
    pub lambda_r: f64,

    #[serde(default = "default_lambda_p")]
    pub lambda_p: f64,

    #[serde(default)]
    pub max_risk: Option<f64>,

    #[serde(default)]
    pub max_cost: Option<f64>,

    #[serde(default)]
    pub min_success_prob: Option<f64>,

    /// Canon ids every action of a class must cite
    #[serde(default = "default_required_canon")]
    pub required_canon: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default = "default_max_append_attempts")]
    pub max_append_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lambda_c: DEFAULT_WEIGHTS.lambda_c,
            lambda_r: DEFAULT_WEIGHTS.lambda_r,
            lambda_p: DEFAULT_WEIGHTS.lambda_p,
            max_risk: None,
            max_cost: None,
            min_success_prob: None,
            required_canon: default_required_canon(),
            store_timeout_ms: default_store_timeout_ms(),
            max_append_attempts: default_max_append_attempts(),
        }
    }
}

/// Background fast/durable reconciliation. `interval_secs = 0` disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_cache_prefix() -> String {
    "canon".to_string()
}

fn default_idempotency_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_retention_ttl() -> u64 {
    30 * 24 * 60 * 60
}

fn default_rate_window() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    600
}

fn default_lambda_c() -> f64 {
    DEFAULT_WEIGHTS.lambda_c
}

fn default_lambda_r() -> f64 {
    DEFAULT_WEIGHTS.lambda_r
}

fn default_lambda_p() -> f64 {
    DEFAULT_WEIGHTS.lambda_p
}

fn default_store_timeout_ms() -> u64 {
    2000
}

fn default_max_append_attempts() -> u32 {
    8
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Layer defaults, an optional file, then `CANON_*` environment
    /// variables (`__` between nested keys, e.g. `CANON_AUTH__MODE=jwt`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CANON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Reject settings that cannot run.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth.mode == AuthMode::Jwt
            && self.auth.secret.as_deref().map_or(true, str::is_empty)
        {
            return Err("auth.mode = jwt requires auth.secret".to_string());
        }
        if self.rate_limit.max_requests > 0 && self.rate_limit.window_secs == 0 {
            return Err("rate_limit.window_secs must be positive".to_string());
        }
        if self.engine.max_append_attempts == 0 {
            return Err("engine.max_append_attempts must be positive".to_string());
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        EngineConfig {
            weights: OptrWeights {
                lambda_c: e.lambda_c,
                lambda_r: e.lambda_r,
                lambda_p: e.lambda_p,
            },
            bounds: OptrBounds {
                max_risk: e.max_risk,
                max_cost: e.max_cost,
                min_success_prob: e.min_success_prob,
            },
            // Config sources may lowercase map keys; action classes are upper case.
            required_canon: e
                .required_canon
                .iter()
                .map(|(class, ids)| (class.to_uppercase(), ids.clone()))
                .collect(),
            store_timeout: Duration::from_millis(e.store_timeout_ms),
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            key_prefix: self.cache.prefix.clone(),
            ledger_ttl: Duration::from_secs(self.cache.ledger_ttl_secs),
            denial_ttl: Duration::from_secs(self.cache.denial_ttl_secs),
            store_timeout: Duration::from_millis(self.engine.store_timeout_ms),
            max_append_attempts: self.engine.max_append_attempts,
        }
    }
}
