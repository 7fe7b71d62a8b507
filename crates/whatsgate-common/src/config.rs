//! Configuration for WhatsGate

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "WHATSGATE_CONFIG";

/// Prefix for environment overrides (`WHATSGATE__API__PORT=9000`)
pub const ENV_PREFIX: &str = "WHATSGATE";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// WhatsApp Cloud API client configuration
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Inbound webhook configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Outbound rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker for outbound calls
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Bulk campaign runner
    #[serde(default)]
    pub campaign: CampaignConfig,

    /// Periodic health checks
    #[serde(default)]
    pub health: HealthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Public base URL, used to build absolute media links
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_url: None,
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// API keys accepted by the REST API
    #[serde(default)]
    pub keys: Vec<ApiKeyConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
            keys: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// A configured API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Human readable name, used in logs
    pub name: String,

    /// Argon2 PHC string or SHA-256 hex digest of the key
    pub key_hash: String,

    /// Granted scopes (`admin`, `messages`, `templates`, `campaigns`, `*`)
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// WhatsApp Cloud API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Graph API base URL
    #[serde(default = "default_graph_url")]
    pub base_url: String,

    /// Graph API version
    #[serde(default = "default_graph_version")]
    pub api_version: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_url(),
            api_version: default_graph_version(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_graph_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_version() -> String {
    "v18.0".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Verify token for the subscription handshake (accounts may add their own)
    pub verify_token: Option<String>,

    /// App secret used to check `X-Hub-Signature-256`; unchecked when unset
    pub app_secret: Option<String>,

    /// Keep a log of every received delivery
    #[serde(default = "default_true")]
    pub log_deliveries: bool,

    /// Days delivery log entries are kept (0 keeps them forever)
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_token: None,
            app_secret: None,
            log_deliveries: true,
            log_retention_days: default_log_retention_days(),
        }
    }
}

fn default_log_retention_days() -> u32 {
    30
}

/// Rate limiter window kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Wall-clock aligned windows, reset on the first call after a boundary
    #[default]
    Fixed,
    /// Rolling window over the admission log
    Sliding,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Calls admitted per window and account
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Window kind
    #[serde(default)]
    pub window: WindowKind,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_calls: default_max_calls(),
            window_ms: default_window_ms(),
            window: WindowKind::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_calls() -> u32 {
    10
}

fn default_window_ms() -> u64 {
    1000
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a probe
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    30
}

/// Campaign runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Concurrent sends per running campaign
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Interval for picking up queued campaigns, in seconds (0 disables)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    10
}

/// Health checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between background checks, in seconds (0 disables)
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Probe the remote API during checks
    #[serde(default = "default_true")]
    pub probe_remote: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            probe_remote: true,
        }
    }
}

fn default_health_interval() -> u64 {
    60
}

impl Config {
    /// Load configuration from file, with `WHATSGATE__*` environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from `WHATSGATE_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/whatsgate/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Check values that serde defaults cannot guard
    pub fn validate(&self) -> crate::Result<()> {
        if self.rate_limit.enabled && (self.rate_limit.max_calls == 0 || self.rate_limit.window_ms == 0) {
            return Err(crate::Error::Config(
                "rate_limit.max_calls and rate_limit.window_ms must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(crate::Error::Config(
                "circuit_breaker.failure_threshold must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.cooldown_secs == 0 {
            return Err(crate::Error::Config(
                "circuit_breaker.cooldown_secs must be positive".to_string(),
            ));
        }
        if self.whatsapp.timeout_secs == 0 {
            return Err(crate::Error::Config(
                "whatsapp.timeout_secs must be positive".to_string(),
            ));
        }
        if self.campaign.concurrency == 0 {
            return Err(crate::Error::Config(
                "campaign.concurrency must be positive".to_string(),
            ));
        }
        if self.database.backend == "postgres" && self.database.url.is_none() {
            return Err(crate::Error::Config(
                "database.url is required for the postgres backend".to_string(),
            ));
        }
        Ok(())
    }
}
