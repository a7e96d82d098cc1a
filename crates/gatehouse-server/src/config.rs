use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use gatehouse_auth::config::{CookieConfig, IdentityProviderConfig, JwtConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis configuration (cache store and event bus)
    #[serde(default)]
    pub redis: RedisConfig,
    /// Gateway tables (users, refresh tokens, visits)
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Backend API
    #[serde(default)]
    pub api: BackendApiConfig,
    #[serde(default)]
    pub identity_provider: IdentityProviderConfig,
    /// Feature flag provider
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    /// Origin of the web app, used for permalinks and the registration link
    #[serde(default = "default_webapp_origin")]
    pub webapp_origin: String,
    #[serde(default)]
    pub workers: WorkersConfig,
    /// Mailing-list system
    #[serde(default)]
    pub mailing: MailingConfig,
    /// Targets of the referral redirector
    #[serde(default)]
    pub redirects: RedirectsConfig,
}

fn default_webapp_origin() -> String {
    "http://localhost:5002".into()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Token validation
        if self.jwt.secret.is_empty() {
            return Err("jwt.secret must be set".into());
        }
        // Pool validations
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.redis.min_idle > self.redis.pool_size {
            return Err("redis.min_idle must be <= redis.pool_size".into());
        }
        if self.database.backend == DatabaseBackend::Postgres {
            if self.database.url.is_none() && self.database.host.is_empty() {
                return Err("database requires either 'url' or 'host' to be set".into());
            }
            if self.database.pool_size == 0 {
                return Err("database.pool_size must be > 0".into());
            }
        }
        if self.workers.max_deliveries == 0 {
            return Err("workers.max_deliveries must be > 0".into());
        }
        // Flag provider validation
        if self.flags.timeout_ms == 0 {
            return Err("flags.timeout_ms must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Extra filter directives, e.g. `gatehouse_server::workers=debug`
    #[serde(default)]
    pub directives: Vec<String>,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directives: Vec::new(),
        }
    }
}

/// Redis configuration.
///
/// With `enabled = false` the server keeps its cache in process memory,
/// which is only suitable for a single instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Maximum pooled connections
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Idle connections kept open by the reaper
    #[serde(default = "default_redis_min_idle")]
    pub min_idle: usize,

    /// Connections idle longer than this are closed, down to `min_idle`
    #[serde(default = "default_redis_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_redis_pool_size() -> usize {
    10
}
fn default_redis_min_idle() -> usize {
    2
}
fn default_redis_idle_timeout_secs() -> u64 {
    30
}
fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            min_idle: default_redis_min_idle(),
            idle_timeout_secs: default_redis_idle_timeout_secs(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    /// Process-local tables, for tests and local runs
    Memory,
}

/// Database configuration
///
/// If `url` is set, it takes precedence. Otherwise, a URL is constructed from
/// the separate options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_postgres_host")]
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    #[serde(default = "default_postgres_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_postgres_database")]
    pub database: String,
    #[serde(default = "default_postgres_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_postgres_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_postgres_host() -> String {
    "localhost".into()
}
fn default_postgres_port() -> u16 {
    5432
}
fn default_postgres_user() -> String {
    "postgres".into()
}
fn default_postgres_database() -> String {
    "gateway".into()
}
fn default_postgres_pool_size() -> u32 {
    10
}
fn default_postgres_connect_timeout() -> u64 {
    5000
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }

        let password_part = self
            .password
            .as_ref()
            .map(|p| format!(":{}", p))
            .unwrap_or_default();

        format!(
            "postgres://{}{}@{}:{}/{}",
            self.user, password_part, self.host, self.port, self.database
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            url: None,
            host: default_postgres_host(),
            port: default_postgres_port(),
            user: default_postgres_user(),
            password: None,
            database: default_postgres_database(),
            pool_size: default_postgres_pool_size(),
            connect_timeout_ms: default_postgres_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendApiConfig {
    #[serde(default = "default_api_url")]
    pub url: String,
    /// Sent as `authorization: Service <secret>`
    #[serde(default)]
    pub secret: String,
}

fn default_api_url() -> String {
    "http://localhost:4000".into()
}

impl Default for BackendApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsConfig {
    #[serde(default = "default_flags_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub environment_key: String,
    /// Hard bound on a flag lookup, cache included
    #[serde(default = "default_flags_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_flags_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Key expected on `POST /flagsmith/reset`
    #[serde(default)]
    pub webhook_secret: String,
    /// Reputation at which `submit_article` is unlocked
    #[serde(default = "default_submit_article_threshold")]
    pub submit_article_threshold: i64,
}

fn default_flags_api_url() -> String {
    "https://edge.api.flagsmith.com/api/v1".into()
}
fn default_flags_timeout_ms() -> u64 {
    1000
}
fn default_flags_cache_ttl_secs() -> u64 {
    3600
}
fn default_submit_article_threshold() -> i64 {
    250
}

impl FlagsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            api_url: default_flags_api_url(),
            environment_key: String::new(),
            timeout_ms: default_flags_timeout_ms(),
            cache_ttl_secs: default_flags_cache_ttl_secs(),
            webhook_secret: String::new(),
            submit_article_threshold: default_submit_article_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// In-flight caps keyed by subscription name
    #[serde(default)]
    pub max_in_flight: HashMap<String, usize>,
    #[serde(default = "default_ack_window_ms")]
    pub ack_window_ms: u64,
    /// How long a read blocks waiting for new entries
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// Minimum idle time before a failed entry is delivered again
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
    /// Deliveries after which a failing entry is acknowledged and dropped
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u64,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
}

fn default_ack_window_ms() -> u64 {
    10
}
fn default_block_ms() -> u64 {
    5000
}
fn default_redelivery_delay_ms() -> u64 {
    1000
}
fn default_max_deliveries() -> u64 {
    5
}
fn default_consumer_name() -> String {
    "gatehouse-worker".into()
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_in_flight: HashMap::new(),
            ack_window_ms: default_ack_window_ms(),
            block_ms: default_block_ms(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            max_deliveries: default_max_deliveries(),
            consumer_name: default_consumer_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailingConfig {
    #[serde(default = "default_mailing_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
}

fn default_mailing_api_url() -> String {
    "http://localhost:4100".into()
}

impl Default for MailingConfig {
    fn default() -> Self {
        Self {
            api_url: default_mailing_api_url(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectsConfig {
    /// Landing page, also where crawlers are sent
    pub landing_url: String,
    pub chrome_store_url: String,
    pub firefox_store_url: String,
    pub edge_store_url: String,
}

impl Default for RedirectsConfig {
    fn default() -> Self {
        Self {
            landing_url: "https://daily.dev".into(),
            chrome_store_url: "https://chrome.google.com/webstore/detail/daily-discover-web-techno/jlmpjdjjbgclbocgajdjefcidcncaied".into(),
            firefox_store_url: "https://addons.mozilla.org/en-US/firefox/addon/daily/".into(),
            edge_store_url: "https://microsoftedge.microsoft.com/addons/detail/daily-20-source-for-bu/cbdhgldgiancdheindpekpcbkccpjaeb".into(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("gatehouse.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., GATEHOUSE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("GATEHOUSE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    /// How the configuration path was determined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ConfigSource {
        /// From --config CLI argument
        CliArgument,
        /// From GATEHOUSE_CONFIG environment variable
        EnvironmentVariable,
        /// Default path (gatehouse.toml)
        Default,
    }

    impl std::fmt::Display for ConfigSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::CliArgument => write!(f, "CLI argument (--config)"),
                Self::EnvironmentVariable => write!(f, "environment variable (GATEHOUSE_CONFIG)"),
                Self::Default => write!(f, "default"),
            }
        }
    }

    /// Resolve the configuration file path.
    ///
    /// Priority order:
    /// 1. CLI argument: --config <path>
    /// 2. Environment variable: GATEHOUSE_CONFIG
    /// 3. Default: gatehouse.toml
    pub fn resolve_config_path(
        args: impl IntoIterator<Item = String>,
        env_path: Option<String>,
    ) -> (String, ConfigSource) {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--config" {
                if let Some(path) = args.next() {
                    return (path, ConfigSource::CliArgument);
                }
            }
        }

        if let Some(path) = env_path.filter(|p| !p.is_empty()) {
            return (path, ConfigSource::EnvironmentVariable);
        }

        ("gatehouse.toml".to_string(), ConfigSource::Default)
    }
}
