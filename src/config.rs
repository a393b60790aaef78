use std::{env, path::Path};

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use validator::Validate;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Payment gateway connection settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Base URL of the gateway's REST API
    pub base_url: String,

    /// API key sent as a bearer token on every gateway request
    #[serde(default)]
    pub api_key: String,

    /// Hard timeout for gateway requests, in seconds. The create-checkout
    /// call is outside any database transaction, so this bounds checkout
    /// latency, not lock hold time.
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Public base URL of this service, used to build the success/cancel
    /// redirect URLs handed to the gateway
    pub callback_base_url: String,

    /// Shared secret for webhook HMAC verification; unset disables the check
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Accepted clock skew for signed webhook timestamps, in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, test, production)
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    #[validate]
    pub gateway: GatewayConfig,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_gateway_timeout() -> u64 {
    10
}

fn default_webhook_tolerance() -> u64 {
    300
}

impl AppConfig {
    /// Programmatic constructor, mostly for tests.
    pub fn new(
        database_url: String,
        host: String,
        port: u16,
        environment: String,
        gateway: GatewayConfig,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            gateway,
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl GatewayConfig {
    pub fn for_tests(base_url: String) -> Self {
        Self {
            base_url,
            api_key: "test-api-key".to_string(),
            timeout_secs: 2,
            callback_base_url: "http://localhost:8080".to_string(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

/// Layered configuration load: built-in defaults, `config/default`,
/// `config/{RUN_ENV}`, then `APP__`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://learnhub.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("gateway.base_url", "https://gateway.example.com/api")?
        .set_default("gateway.callback_base_url", "http://localhost:8080")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = config.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Install the global tracing subscriber. Safe to call once per process.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("learnhub_api={0},tower_http={0}", log_level)));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
