use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const CONFIG_DIR: &str = "config";

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// ISO currency code used for orders and payment sessions
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Payment provider API base URL (overridable for tests)
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Payment provider secret API key
    #[serde(default)]
    pub gateway_secret_key: String,

    /// Bound on outbound payment provider calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Shared secret for inbound webhook signature verification
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Accepted clock skew for webhook timestamps (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// Redirect target after a successful hosted payment
    #[serde(default = "default_success_url")]
    pub checkout_success_url: String,

    /// Redirect target when the shopper abandons the hosted payment.
    /// `{ORDER_ID}` is substituted with the order id.
    #[serde(default = "default_cancel_url")]
    pub checkout_cancel_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_gateway_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_success_url() -> String {
    "http://localhost:3000/checkout/success".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/checkout/cancel?order_id={ORDER_ID}".to_string()
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__*` environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{}.toml", run_env));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let cfg: AppConfig = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the tracing subscriber. Idempotent so tests can call it
/// repeatedly.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    // try_init fails when a subscriber is already installed (e.g. by
    // another test); that is fine.
    let _ = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
}
