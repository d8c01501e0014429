use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::PaymentMethod;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_POLL_INTERVAL_SECS: u64 = 60;
/// Smallest amount the gateway accepts, in cents.
pub const GATEWAY_MIN_AMOUNT_CENTS: i64 = 501;

/// Payment gateway client settings
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    #[validate(url)]
    pub base_url: String,

    /// Static secret sent in the `Authorization` header
    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    #[serde(default)]
    pub default_method: PaymentMethod,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.gateway.local/v1".to_string(),
            secret_key: String::new(),
            timeout_secs: default_http_timeout_secs(),
            default_method: PaymentMethod::Pix,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Marketing attribution reporter settings
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AttributionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[validate(url)]
    pub base_url: String,

    #[serde(default)]
    pub api_token: Option<String>,

    /// Marks every reported order as a test order
    #[serde(default)]
    pub is_test: bool,

    #[serde(default = "default_platform")]
    pub platform: String,

    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.attribution.local/api/v1".to_string(),
            api_token: None,
            is_test: false,
            platform: default_platform(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl AttributionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Reconciliation poller schedule
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub interval_secs: u64,

    /// Applied to the interval after a tick where every call failed; 1.0 keeps it fixed
    #[serde(default = "default_backoff_multiplier")]
    #[validate(custom = "validate_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_poll_interval_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub max_interval_secs: u64,

    /// Consecutive failed ticks before a watch gives up; unset polls indefinitely
    #[serde(default)]
    pub max_consecutive_errors: Option<u32>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_interval_secs: default_max_poll_interval_secs(),
            max_consecutive_errors: None,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs.max(self.interval_secs))
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutConfig {
    #[serde(default = "default_min_amount_cents")]
    #[validate(custom = "validate_min_amount_cents")]
    pub min_amount_cents: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            min_amount_cents: default_min_amount_cents(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Root of the public URL the gateway posts back to
    #[validate(url)]
    pub public_base_url: String,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub attribution: AttributionConfig,

    #[serde(default)]
    #[validate]
    pub poller: PollerConfig,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    /// Key expected in the `x-admin-key` header; admin routes are closed when unset
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// HMAC secret for gateway postbacks; postbacks are refused when unset
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    #[serde(default)]
    pub payment_webhook_tolerance_secs: Option<u64>,

    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with every optional section at its default
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            public_base_url: format!("http://127.0.0.1:{}", DEFAULT_PORT),
            gateway: GatewayConfig::default(),
            attribution: AttributionConfig::default(),
            poller: PollerConfig::default(),
            checkout: CheckoutConfig::default(),
            admin_api_key: None,
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// URL handed to the gateway so it can notify us about `order_id`.
    pub fn postback_url(&self) -> String {
        format!(
            "{}/api/v1/payments/postback",
            self.public_base_url.trim_end_matches('/')
        )
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.poller.max_interval_secs < self.poller.interval_secs {
            let mut err = ValidationError::new("poller_max_interval");
            err.message = Some("poller.max_interval_secs must be >= poller.interval_secs".into());
            errors.add("poller", err);
        }

        if self.attribution.enabled
            && self
                .attribution
                .api_token
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
        {
            let mut err = ValidationError::new("attribution_api_token_required");
            err.message = Some(
                "Set APP__ATTRIBUTION__API_TOKEN or disable the reporter with APP__ATTRIBUTION__ENABLED=false".into(),
            );
            errors.add("attribution", err);
        }

        if !self.is_development() && self.gateway.secret_key.trim().is_empty() {
            let mut err = ValidationError::new("gateway_secret_required");
            err.message =
                Some("Set APP__GATEWAY__SECRET_KEY for non-development environments".into());
            errors.add("gateway", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_platform() -> String {
    "storefront".to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_poll_interval_secs() -> u64 {
    DEFAULT_MAX_POLL_INTERVAL_SECS
}

fn default_min_amount_cents() -> i64 {
    GATEWAY_MIN_AMOUNT_CENTS
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_backoff_multiplier(multiplier: f64) -> Result<(), ValidationError> {
    if !multiplier.is_finite() || multiplier < 1.0 || multiplier > 10.0 {
        let mut err = ValidationError::new("backoff_multiplier");
        err.message = Some("backoff_multiplier must be between 1.0 and 10.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_min_amount_cents(amount: i64) -> Result<(), ValidationError> {
    if amount < GATEWAY_MIN_AMOUNT_CENTS {
        let mut err = ValidationError::new("min_amount_cents");
        err.message = Some("min_amount_cents cannot be below the gateway minimum of 501".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration from `./config`
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());

    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("public_base_url", "http://localhost:8080")?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
