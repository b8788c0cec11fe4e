use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_CACHE_BACKEND: &str = "in-memory";
const DEFAULT_CACHE_NAMESPACE: &str = "marketplace:payment_order";
const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
const DEFAULT_GATEWAY_ENDPOINT: &str = "https://pay.fondy.eu/api/checkout/url/";
const DEFAULT_FULFILLMENT_OFFSET_DAYS: i64 = 3;

/// Payment gateway (signed checkout-url API) settings
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Checkout URL endpoint of the gateway
    #[serde(default = "default_gateway_endpoint")]
    pub endpoint: String,

    /// Merchant identifier issued by the gateway
    #[serde(default)]
    pub merchant_id: String,

    /// Shared merchant password, prepended to the signed value list
    #[serde(default)]
    pub merchant_password: String,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Where the gateway sends the customer after paying
    #[serde(default)]
    pub response_url: String,

    /// Webhook target for payment status callbacks
    #[serde(default)]
    pub server_callback_url: String,

    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gateway_endpoint(),
            merchant_id: String::new(),
            merchant_password: String::new(),
            currency: default_currency(),
            language: default_language(),
            response_url: String::new(),
            server_callback_url: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Pending payment order cache settings
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentCacheConfig {
    /// Backend to use: "in-memory" or "redis"
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// Key prefix for Redis entries
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,

    /// Lifetime of a pending payment entry in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for PaymentCacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            namespace: default_cache_namespace(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderConfig {
    /// Days between checkout and the stamped fulfillment date
    #[serde(default = "default_fulfillment_offset_days")]
    pub fulfillment_offset_days: i64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            fulfillment_offset_days: default_fulfillment_offset_days(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractConfig {
    /// Whether a customer may sign before the supplier has signed
    #[serde(default)]
    pub allow_customer_first_signing: bool,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Redis connection URL (used by the redis payment cache backend)
    pub redis_url: String,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
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

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Deadline applied to a single operation, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub payment_gateway: PaymentGatewayConfig,

    #[serde(default)]
    pub payment_cache: PaymentCacheConfig,

    #[serde(default)]
    pub orders: OrderConfig,

    #[serde(default)]
    pub contracts: ContractConfig,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the connection targets
    pub fn new(database_url: String, redis_url: String, environment: String) -> Self {
        Self {
            database_url,
            redis_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            payment_gateway: PaymentGatewayConfig::default(),
            payment_cache: PaymentCacheConfig::default(),
            orders: OrderConfig::default(),
            contracts: ContractConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn payment_cache_ttl(&self) -> Option<Duration> {
        match self.payment_cache.ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Checks that cannot be expressed as field attributes
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(err) = validate_cache_backend(&self.payment_cache.backend) {
            errors.add("payment_cache", err);
        }

        if self.orders.fulfillment_offset_days < 0 {
            let mut err = ValidationError::new("fulfillment_offset_days");
            err.message = Some("fulfillment_offset_days must not be negative".into());
            errors.add("orders", err);
        }

        if !self.is_development() {
            let gateway = &self.payment_gateway;
            if gateway.merchant_id.trim().is_empty() || gateway.merchant_password.trim().is_empty()
            {
                let mut err = ValidationError::new("payment_gateway");
                err.message = Some(
                    "merchant_id and merchant_password are required outside development".into(),
                );
                errors.add("payment_gateway", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_cache_backend() -> String {
    DEFAULT_CACHE_BACKEND.to_string()
}

fn default_cache_namespace() -> String {
    DEFAULT_CACHE_NAMESPACE.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_gateway_endpoint() -> String {
    DEFAULT_GATEWAY_ENDPOINT.to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_fulfillment_offset_days() -> i64 {
    DEFAULT_FULFILLMENT_OFFSET_DAYS
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_request_timeout_secs() -> u64 {
    30
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

fn validate_cache_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("backend");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("marketplace_api={},marketplace={}", level, level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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
        .set_default("database_url", "sqlite://marketplace.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "redis://127.0.0.1:6379".into(),
            "production".into(),
        )
    }

    #[test]
    fn production_requires_merchant_credentials() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn production_with_credentials_passes() {
        let mut cfg = base_config();
        cfg.payment_gateway.merchant_id = "1396424".into();
        cfg.payment_gateway.merchant_password = "test".into();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn unknown_cache_backend_is_rejected() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.payment_cache.backend = "memcached".into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("payment_cache"));
    }

    #[test]
    fn bad_log_level_fails_validation() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let mut cfg = base_config();
        assert_eq!(cfg.payment_cache_ttl(), Some(Duration::from_secs(86_400)));
        cfg.payment_cache.ttl_secs = 0;
        assert_eq!(cfg.payment_cache_ttl(), None);
    }
}
