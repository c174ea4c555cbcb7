use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use validator::{Validate, ValidationError};

use crate::features::MotorItemsRollout;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://motorshop.db?mode=rwc";
const DEFAULT_NOTIFICATION_MAX_RETRIES: u32 = 3;
const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_NOTIFICATION_IDLE_BACKOFF_MS: u64 = 500;
const DEFAULT_NOTIFICATION_QUEUE_CAPACITY: usize = 1000;

/// Notification delivery bounds.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    /// Delivery attempts per message before giving up.
    pub max_retries: u32,

    /// Per-attempt timeout in seconds.
    pub attempt_timeout_secs: u64,

    /// Worker sleep between empty polls, in milliseconds.
    pub idle_backoff_ms: u64,

    /// Maximum queued messages per topic.
    pub queue_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_NOTIFICATION_MAX_RETRIES,
            attempt_timeout_secs: DEFAULT_NOTIFICATION_TIMEOUT_SECS,
            idle_backoff_ms: DEFAULT_NOTIFICATION_IDLE_BACKOFF_MS,
            queue_capacity: DEFAULT_NOTIFICATION_QUEUE_CAPACITY,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    pub log_json: bool,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Minimum database connections
    pub db_min_connections: u32,

    /// Notification delivery bounds
    #[validate]
    pub notifications: NotificationConfig,

    /// Rollout state of the motor-items intake step
    pub motor_items: MotorItemsRollout,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            environment: DEFAULT_ENV.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            db_max_connections: 10,
            db_min_connections: 1,
            notifications: NotificationConfig::default(),
            motor_items: MotorItemsRollout::default(),
        }
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")),
    }
}

impl AppConfig {
    /// Loads configuration by layering `config/default`, the per-environment
    /// file and `APP_`-prefixed environment variables over built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let config = Config::builder()
            .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
            .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mut app: AppConfig = config.try_deserialize()?;
        if app.environment.is_empty() {
            app.environment = run_env;
        }

        app.validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

        Ok(app)
    }
}
