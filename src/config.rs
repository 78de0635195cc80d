use crate::error::{AppError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub dedup: DedupSettings,
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub redis: Option<RedisSettings>,
    #[serde(default)]
    pub dynamodb: DynamoDbSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    pub application: ApplicationSettings,
}

/// Which engine backs the dedup table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    DynamoDb,
    Postgres,
    Redis,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::DynamoDb => "dynamodb",
            StoreBackend::Postgres => "postgres",
            StoreBackend::Redis => "redis",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DedupSettings {
    #[validate(custom = "validate_table_name")]
    pub table_name: String,
    /// The store is provisioned only when a notification destination exists.
    pub destination_configured: bool,
    #[serde(default)]
    pub backend: StoreBackend,
    #[validate(range(min = 1))]
    pub suppression_window_secs: i64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Successful marks between sweeps of expired records.
    #[serde(default = "default_purge_interval")]
    #[validate(range(min = 1))]
    pub purge_interval: u64,
}

fn default_purge_interval() -> u64 {
    crate::dedup::handler::DEFAULT_PURGE_INTERVAL
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DynamoDbSettings {
    pub region: Option<String>,
    /// Override for local DynamoDB endpoints.
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            timeout_ms: 2_000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn validate_table_name(name: &str) -> std::result::Result<(), ValidationError> {
    let valid_len = (3..=255).contains(&name.len());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(ValidationError::new("table_name"))
    }
}

impl Settings {
    pub fn new() -> std::result::Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Loads and validates settings.
    pub fn load() -> Result<Self> {
        let settings = Self::new()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.dedup
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if self.dedup.destination_configured {
            match self.dedup.backend {
                StoreBackend::Postgres if self.database.is_none() => {
                    return Err(AppError::Validation(
                        "postgres backend requires a [database] section".to_string(),
                    ));
                }
                StoreBackend::Redis if self.redis.is_none() => {
                    return Err(AppError::Validation(
                        "redis backend requires a [redis] section".to_string(),
                    ));
                }
                _ => {}
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
