use crate::config::{Settings, StoreBackend};
use crate::dedup::clock::{Clock, SystemClock};
use crate::dedup::dynamodb::DynamoDbDedupStore;
use crate::dedup::memory::InMemoryDedupStore;
use crate::dedup::postgres::PostgresDedupStore;
use crate::dedup::record::{HASH_ATTRIBUTE, TTL_ATTRIBUTE};
use crate::dedup::redis_store::RedisDedupStore;
use crate::dedup::store::DedupStore;
use crate::error::{AppError, Result};
use crate::observability::get_metrics;
use sqlx::postgres::PgPoolOptions;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Persisted shape of the dedup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub hash_attribute: &'static str,
    pub ttl_attribute: &'static str,
    pub billing_mode: &'static str,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            hash_attribute: HASH_ATTRIBUTE,
            ttl_attribute: TTL_ATTRIBUTE,
            billing_mode: "PAY_PER_REQUEST",
        }
    }
}

/// Inputs that decide whether and how the table is provisioned.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub table_name: String,
    pub destination_configured: bool,
    pub tags: BTreeMap<String, String>,
}

impl ProvisioningConfig {
    pub fn new(table_name: impl Into<String>, destination_configured: bool) -> Self {
        Self {
            table_name: table_name.into(),
            destination_configured,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn schema(&self) -> TableSchema {
        TableSchema::new(self.table_name.clone())
    }
}

impl From<&Settings> for ProvisioningConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            table_name: settings.dedup.table_name.clone(),
            destination_configured: settings.dedup.destination_configured,
            tags: settings.dedup.tags.clone(),
        }
    }
}

/// An established handle to the engine that will hold the table.
pub enum BackendConnection {
    Memory,
    Redis(redis::Client),
    Postgres(sqlx::PgPool),
    DynamoDb(aws_sdk_dynamodb::Client),
}

impl BackendConnection {
    pub fn name(&self) -> &'static str {
        match self {
            BackendConnection::Memory => "memory",
            BackendConnection::Redis(_) => "redis",
            BackendConnection::Postgres(_) => "postgres",
            BackendConnection::DynamoDb(_) => "dynamodb",
        }
    }

    /// Opens a connection to the backend named in settings.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        match settings.dedup.backend {
            StoreBackend::Memory => Ok(BackendConnection::Memory),
            StoreBackend::Redis => {
                let redis = settings.redis.as_ref().ok_or_else(|| {
                    AppError::Validation("redis backend requires a [redis] section".to_string())
                })?;
                tracing::info!("Connecting to Redis at {}...", redis.url);
                let client = redis::Client::open(redis.url.as_str()).map_err(AppError::Redis)?;
                Ok(BackendConnection::Redis(client))
            }
            StoreBackend::Postgres => {
                let database = settings.database.as_ref().ok_or_else(|| {
                    AppError::Validation("postgres backend requires a [database] section".to_string())
                })?;
                tracing::info!("Connecting to database...");
                let pool = PgPoolOptions::new()
                    .max_connections(database.pool_size)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(&database.url)
                    .await
                    .map_err(AppError::Database)?;
                Ok(BackendConnection::Postgres(pool))
            }
            StoreBackend::DynamoDb => {
                let mut loader = aws_config::from_env();
                if let Some(ref region) = settings.dynamodb.region {
                    loader = loader.region(aws_config::Region::new(region.clone()));
                }
                if let Some(ref endpoint) = settings.dynamodb.endpoint_url {
                    loader = loader.endpoint_url(endpoint);
                }
                let sdk_config = loader.load().await;
                Ok(BackendConnection::DynamoDb(aws_sdk_dynamodb::Client::new(
                    &sdk_config,
                )))
            }
        }
    }
}

/// Whether deduplication is available in this process.
///
/// `Disabled` is a normal operating mode, not a failure: no destination was
/// configured so no table exists. Store calls made through a disabled
/// capability return [`AppError::NotConfigured`].
#[derive(Clone)]
pub enum DedupCapability {
    Enabled(Arc<dyn DedupStore>),
    Disabled,
}

impl fmt::Debug for DedupCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupCapability::Enabled(store) => {
                f.debug_tuple("Enabled").field(&store.backend()).finish()
            }
            DedupCapability::Disabled => f.write_str("Disabled"),
        }
    }
}

impl DedupCapability {
    pub fn enabled(store: Arc<dyn DedupStore>) -> Self {
        DedupCapability::Enabled(store)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, DedupCapability::Enabled(_))
    }

    pub fn store(&self) -> Option<&Arc<dyn DedupStore>> {
        match self {
            DedupCapability::Enabled(store) => Some(store),
            DedupCapability::Disabled => None,
        }
    }

    pub fn require(&self) -> Result<&Arc<dyn DedupStore>> {
        self.store().ok_or(AppError::NotConfigured)
    }

    pub async fn exists(&self, identity_hash: &str) -> Result<bool> {
        self.require()?.exists(identity_hash).await
    }

    pub async fn put(&self, identity_hash: &str, ttl: i64) -> Result<()> {
        self.require()?.put(identity_hash, ttl).await
    }
}

/// Provisions the dedup table when a destination is configured.
///
/// With no destination nothing is touched and `Disabled` is returned.
pub async fn provision(
    config: &ProvisioningConfig,
    connection: BackendConnection,
    clock: Arc<dyn Clock>,
) -> Result<DedupCapability> {
    if !config.destination_configured {
        tracing::info!(
            table = %config.table_name,
            "No notification destination configured, deduplication disabled"
        );
        get_metrics().record_provisioning("none", false);
        return Ok(DedupCapability::Disabled);
    }

    let schema = config.schema();
    let backend = connection.name();

    let store: Arc<dyn DedupStore> = match connection {
        BackendConnection::Memory => Arc::new(InMemoryDedupStore::new(clock)),
        BackendConnection::Redis(client) => {
            let store = RedisDedupStore::with_clock(client, &config.table_name, clock);
            store.ping().await?;
            Arc::new(store)
        }
        BackendConnection::Postgres(pool) => {
            let store = PostgresDedupStore::with_clock(pool, &config.table_name, clock);
            store.create_table(&schema).await?;
            Arc::new(store)
        }
        BackendConnection::DynamoDb(client) => {
            let store = DynamoDbDedupStore::with_clock(client, &config.table_name, clock);
            store.create_table(&schema, &config.tags).await?;
            Arc::new(store)
        }
    };

    tracing::info!(
        table = %config.table_name,
        backend = backend,
        hash_attribute = schema.hash_attribute,
        ttl_attribute = schema.ttl_attribute,
        "Deduplication store provisioned"
    );
    get_metrics().record_provisioning(backend, true);

    Ok(DedupCapability::Enabled(store))
}

/// Reads settings, connects only when needed, and provisions.
pub async fn provision_from_settings(settings: &Settings) -> Result<DedupCapability> {
    let config = ProvisioningConfig::from(settings);
    if !config.destination_configured {
        return provision(&config, BackendConnection::Memory, Arc::new(SystemClock)).await;
    }

    let connection = BackendConnection::connect(settings).await?;
    provision(&config, connection, Arc::new(SystemClock)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_attributes() {
        let schema = TableSchema::new("dedup");
        assert_eq!(schema.hash_attribute, "principal_structure_and_action_hash");
        assert_eq!(schema.ttl_attribute, "ttl");
        assert_eq!(schema.billing_mode, "PAY_PER_REQUEST");
    }

    #[tokio::test]
    async fn test_disabled_capability_signals_not_configured() {
        let capability = DedupCapability::Disabled;

        assert!(!capability.is_enabled());
        assert!(capability.store().is_none());

        let err = capability.exists("abc123").await.unwrap_err();
        assert!(err.is_not_configured());
        assert!(!err.is_retryable());

        let err = capability.put("abc123", 10).await.unwrap_err();
        assert!(err.is_not_configured());
    }

    #[test]
    fn test_debug_names_backend() {
        let capability = DedupCapability::enabled(Arc::new(InMemoryDedupStore::default()));
        assert_eq!(format!("{:?}", capability), "Enabled(\"memory\")");
        assert_eq!(format!("{:?}", DedupCapability::Disabled), "Disabled");
    }
}
