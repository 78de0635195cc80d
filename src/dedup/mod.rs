pub mod clock;
pub mod dynamodb;
pub mod handler;
pub mod identity;
pub mod memory;
pub mod postgres;
pub mod provisioning;
pub mod record;
pub mod redis_store;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dynamodb::DynamoDbDedupStore;
pub use handler::{
    DedupDecision, DedupMetrics, DedupMetricsSnapshot, NotificationDeduplicator, NotifyReason,
    ProcessOutcome,
};
pub use identity::{validate_identity_hash, IdentityAttributes, IdentityHasher};
pub use memory::InMemoryDedupStore;
pub use postgres::PostgresDedupStore;
pub use provisioning::{
    provision, provision_from_settings, BackendConnection, DedupCapability, ProvisioningConfig,
    TableSchema,
};
pub use record::{DedupRecord, RecordState, HASH_ATTRIBUTE, TTL_ATTRIBUTE};
pub use redis_store::RedisDedupStore;
pub use retry::RetryPolicy;
pub use store::DedupStore;
