use crate::dedup::clock::{Clock, SystemClock};
use crate::dedup::identity::validate_identity_hash;
use crate::dedup::record::DedupRecord;
use crate::dedup::store::DedupStore;
use crate::error::Result;
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process dedup table.
///
/// Expiry is checked lazily on every read; `purge_expired` drops dead
/// records but nothing depends on it running.
pub struct InMemoryDedupStore {
    records: Arc<RwLock<HashMap<String, DedupRecord>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryDedupStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryDedupStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of physically stored records, expired ones included.
    pub async fn stored_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns the stored record, live or not.
    pub async fn get_raw(&self, identity_hash: &str) -> Option<DedupRecord> {
        self.records.read().await.get(identity_hash).cloned()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn exists(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        let now = self.clock.now_epoch_seconds();
        let live = self
            .records
            .read()
            .await
            .get(identity_hash)
            .map(|record| record.is_live_at(now))
            .unwrap_or(false);

        get_metrics().record_store_operation(self.backend(), "exists", timer.elapsed_ms(), true);
        Ok(live)
    }

    async fn put(&self, identity_hash: &str, ttl: i64) -> Result<()> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        let record =
            DedupRecord::new(identity_hash, ttl).with_created_at(self.clock.now_epoch_seconds());
        self.records
            .write()
            .await
            .insert(identity_hash.to_string(), record);

        get_metrics().record_store_operation(self.backend(), "put", timer.elapsed_ms(), true);
        tracing::debug!(ttl = ttl, "Stored dedup record in memory");
        Ok(())
    }

    async fn delete(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;
        Ok(self.records.write().await.remove(identity_hash).is_some())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = self.clock.now_epoch_seconds();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.is_live_at(now));
        Ok((before - records.len()) as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
