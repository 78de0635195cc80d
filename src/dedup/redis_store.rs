use crate::dedup::clock::{Clock, SystemClock};
use crate::dedup::identity::validate_identity_hash;
use crate::dedup::store::DedupStore;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use anyhow::anyhow;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;

/// How a put with absolute expiry `ttl` is applied at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WritePlan {
    /// `EXAT` rejects instants that are not in the future; the key is deleted instead.
    Remove,
    SetUntil(u64),
}

fn plan_write(ttl: i64, now: i64) -> WritePlan {
    if ttl <= now {
        WritePlan::Remove
    } else {
        WritePlan::SetUntil(ttl as u64)
    }
}

/// A key Redis has not evicted yet still reads as absent once its ttl passes.
fn is_live(stored_ttl: Option<i64>, now: i64) -> bool {
    stored_ttl.map_or(false, |ttl| ttl > now)
}

fn parse_stored_ttl(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| AppError::Internal(anyhow!("dedup key holds a non-numeric ttl: {}", raw)))
}

/// Redis-backed dedup table.
///
/// Each record is a key `<table>:<hash>` holding its ttl, expiring natively
/// at that instant via `EXAT`. Reads still compare the stored ttl against the
/// clock so a key Redis has not evicted yet never reads as live.
pub struct RedisDedupStore {
    client: redis::Client,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl RedisDedupStore {
    pub fn new(client: redis::Client, table_name: impl Into<String>) -> Self {
        Self::with_clock(client, table_name, Arc::new(SystemClock))
    }

    pub fn with_clock(
        client: redis::Client,
        table_name: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            key_prefix: table_name.into(),
            clock,
        }
    }

    fn make_key(&self, identity_hash: &str) -> String {
        format!("{}:{}", self.key_prefix, identity_hash)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }

    fn observe<T>(&self, operation: &str, timer: LatencyTimer, result: &Result<T>) {
        get_metrics().record_store_operation(
            self.backend(),
            operation,
            timer.elapsed_ms(),
            result.is_ok(),
        );
    }

    /// Verifies the server answers.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Redis)
    }

    async fn stored_ttl(&self, identity_hash: &str) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(self.make_key(identity_hash))
            .await
            .map_err(AppError::Redis)?;

        value.as_deref().map(parse_stored_ttl).transpose()
    }

    async fn write(&self, identity_hash: &str, ttl: i64) -> Result<()> {
        let key = self.make_key(identity_hash);
        let mut conn = self.connection().await?;

        match plan_write(ttl, self.clock.now_epoch_seconds()) {
            WritePlan::Remove => {
                let _: i64 = conn.del(&key).await.map_err(AppError::Redis)?;
            }
            WritePlan::SetUntil(at) => {
                let _: () = conn
                    .set_options(
                        &key,
                        ttl.to_string(),
                        redis::SetOptions::default()
                            .with_expiration(redis::SetExpiry::EXAT(at as usize)),
                    )
                    .await
                    .map_err(AppError::Redis)?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn exists(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        let result = self
            .stored_ttl(identity_hash)
            .await
            .map(|ttl| is_live(ttl, self.clock.now_epoch_seconds()));

        self.observe("exists", timer, &result);
        result
    }

    async fn put(&self, identity_hash: &str, ttl: i64) -> Result<()> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        let result = self.write(identity_hash, ttl).await;

        self.observe("put", timer, &result);
        if let Err(ref e) = result {
            tracing::warn!(error = %e, "Redis dedup put failed");
        }
        result
    }

    async fn delete(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;
        let mut conn = self.connection().await?;
        let deleted: i64 = conn
            .del(self.make_key(identity_hash))
            .await
            .map_err(AppError::Redis)?;

        Ok(deleted > 0)
    }

    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
