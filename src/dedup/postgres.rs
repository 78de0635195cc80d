use crate::dedup::clock::{Clock, SystemClock};
use crate::dedup::identity::validate_identity_hash;
use crate::dedup::provisioning::TableSchema;
use crate::dedup::store::DedupStore;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// Maps a missing table onto the configuration-absent signal.
fn map_db_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some(UNDEFINED_TABLE) {
            return AppError::NotConfigured;
        }
    }
    AppError::Database(err)
}

/// PostgreSQL-backed dedup table.
///
/// Postgres has no native expiry, so every read filters on `ttl > now` and
/// `purge_expired` deletes dead rows.
pub struct PostgresDedupStore {
    pool: PgPool,
    table: String,
    clock: Arc<dyn Clock>,
}

impl PostgresDedupStore {
    /// `table_name` must already have passed settings validation.
    pub fn new(pool: PgPool, table_name: &str) -> Self {
        Self::with_clock(pool, table_name, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, table_name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            table: quote_identifier(table_name),
            clock,
        }
    }

    /// Creates the table if it is missing. The schema is never altered in place.
    pub async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                {hash} TEXT PRIMARY KEY,
                {ttl} BIGINT NOT NULL,
                created_at BIGINT
            )
            "#,
            table = self.table,
            hash = schema.hash_attribute,
            ttl = schema.ttl_attribute,
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {table} ({ttl})",
            index = quote_identifier(&format!("{}_ttl_idx", schema.table_name)),
            table = self.table,
            ttl = schema.ttl_attribute,
        );
        sqlx::query(&index)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        tracing::info!(table = %schema.table_name, "Dedup table ensured in PostgreSQL");
        Ok(())
    }

    fn observe<T>(&self, operation: &str, timer: LatencyTimer, result: &Result<T>) {
        get_metrics().record_store_operation(
            self.backend(),
            operation,
            timer.elapsed_ms(),
            result.is_ok(),
        );
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl DedupStore for PostgresDedupStore {
    async fn exists(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        let sql = format!(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM {table}
                WHERE principal_structure_and_action_hash = $1 AND ttl > $2
            )
            "#,
            table = self.table
        );
        let result = sqlx::query_scalar::<_, bool>(&sql)
            .bind(identity_hash)
            .bind(self.clock.now_epoch_seconds())
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error);

        self.observe("exists", timer, &result);
        result
    }

    async fn put(&self, identity_hash: &str, ttl: i64) -> Result<()> {
        validate_identity_hash(identity_hash)?;
        let timer = LatencyTimer::new();

        let sql = format!(
            r#"
            INSERT INTO {table} (principal_structure_and_action_hash, ttl, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (principal_structure_and_action_hash)
            DO UPDATE SET ttl = EXCLUDED.ttl, created_at = EXCLUDED.created_at
            "#,
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(identity_hash)
            .bind(ttl)
            .bind(self.clock.now_epoch_seconds())
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_db_error);

        self.observe("put", timer, &result);
        result
    }

    async fn delete(&self, identity_hash: &str) -> Result<bool> {
        validate_identity_hash(identity_hash)?;

        let sql = format!(
            "DELETE FROM {table} WHERE principal_structure_and_action_hash = $1",
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(identity_hash)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let sql = format!("DELETE FROM {table} WHERE ttl <= $1", table = self.table);
        let result = sqlx::query(&sql)
            .bind(self.clock.now_epoch_seconds())
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() > 0 {
            tracing::info!("Reclaimed {} expired dedup records", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("dedup-table"), "\"dedup-table\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_pool_timeout_stays_transient() {
        assert!(map_db_error(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
