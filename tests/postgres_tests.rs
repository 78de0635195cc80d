mod common;

use notification_dedup::dedup::{DedupStore, ManualClock, PostgresDedupStore, TableSchema};
use notification_dedup::error::ErrorKind;
use std::sync::Arc;

const NOW: i64 = common::T0;

fn unique_table(prefix: &str) -> String {
    format!(
        "{}_{}",
        prefix,
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

async fn drop_table(pool: &sqlx::PgPool, table: &str) {
    sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table))
        .execute(pool)
        .await
        .expect("Failed to drop test table");
}

async fn provisioned_store(table: &str) -> (sqlx::PgPool, Arc<ManualClock>, PostgresDedupStore) {
    let pool = common::setup_test_db().await;
    let clock = Arc::new(ManualClock::new(NOW));
    let store = PostgresDedupStore::with_clock(pool.clone(), table, clock.clone());
    store
        .create_table(&TableSchema::new(table))
        .await
        .expect("Failed to create dedup table");
    (pool, clock, store)
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_postgres_put_then_exists_until_expiry() {
    let table = unique_table("dedup_expiry");
    let (pool, clock, store) = provisioned_store(&table).await;

    assert!(!store.exists("h1").await.unwrap());
    store.put("h1", NOW + 300).await.unwrap();
    assert!(store.exists("h1").await.unwrap());

    clock.advance(300);
    assert!(!store.exists("h1").await.unwrap(), "ttl == now reads as expired");

    drop_table(&pool, &table).await;
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_postgres_last_write_wins() {
    let table = unique_table("dedup_lww");
    let (pool, clock, store) = provisioned_store(&table).await;

    store.put("h1", NOW + 600).await.unwrap();
    store.put("h1", NOW + 60).await.unwrap();

    clock.advance(61);
    assert!(!store.exists("h1").await.unwrap());

    drop_table(&pool, &table).await;
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_postgres_create_table_is_idempotent() {
    let table = unique_table("dedup_idem");
    let (pool, _clock, store) = provisioned_store(&table).await;

    store.put("h1", NOW + 300).await.unwrap();
    store.create_table(&TableSchema::new(&table)).await.unwrap();
    assert!(store.exists("h1").await.unwrap());

    drop_table(&pool, &table).await;
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_postgres_purge_and_delete() {
    let table = unique_table("dedup_purge");
    let (pool, clock, store) = provisioned_store(&table).await;

    store.put("old", NOW + 10).await.unwrap();
    store.put("new", NOW + 600).await.unwrap();
    clock.advance(10);

    assert_eq!(store.purge_expired().await.unwrap(), 1);
    assert!(store.delete("new").await.unwrap());
    assert!(!store.delete("new").await.unwrap());

    drop_table(&pool, &table).await;
}

#[tokio::test]
#[ignore = "Requires running PostgreSQL"]
async fn test_postgres_missing_table_is_configuration_absent() {
    let pool = common::setup_test_db().await;
    let store = PostgresDedupStore::new(pool, &unique_table("dedup_never_created"));

    let err = store.exists("h1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationAbsent);
}
