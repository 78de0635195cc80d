mod common;

use notification_dedup::dedup::{DedupStore, ManualClock, RedisDedupStore};
use std::sync::Arc;

/// Redis expires keys on wall-clock time, so these tests start from real now.
fn store(prefix: &str) -> (Arc<ManualClock>, RedisDedupStore, i64) {
    let now = chrono::Utc::now().timestamp();
    let clock = Arc::new(ManualClock::new(now));
    let table = format!("{}-{}", prefix, now);
    let store = RedisDedupStore::with_clock(common::redis_client(), table, clock.clone());
    (clock, store, now)
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_ping() {
    let (_clock, store, _now) = store("dedup-ping");
    store.ping().await.expect("Redis should answer PING");
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_put_then_exists_until_expiry() {
    let (clock, store, now) = store("dedup-expiry");

    assert!(!store.exists("h1").await.unwrap());
    store.put("h1", now + 300).await.unwrap();
    assert!(store.exists("h1").await.unwrap());

    // Filtered on read before Redis itself evicts the key.
    clock.advance(300);
    assert!(!store.exists("h1").await.unwrap());

    assert!(store.delete("h1").await.unwrap());
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_past_ttl_removes_record() {
    let (_clock, store, now) = store("dedup-past");

    store.put("h1", now + 300).await.unwrap();
    store.put("h1", now - 1).await.unwrap();

    assert!(!store.exists("h1").await.unwrap());
    assert!(!store.delete("h1").await.unwrap());
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_purge_is_noop() {
    let (_clock, store, _now) = store("dedup-purge");
    assert_eq!(store.purge_expired().await.unwrap(), 0);
}
