use crate::error::Result;
use async_trait::async_trait;

/// Runtime contract of the dedup table.
///
/// `exists` is a read with an expiry filter: a record whose ttl has elapsed
/// reads as absent whether or not the backend has reclaimed it yet. `put`
/// overwrites unconditionally, so concurrent writers for the same hash race
/// and the last one wins. There is no insert-if-absent primitive; a caller
/// doing `exists` then `put` accepts that two processors may both notify.
///
/// Implementations never retry; transient failures surface as retryable
/// errors and the caller decides.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Returns true iff a live record exists for `identity_hash`.
    async fn exists(&self, identity_hash: &str) -> Result<bool>;

    /// Inserts or overwrites the record with absolute expiry `ttl` (epoch seconds).
    async fn put(&self, identity_hash: &str, ttl: i64) -> Result<()>;

    /// Removes the record. Returns whether anything was removed.
    async fn delete(&self, identity_hash: &str) -> Result<bool>;

    /// Physically reclaims expired records; backends with native expiry return 0.
    async fn purge_expired(&self) -> Result<u64>;

    fn backend(&self) -> &'static str;
}
