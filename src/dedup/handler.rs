use crate::config::Settings;
use crate::dedup::clock::{Clock, SystemClock};
use crate::dedup::identity::{validate_identity_hash, IdentityAttributes, IdentityHasher};
use crate::dedup::provisioning::DedupCapability;
use crate::dedup::retry::RetryPolicy;
use crate::dedup::store::DedupStore;
use crate::error::{AppError, ErrorKind, Result};
use crate::observability::{get_metrics, mask_sensitive};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Successful marks between sweeps of expired records.
pub const DEFAULT_PURGE_INTERVAL: u64 = 100;

/// Counters for dedup decisions.
#[derive(Debug, Default)]
pub struct DedupMetrics {
    pub total_checks: AtomicU64,
    pub suppressed: AtomicU64,
    pub notified: AtomicU64,
    pub degraded: AtomicU64,
    pub disabled: AtomicU64,
}

impl DedupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check(&self) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notified(&self) {
        self.notified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disabled(&self) {
        self.disabled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DedupMetricsSnapshot {
        DedupMetricsSnapshot {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupMetricsSnapshot {
    pub total_checks: u64,
    pub suppressed: u64,
    pub notified: u64,
    pub degraded: u64,
    pub disabled: u64,
}

impl DedupMetricsSnapshot {
    pub fn suppression_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.suppressed as f64 / self.total_checks as f64
        }
    }
}

/// Why a notification is allowed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    FirstOccurrence,
    DedupDisabled,
    /// The store could not be reached; sending a possible duplicate beats dropping the alert.
    StoreUnavailable,
}

impl NotifyReason {
    fn as_str(&self) -> &'static str {
        match self {
            NotifyReason::FirstOccurrence => "first_occurrence",
            NotifyReason::DedupDisabled => "disabled",
            NotifyReason::StoreUnavailable => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Notify(NotifyReason),
    Suppress,
}

impl DedupDecision {
    pub fn should_notify(&self) -> bool {
        matches!(self, DedupDecision::Notify(_))
    }
}

/// What happened to one candidate notification.
#[derive(Debug)]
pub enum ProcessOutcome<T> {
    Notified { reason: NotifyReason, output: T },
    Suppressed,
}

/// Wraps the dedup contract for an event processor.
///
/// The sequence is the documented read-then-write: check `exists`, mark with
/// `put`, then notify. Two processors handling the same hash at the same
/// moment can both pass the check; at most one extra alert results.
pub struct NotificationDeduplicator {
    capability: DedupCapability,
    hasher: IdentityHasher,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    suppression_window_secs: i64,
    metrics: Arc<DedupMetrics>,
    marks: AtomicU64,
    purge_interval: u64,
}

impl NotificationDeduplicator {
    /// A window below one second would write markers that are dead on
    /// arrival, so it is raised to one second.
    pub fn new(capability: DedupCapability, suppression_window_secs: i64) -> Self {
        if suppression_window_secs < 1 {
            tracing::warn!(
                suppression_window_secs,
                "Suppression window must be positive, using 1 second"
            );
        }

        Self {
            capability,
            hasher: IdentityHasher::new(),
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            suppression_window_secs: suppression_window_secs.max(1),
            metrics: Arc::new(DedupMetrics::new()),
            marks: AtomicU64::new(0),
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }

    pub fn from_settings(capability: DedupCapability, settings: &Settings) -> Self {
        Self::new(capability, settings.dedup.suppression_window_secs)
            .with_retry_policy(RetryPolicy::from(&settings.retry))
            .with_purge_interval(settings.dedup.purge_interval)
    }

    /// Sweeps expired records from the store after every `every` successful marks.
    pub fn with_purge_interval(mut self, every: u64) -> Self {
        self.purge_interval = every.max(1);
        self
    }

    pub fn suppression_window_secs(&self) -> i64 {
        self.suppression_window_secs
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.capability.is_enabled()
    }

    pub fn metrics(&self) -> Arc<DedupMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn identity_hash(&self, attributes: &IdentityAttributes) -> String {
        self.hasher.hash(attributes)
    }

    /// Expiry for a record written now.
    pub fn expiry_from_now(&self) -> i64 {
        self.clock
            .now_epoch_seconds()
            .saturating_add(self.suppression_window_secs)
    }

    /// Decides whether a notification for `identity_hash` should go out.
    pub async fn check(&self, identity_hash: &str) -> Result<DedupDecision> {
        validate_identity_hash(identity_hash)?;
        self.metrics.record_check();

        let Some(store) = self.capability.store() else {
            self.metrics.record_disabled();
            return Ok(self.decided(DedupDecision::Notify(NotifyReason::DedupDisabled)));
        };

        let seen = self
            .retry
            .run("exists", move || store.exists(identity_hash))
            .await;

        let decision = match seen {
            Ok(true) => {
                self.metrics.record_suppressed();
                tracing::info!(
                    identity_hash = %mask_sensitive(identity_hash, 6),
                    "Duplicate notification suppressed"
                );
                DedupDecision::Suppress
            }
            Ok(false) => DedupDecision::Notify(NotifyReason::FirstOccurrence),
            Err(e) => return self.degrade(identity_hash, e),
        };

        Ok(self.decided(decision))
    }

    /// Writes the suppression marker for `identity_hash`. No-op when disabled.
    pub async fn mark_notified(&self, identity_hash: &str) -> Result<()> {
        validate_identity_hash(identity_hash)?;

        let Some(store) = self.capability.store() else {
            return Ok(());
        };

        let ttl = self.expiry_from_now();
        self.retry
            .run("put", move || store.put(identity_hash, ttl))
            .await?;

        self.sweep_if_due(store).await;
        Ok(())
    }

    /// Physically removes expired records every `purge_interval` marks.
    ///
    /// Reads already ignore expired records; this only bounds storage for
    /// backends without native expiry. A failed sweep is logged and dropped.
    async fn sweep_if_due(&self, store: &Arc<dyn DedupStore>) {
        let marks = self.marks.fetch_add(1, Ordering::Relaxed) + 1;
        if marks % self.purge_interval != 0 {
            return;
        }

        match store.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => {
                tracing::debug!(purged, backend = store.backend(), "Purged expired dedup records")
            }
            Err(e) => {
                tracing::warn!(error = %e, backend = store.backend(), "Expired dedup record sweep failed")
            }
        }
    }

    /// Runs `notify` unless the action was already notified within the window.
    ///
    /// The marker is written before sending to keep the race window short and
    /// removed again if sending fails, so a failed alert is retried rather
    /// than suppressed.
    pub async fn process<T, F, Fut>(
        &self,
        attributes: &IdentityAttributes,
        notify: F,
    ) -> Result<ProcessOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let identity_hash = self.identity_hash(attributes);

        let reason = match self.check(&identity_hash).await? {
            DedupDecision::Suppress => return Ok(ProcessOutcome::Suppressed),
            DedupDecision::Notify(reason) => reason,
        };

        let marked = if reason == NotifyReason::FirstOccurrence {
            match self.mark_notified(&identity_hash).await {
                Ok(()) => true,
                Err(e) => {
                    self.metrics.record_degraded();
                    tracing::warn!(
                        error = %e,
                        event_name = %attributes.event_name,
                        "Failed to write dedup record, notifying without it"
                    );
                    false
                }
            }
        } else {
            false
        };

        match notify().await {
            Ok(output) => {
                self.metrics.record_notified();
                Ok(ProcessOutcome::Notified { reason, output })
            }
            Err(e) => {
                if marked {
                    if let Some(store) = self.capability.store() {
                        if let Err(rollback) = store.delete(&identity_hash).await {
                            tracing::error!(
                                error = %rollback,
                                "Failed to remove dedup record after failed notification"
                            );
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Hashes an audit record and processes it.
    pub async fn process_event<T, F, Fut>(
        &self,
        event: &serde_json::Value,
        notify: F,
    ) -> Result<ProcessOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attributes = IdentityAttributes::from_event(event)?;
        self.process(&attributes, notify).await
    }

    fn degrade(&self, identity_hash: &str, err: AppError) -> Result<DedupDecision> {
        match err.kind() {
            ErrorKind::MalformedKey => Err(err),
            ErrorKind::ConfigurationAbsent => {
                // The table vanished underneath a provisioned capability.
                self.metrics.record_degraded();
                tracing::error!(
                    identity_hash = %mask_sensitive(identity_hash, 6),
                    "Dedup table missing, notifying without deduplication"
                );
                Ok(self.decided(DedupDecision::Notify(NotifyReason::StoreUnavailable)))
            }
            ErrorKind::Transient | ErrorKind::Permanent => {
                self.metrics.record_degraded();
                tracing::warn!(
                    error = %err,
                    identity_hash = %mask_sensitive(identity_hash, 6),
                    "Dedup store unavailable, notifying without deduplication"
                );
                Ok(self.decided(DedupDecision::Notify(NotifyReason::StoreUnavailable)))
            }
        }
    }

    fn decided(&self, decision: DedupDecision) -> DedupDecision {
        let label = match decision {
            DedupDecision::Suppress => "suppressed",
            DedupDecision::Notify(reason) => reason.as_str(),
        };
        get_metrics().record_decision(label);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::clock::ManualClock;
    use crate::dedup::store::MockDedupStore;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(100),
        }
    }

    fn attrs() -> IdentityAttributes {
        IdentityAttributes::new("IAMUser", "iam.amazonaws.com", "CreateAccessKey")
            .with_account_id("123456789012")
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = DedupMetrics::new();
        metrics.record_check();
        metrics.record_check();
        metrics.record_suppressed();
        metrics.record_notified();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_checks, 2);
        assert_eq!(snapshot.suppressed, 1);
        assert_eq!(snapshot.suppression_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_put_uses_window_from_clock() {
        let mut store = MockDedupStore::new();
        store
            .expect_put()
            .withf(|hash, ttl| hash == "abc123" && *ttl == 1_300)
            .times(1)
            .returning(|_, _| Ok(()));

        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(Arc::new(store)), 300)
            .with_clock(Arc::new(ManualClock::new(1_000)));

        dedup.mark_notified("abc123").await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_degrades_to_notify() {
        let mut store = MockDedupStore::new();
        store
            .expect_exists()
            .times(2)
            .returning(|_| Err(AppError::Transient("throttled".to_string())));

        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(Arc::new(store)), 300)
            .with_retry_policy(fast_retry());

        let decision = dedup.check("abc123").await.unwrap();
        assert_eq!(decision, DedupDecision::Notify(NotifyReason::StoreUnavailable));
        assert_eq!(dedup.metrics().snapshot().degraded, 1);
    }

    #[tokio::test]
    async fn test_failed_notification_removes_marker() {
        let mut store = MockDedupStore::new();
        store.expect_exists().times(1).returning(|_| Ok(false));
        store.expect_put().times(1).returning(|_, _| Ok(()));
        store.expect_delete().times(1).returning(|_| Ok(true));

        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(Arc::new(store)), 300)
            .with_retry_policy(fast_retry());

        let result: Result<ProcessOutcome<()>> = dedup
            .process(&attrs(), || async {
                Err(AppError::Transient("chat webhook returned 503".to_string()))
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_put_failure_still_notifies() {
        let mut store = MockDedupStore::new();
        store.expect_exists().returning(|_| Ok(false));
        store
            .expect_put()
            .returning(|_, _| Err(AppError::Transient("throttled".to_string())));

        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(Arc::new(store)), 300)
            .with_retry_policy(fast_retry());

        let outcome = dedup.process(&attrs(), || async { Ok("sent") }).await.unwrap();

        assert!(matches!(
            outcome,
            ProcessOutcome::Notified { reason: NotifyReason::FirstOccurrence, output: "sent" }
        ));
        assert_eq!(dedup.metrics().snapshot().degraded, 1);
    }

    #[tokio::test]
    async fn test_sweep_runs_every_interval_marks() {
        let mut store = MockDedupStore::new();
        store.expect_put().times(6).returning(|_, _| Ok(()));
        store.expect_purge_expired().times(2).returning(|| Ok(3));
        store.expect_backend().return_const("mock");

        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(Arc::new(store)), 300)
            .with_retry_policy(fast_retry())
            .with_purge_interval(3);

        for _ in 0..6 {
            dedup.mark_notified("abc123").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_sweep_does_not_fail_mark() {
        let mut store = MockDedupStore::new();
        store.expect_put().times(1).returning(|_, _| Ok(()));
        store
            .expect_purge_expired()
            .times(1)
            .returning(|| Err(AppError::Transient("connection reset".to_string())));
        store.expect_backend().return_const("mock");

        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(Arc::new(store)), 300)
            .with_purge_interval(1);

        assert!(dedup.mark_notified("abc123").await.is_ok());
    }

    #[test]
    fn test_non_positive_window_is_raised_to_one_second() {
        let dedup = NotificationDeduplicator::new(DedupCapability::Disabled, 0)
            .with_clock(Arc::new(ManualClock::new(1_000)));
        assert_eq!(dedup.suppression_window_secs(), 1);
        assert_eq!(dedup.expiry_from_now(), 1_001);

        let dedup = NotificationDeduplicator::new(DedupCapability::Disabled, -300);
        assert_eq!(dedup.suppression_window_secs(), 1);
    }

    #[test]
    fn test_huge_window_saturates() {
        let dedup = NotificationDeduplicator::new(DedupCapability::Disabled, i64::MAX)
            .with_clock(Arc::new(ManualClock::new(1_000)));
        assert_eq!(dedup.expiry_from_now(), i64::MAX);
    }

    #[tokio::test]
    async fn test_malformed_key_is_rejected_before_store() {
        let store = MockDedupStore::new();
        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(Arc::new(store)), 300);

        assert!(matches!(dedup.check("").await, Err(AppError::MalformedKey(_))));
    }
}
