use crate::error::{AppError, Result};
use anyhow::anyhow;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the dedup store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_store_operation(
        &self,
        backend: &str,
        operation: &str,
        duration_ms: f64,
        success: bool,
    ) {
        counter!("dedup_store_operations_total", "backend" => backend.to_string(), "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("dedup_store_operation_duration_ms", "backend" => backend.to_string(), "operation" => operation.to_string()).record(duration_ms);
    }

    pub fn record_decision(&self, decision: &str) {
        counter!("dedup_decisions_total", "decision" => decision.to_string()).increment(1);
    }

    pub fn record_retry(&self, operation: &str) {
        counter!("dedup_store_retries_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_provisioning(&self, backend: &str, enabled: bool) {
        counter!("dedup_provisioning_total", "backend" => backend.to_string(), "enabled" => enabled.to_string()).increment(1);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("dedup_store_operations_total", Unit::Count, "Dedup store operations by backend and outcome");
    describe_histogram!("dedup_store_operation_duration_ms", Unit::Milliseconds, "Dedup store operation latency in milliseconds");
    describe_counter!("dedup_decisions_total", Unit::Count, "Notify/suppress decisions");
    describe_counter!("dedup_store_retries_total", Unit::Count, "Caller-side retries of store operations");
    describe_counter!("dedup_provisioning_total", Unit::Count, "Provisioning runs by backend and resulting mode");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
