use crate::dedup::DedupCapability;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Key probed by health checks; never written.
const PROBE_KEY: &str = "__dedup_health_probe__";

/// Health status of a service or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }
}

/// Health status of a single dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    /// Dedup turned off on purpose counts as healthy.
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: None,
            message: Some("deduplication disabled".to_string()),
        }
    }
}

/// Aggregated health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = Self::aggregate_status(&dependencies);
        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }

    fn aggregate_status(dependencies: &[DependencyHealth]) -> HealthStatus {
        let has_unhealthy = dependencies.iter().any(|d| d.status.is_unhealthy());
        let has_degraded = dependencies.iter().any(|d| d.status.is_degraded());

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health checker for the dedup store.
pub struct HealthChecker {
    capability: DedupCapability,
    timeout: Duration,
    start_time: std::time::Instant,
}

impl HealthChecker {
    pub fn new(capability: DedupCapability) -> Self {
        Self {
            capability,
            timeout: Duration::from_secs(5),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.start_time.elapsed().as_secs(),
            vec![self.check_dedup_store().await],
        )
    }

    /// Probes the store with a read. A slow or failing store only degrades
    /// service since notifications fall back to being sent undeduplicated.
    pub async fn check_dedup_store(&self) -> DependencyHealth {
        let Some(store) = self.capability.store() else {
            return DependencyHealth::disabled("dedup_store");
        };

        let name = format!("dedup_store:{}", store.backend());
        let start = std::time::Instant::now();

        match tokio::time::timeout(self.timeout, store.exists(PROBE_KEY)).await {
            Ok(Ok(_)) => {
                let latency = start.elapsed().as_secs_f64() * 1000.0;
                if latency > 100.0 {
                    DependencyHealth {
                        name,
                        status: HealthStatus::Degraded,
                        latency_ms: Some(latency),
                        message: Some("High latency detected".to_string()),
                    }
                } else {
                    DependencyHealth::healthy(name, latency)
                }
            }
            Ok(Err(e)) if e.is_not_configured() => {
                DependencyHealth::unhealthy(name, "Dedup table does not exist")
            }
            Ok(Err(e)) => DependencyHealth::degraded(name, format!("Probe failed: {}", e)),
            Err(_) => DependencyHealth::degraded(name, "Probe timeout"),
        }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Ready unless the provisioned table is missing.
    pub async fn is_ready(&self) -> bool {
        !self.check_dedup_store().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
