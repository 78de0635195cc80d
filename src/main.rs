use notification_dedup::config::Settings;
use notification_dedup::dedup::{provision_from_settings, NotificationDeduplicator};
use notification_dedup::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    init_logging(&LogConfig::from(&settings.application));
    info!("Configuration loaded");

    init_metrics()?;

    let capability = provision_from_settings(&settings).await?;
    let deduplicator = NotificationDeduplicator::from_settings(capability.clone(), &settings);

    if deduplicator.is_enabled() {
        info!(
            table = %settings.dedup.table_name,
            backend = settings.dedup.backend.as_str(),
            window_secs = settings.dedup.suppression_window_secs,
            "Deduplication enabled"
        );
    } else {
        info!("Deduplication disabled: every matching event will be notified");
    }

    let health = HealthChecker::new(capability).check_all().await;
    if health.status.is_healthy() {
        info!("Startup verification complete: dedup store healthy");
    } else {
        warn!(status = ?health.status, dependencies = ?health.dependencies, "Dedup store not fully healthy");
    }

    Ok(())
}
