use chrono::Utc;
use tokio::time::{interval, Duration};
use tracing::{error, info};
use wsm_orchestrator::FlightEngine;

pub async fn start_janitor_task(engine: FlightEngine, interval_secs: u64, retention_days: i64) {
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(
        "Janitor task running (checks every {} seconds, keeps {} days of flights)",
        interval_secs, retention_days
    );

    loop {
        interval.tick().await;

        if let Err(e) = purge_completed_flights(&engine, retention_days).await {
            error!("Janitor cleanup failed: {}", e);
        }
    }
}

/// Remove finished flights older than the retention period; returns how many went.
pub async fn purge_completed_flights(engine: &FlightEngine, retention_days: i64) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let removed = engine.delete_completed_before(cutoff).await?;

    if removed > 0 {
        info!("Removed {} flights completed before {}", removed, cutoff);
    }
    Ok(removed)
}
