use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use wsm_orchestrator::iam::{BearerToken, HttpIdentityBroker, ServiceIdentity};
use wsm_orchestrator::WorkspaceManager;
use wsm_server::{cloud_clients, open_database, start_janitor_task, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = wsm_logging::init_subscriber();

    info!("Starting wsm-server...");

    let config = Config::from_env();
    info!(
        "Configuration loaded: db_path={}, broker_url={}",
        config.db_path.display(),
        config.broker_url
    );

    let pool = open_database(&config.db_path).await?;

    let service_token = config
        .service_token
        .clone()
        .context("WSM_SERVICE_TOKEN must be set")?;
    let broker = Arc::new(HttpIdentityBroker::new(&config.broker_url)?);
    let service_identity = ServiceIdentity::initialize(broker.as_ref(), BearerToken::new(service_token)).await?;

    let manager = WorkspaceManager::builder(pool, broker, service_identity, cloud_clients(&config)?)
        .options(config.manager_options())
        .build();

    let resumed = manager.recover().await?;
    info!("Resumed {} flights", resumed.len());

    tokio::spawn(start_janitor_task(
        manager.engine().clone(),
        config.janitor_interval_secs,
        config.flight_retention_days,
    ));
    info!(
        "Janitor task started (interval: {}s)",
        config.janitor_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
