pub mod config;
pub mod janitor;

pub use config::Config;
pub use janitor::{purge_completed_flights, start_janitor_task};

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use wsm_orchestrator::cloud::{AzureRestClient, CloudClients, GcpRestClient, UnavailableAwsClient};
use wsm_orchestrator::db::{backup_database, create_pool, run_migrations};
use wsm_orchestrator::iam::BearerToken;

/// Back up an existing database, open it and bring its schema up to date.
pub async fn open_database(db_path: &Path) -> Result<SqlitePool> {
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");
    Ok(pool)
}

/// REST clients for the clouds this deployment reaches.
pub fn cloud_clients(config: &Config) -> Result<CloudClients> {
    let gcp_token = config.gcp_access_token.clone().unwrap_or_else(|| {
        warn!("WSM_GCP_ACCESS_TOKEN is not set; GCP calls will be rejected");
        String::new()
    });
    let azure_token = config.azure_access_token.clone().unwrap_or_else(|| {
        warn!("WSM_AZURE_ACCESS_TOKEN is not set; Azure calls will be rejected");
        String::new()
    });

    Ok(CloudClients {
        gcp: Arc::new(GcpRestClient::new(BearerToken::new(gcp_token))?),
        azure: Arc::new(AzureRestClient::new(BearerToken::new(azure_token))?),
        aws: Arc::new(UnavailableAwsClient),
    })
}
