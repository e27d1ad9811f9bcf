use crate::error::{OrchestratorError, Result};
use crate::model::{ApplicationState, WsmApplication};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct ApplicationDao {
    pool: SqlitePool,
}

impl ApplicationDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register or update an application.
    pub async fn register_application(&self, application: &WsmApplication) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO application (application_id, display_name, service_account, state)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (application_id) DO UPDATE SET
                display_name = excluded.display_name,
                service_account = excluded.service_account,
                state = excluded.state
            "#,
        )
        .bind(&application.application_id)
        .bind(&application.display_name)
        .bind(&application.service_account)
        .bind(application.state)
        .execute(&self.pool)
        .await?;

        info!("Registered application {} ({:?})", application.application_id, application.state);
        Ok(())
    }

    pub async fn get_application(&self, application_id: &str) -> Result<WsmApplication> {
        sqlx::query_as::<_, ApplicationRow>("SELECT * FROM application WHERE application_id = ?")
            .bind(application_id)
            .fetch_optional(&self.pool)
            .await?
            .map(WsmApplication::from)
            .ok_or_else(|| OrchestratorError::NotFound(format!("application {}", application_id)))
    }

    /// Only OPERATING applications can be enabled. Enabling twice is a no-op.
    pub async fn enable_application(&self, workspace_id: Uuid, application_id: &str) -> Result<()> {
        let application = self.get_application(application_id).await?;
        if application.state != ApplicationState::Operating {
            return Err(OrchestratorError::InvalidInput(format!(
                "application {} is {:?}",
                application_id, application.state
            )));
        }

        sqlx::query(
            "INSERT INTO enabled_application (workspace_id, application_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(workspace_id.to_string())
        .bind(application_id)
        .execute(&self.pool)
        .await?;

        info!("Enabled application {} in workspace {}", application_id, workspace_id);
        Ok(())
    }

    pub async fn disable_application(&self, workspace_id: Uuid, application_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM enabled_application WHERE workspace_id = ? AND application_id = ?")
            .bind(workspace_id.to_string())
            .bind(application_id)
            .execute(&self.pool)
            .await?;

        info!("Disabled application {} in workspace {}", application_id, workspace_id);
        Ok(())
    }

    pub async fn is_enabled(&self, workspace_id: Uuid, application_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM enabled_application WHERE workspace_id = ? AND application_id = ?")
                .bind(workspace_id.to_string())
                .bind(application_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    pub async fn list_enabled(&self, workspace_id: Uuid) -> Result<Vec<WsmApplication>> {
        list_enabled_applications(&self.pool, workspace_id).await
    }
}

pub(crate) async fn list_enabled_applications<'e, E: SqliteExecutor<'e>>(
    executor: E,
    workspace_id: Uuid,
) -> Result<Vec<WsmApplication>> {
    let rows = sqlx::query_as::<_, ApplicationRow>(
        r#"
        SELECT a.* FROM application a
        JOIN enabled_application e ON e.application_id = a.application_id
        WHERE e.workspace_id = ?
        ORDER BY a.application_id
        "#,
    )
    .bind(workspace_id.to_string())
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(WsmApplication::from).collect())
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    application_id: String,
    display_name: String,
    service_account: String,
    state: ApplicationState,
}

impl From<ApplicationRow> for WsmApplication {
    fn from(row: ApplicationRow) -> Self {
        Self {
            application_id: row.application_id,
            display_name: row.display_name,
            service_account: row.service_account,
            state: row.state,
        }
    }
}
