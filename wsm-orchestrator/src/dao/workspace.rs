use crate::error::{OrchestratorError, Result};
use crate::model::Workspace;
use chrono::DateTime;
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct WorkspaceDao {
    pool: SqlitePool,
}

impl WorkspaceDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a workspace. Re-inserting the same workspace id is a no-op so the create step can
    /// be retried; a different workspace holding the user facing id is a duplicate.
    pub async fn create_workspace(&self, workspace: &Workspace) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workspace (workspace_id, user_facing_id, display_name, description, spend_profile, created_by_email, created_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (workspace_id) DO NOTHING
            "#,
        )
        .bind(workspace.workspace_id.to_string())
        .bind(&workspace.user_facing_id)
        .bind(&workspace.display_name)
        .bind(&workspace.description)
        .bind(&workspace.spend_profile)
        .bind(&workspace.created_by_email)
        .bind(workspace.created_date.timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => {
                info!("Workspace {} already inserted", workspace.workspace_id);
                Ok(())
            }
            Ok(_) => {
                info!(
                    "Inserted workspace {} ({})",
                    workspace.workspace_id, workspace.user_facing_id
                );
                Ok(())
            }
            Err(e) if super::is_unique_violation(&e) => Err(OrchestratorError::DuplicateResource(format!(
                "workspace with user facing id {} already exists",
                workspace.user_facing_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_workspace(&self, workspace_id: Uuid) -> Result<Workspace> {
        fetch_workspace(&self.pool, workspace_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {}", workspace_id)))
    }

    pub async fn get_workspace_by_user_facing_id(&self, user_facing_id: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspace WHERE user_facing_id = ?")
            .bind(user_facing_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {}", user_facing_id)))?;

        row.try_into()
    }

    /// Record the creating user once the broker has resolved them.
    pub async fn set_created_by_email(&self, workspace_id: Uuid, email: &str) -> Result<()> {
        let result = sqlx::query("UPDATE workspace SET created_by_email = ? WHERE workspace_id = ?")
            .bind(email)
            .bind(workspace_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("workspace {}", workspace_id)));
        }
        Ok(())
    }

    /// Returns true when a row was removed.
    pub async fn delete_workspace(&self, workspace_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workspace WHERE workspace_id = ?")
            .bind(workspace_id.to_string())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted workspace {}", workspace_id);
        }
        Ok(deleted)
    }
}

pub(crate) async fn fetch_workspace<'e, E: SqliteExecutor<'e>>(
    executor: E,
    workspace_id: Uuid,
) -> Result<Option<Workspace>> {
    let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspace WHERE workspace_id = ?")
        .bind(workspace_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.map(Workspace::try_from).transpose()
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    workspace_id: String,
    user_facing_id: String,
    display_name: Option<String>,
    description: Option<String>,
    spend_profile: Option<String>,
    created_by_email: Option<String>,
    created_date: i64,
}

impl TryFrom<WorkspaceRow> for Workspace {
    type Error = OrchestratorError;

    fn try_from(row: WorkspaceRow) -> Result<Self> {
        Ok(Self {
            workspace_id: super::parse_uuid(&row.workspace_id)?,
            user_facing_id: row.user_facing_id,
            display_name: row.display_name,
            description: row.description,
            spend_profile: row.spend_profile,
            created_by_email: row.created_by_email,
            created_date: DateTime::from_timestamp(row.created_date, 0).unwrap_or_default(),
        })
    }
}
