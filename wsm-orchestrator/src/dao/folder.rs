use crate::error::{OrchestratorError, Result};
use crate::model::Folder;
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct FolderDao {
    pool: SqlitePool,
}

impl FolderDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a folder. A parent must already exist in the same workspace.
    pub async fn create_folder(&self, folder: &Folder) -> Result<()> {
        if let Some(parent_id) = folder.parent_folder_id {
            let parent: Option<i64> = sqlx::query_scalar("SELECT 1 FROM folder WHERE workspace_id = ? AND folder_id = ?")
                .bind(folder.workspace_id.to_string())
                .bind(parent_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            if parent.is_none() {
                return Err(OrchestratorError::InvalidInput(format!(
                    "parent folder {} is not in workspace {}",
                    parent_id, folder.workspace_id
                )));
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO folder (workspace_id, folder_id, display_name, description, parent_folder_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(folder.workspace_id.to_string())
        .bind(folder.folder_id.to_string())
        .bind(&folder.display_name)
        .bind(&folder.description)
        .bind(folder.parent_folder_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("Created folder {} in workspace {}", folder.folder_id, folder.workspace_id);
                Ok(())
            }
            Err(e) if super::is_unique_violation(&e) => Err(OrchestratorError::DuplicateResource(format!(
                "folder {} already exists",
                folder.display_name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_folder(&self, workspace_id: Uuid, folder_id: Uuid) -> Result<Folder> {
        let row = sqlx::query_as::<_, FolderRow>("SELECT * FROM folder WHERE workspace_id = ? AND folder_id = ?")
            .bind(workspace_id.to_string())
            .bind(folder_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("folder {}", folder_id)))?;

        row.try_into()
    }

    pub async fn list_folders(&self, workspace_id: Uuid) -> Result<Vec<Folder>> {
        list_folders(&self.pool, workspace_id).await
    }
}

pub(crate) async fn list_folders<'e, E: SqliteExecutor<'e>>(executor: E, workspace_id: Uuid) -> Result<Vec<Folder>> {
    let rows = sqlx::query_as::<_, FolderRow>("SELECT * FROM folder WHERE workspace_id = ? ORDER BY display_name")
        .bind(workspace_id.to_string())
        .fetch_all(executor)
        .await?;

    rows.into_iter().map(Folder::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct FolderRow {
    workspace_id: String,
    folder_id: String,
    display_name: String,
    description: Option<String>,
    parent_folder_id: Option<String>,
}

impl TryFrom<FolderRow> for Folder {
    type Error = OrchestratorError;

    fn try_from(row: FolderRow) -> Result<Self> {
        Ok(Self {
            workspace_id: super::parse_uuid(&row.workspace_id)?,
            folder_id: super::parse_uuid(&row.folder_id)?,
            display_name: row.display_name,
            description: row.description,
            parent_folder_id: super::parse_optional_uuid(row.parent_folder_id)?,
        })
    }
}
