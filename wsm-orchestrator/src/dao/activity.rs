use crate::error::{OrchestratorError, Result};
use crate::model::CloudPlatform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityChangeType {
    Create,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivitySubjectType {
    Workspace,
    GcpCloudContext,
    AzureCloudContext,
    AwsCloudContext,
    Resource,
}

impl ActivitySubjectType {
    pub fn cloud_context(platform: CloudPlatform) -> Result<Self> {
        match platform {
            CloudPlatform::Gcp => Ok(Self::GcpCloudContext),
            CloudPlatform::Azure => Ok(Self::AzureCloudContext),
            CloudPlatform::Aws => Ok(Self::AwsCloudContext),
            CloudPlatform::Any => Err(OrchestratorError::InternalLogic(
                "the ANY platform has no cloud context".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLogEntry {
    pub workspace_id: String,
    pub change_date: i64,
    pub change_type: ActivityChangeType,
    pub actor_email: String,
    pub change_subject_id: String,
    pub change_subject_type: ActivitySubjectType,
}

impl ActivityLogEntry {
    pub fn changed_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.change_date, 0).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct ActivityLogDao {
    pool: SqlitePool,
}

impl ActivityLogDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn write_activity(
        &self,
        workspace_id: Uuid,
        change_type: ActivityChangeType,
        actor_email: &str,
        subject_id: &str,
        subject_type: ActivitySubjectType,
    ) -> Result<()> {
        insert_activity(&self.pool, workspace_id, change_type, actor_email, subject_id, subject_type).await
    }

    /// Most recent change in the workspace.
    pub async fn last_change(&self, workspace_id: Uuid) -> Result<Option<ActivityLogEntry>> {
        let entry = sqlx::query_as::<_, ActivityLogEntry>(
            r#"
            SELECT workspace_id, change_date, change_type, actor_email, change_subject_id, change_subject_type
            FROM activity_log WHERE workspace_id = ?
            ORDER BY change_date DESC, id DESC LIMIT 1
            "#,
        )
        .bind(workspace_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    pub async fn list_changes(&self, workspace_id: Uuid) -> Result<Vec<ActivityLogEntry>> {
        let entries = sqlx::query_as::<_, ActivityLogEntry>(
            r#"
            SELECT workspace_id, change_date, change_type, actor_email, change_subject_id, change_subject_type
            FROM activity_log WHERE workspace_id = ?
            ORDER BY id
            "#,
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

/// Append one entry. Lifecycle writes pass their own transaction so the entry commits with the
/// state change it records.
pub(crate) async fn insert_activity<'e, E: SqliteExecutor<'e>>(
    executor: E,
    workspace_id: Uuid,
    change_type: ActivityChangeType,
    actor_email: &str,
    subject_id: &str,
    subject_type: ActivitySubjectType,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO activity_log (workspace_id, change_date, change_type, actor_email, change_subject_id, change_subject_type)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(workspace_id.to_string())
    .bind(Utc::now().timestamp())
    .bind(change_type)
    .bind(actor_email)
    .bind(subject_id)
    .bind(subject_type)
    .execute(executor)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[tokio::test]
    async fn test_last_change_is_newest() {
        let dao = ActivityLogDao::new(create_test_db().await);
        let ws = Uuid::new_v4();

        assert!(dao.last_change(ws).await.unwrap().is_none());

        dao.write_activity(ws, ActivityChangeType::Create, "a@x", "r1", ActivitySubjectType::Resource)
            .await
            .unwrap();
        dao.write_activity(ws, ActivityChangeType::Delete, "b@x", "r1", ActivitySubjectType::Resource)
            .await
            .unwrap();

        let last = dao.last_change(ws).await.unwrap().expect("Expected an entry");
        assert_eq!(last.change_type, ActivityChangeType::Delete);
        assert_eq!(last.actor_email, "b@x");
        assert_eq!(dao.list_changes(ws).await.unwrap().len(), 2);
    }

    #[test]
    fn test_cloud_context_subject_per_platform() {
        assert_eq!(
            ActivitySubjectType::cloud_context(CloudPlatform::Azure).unwrap(),
            ActivitySubjectType::AzureCloudContext
        );
        assert!(ActivitySubjectType::cloud_context(CloudPlatform::Any).is_err());
    }
}
