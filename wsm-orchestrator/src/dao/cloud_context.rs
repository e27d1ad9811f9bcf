use super::activity::{insert_activity, ActivityChangeType, ActivitySubjectType};
use super::resource::count_controlled_on_platform;
use super::state::{self, StateTarget};
use crate::error::{OrchestratorError, Result};
use crate::model::{CloudContext, CloudContextCommonFields, CloudContextRecord, CloudPlatform};
use crate::state::{StateRule, WsmResourceState};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

/// Rows of the `cloud_context` table, one per (workspace, platform).
#[derive(Clone)]
pub struct CloudContextDao {
    pool: SqlitePool,
}

impl CloudContextDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reserve the (workspace, platform) pair with a CREATING placeholder owned by `flight_id`.
    pub async fn create_start(
        &self,
        workspace_id: Uuid,
        platform: CloudPlatform,
        spend_profile: Option<&str>,
        flight_id: &str,
    ) -> Result<()> {
        let target = StateTarget::CloudContext {
            workspace_id,
            platform,
        };
        let mut tx = self.pool.begin().await?;

        let row = state::fetch_state(&mut tx, target).await?;
        if state::is_in_state(row.as_ref(), WsmResourceState::Creating, Some(flight_id)) {
            info!("Cloud context create start already done for {}", target);
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO cloud_context (workspace_id, cloud_platform, context, spend_profile, creating_flight, state, flight_id, error)
            VALUES (?, ?, NULL, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(workspace_id.to_string())
        .bind(platform)
        .bind(spend_profile)
        .bind(flight_id)
        .bind(WsmResourceState::Creating)
        .bind(flight_id)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if super::is_unique_violation(&e) => {
                return Err(OrchestratorError::DuplicateResource(format!(
                    "workspace {} already has a {} cloud context",
                    workspace_id, platform
                )));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        info!("Inserted CREATING placeholder for {}", target);
        Ok(())
    }

    /// Flip the placeholder to READY, store the serialized context and log the creation, all in
    /// one transaction.
    pub async fn create_success(
        &self,
        workspace_id: Uuid,
        context: &CloudContext,
        flight_id: &str,
        actor_email: &str,
    ) -> Result<()> {
        let platform = context.platform();
        let target = StateTarget::CloudContext {
            workspace_id,
            platform,
        };
        let serialized = context.serialize()?;
        let mut tx = self.pool.begin().await?;

        let row = state::fetch_state(&mut tx, target).await?;
        if state::is_in_state(row.as_ref(), WsmResourceState::Ready, None) {
            info!("Cloud context create finish already done for {}", target);
            return Ok(());
        }

        state::update_state(&mut tx, target, Some(flight_id), None, WsmResourceState::Ready, None).await?;

        sqlx::query("UPDATE cloud_context SET context = ? WHERE workspace_id = ? AND cloud_platform = ?")
            .bind(serialized)
            .bind(workspace_id.to_string())
            .bind(platform)
            .execute(&mut *tx)
            .await?;
        insert_activity(
            &mut *tx,
            workspace_id,
            ActivityChangeType::Create,
            actor_email,
            &workspace_id.to_string(),
            ActivitySubjectType::cloud_context(platform)?,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Undo of [`create_start`](Self::create_start), honouring the state rule.
    pub async fn create_failure(
        &self,
        workspace_id: Uuid,
        platform: CloudPlatform,
        flight_id: &str,
        error: &str,
        rule: StateRule,
    ) -> Result<()> {
        match rule {
            StateRule::DeleteOnFailure => {
                if self
                    .delete_with_flight_id_validation(workspace_id, platform, flight_id)
                    .await?
                    || self.get_record(workspace_id, platform).await?.is_none()
                {
                    return Ok(());
                }
                warn!(
                    "{} cloud context of workspace {} is not owned by flight {}; left in place",
                    platform, workspace_id, flight_id
                );
                Err(OrchestratorError::StaleState(format!(
                    "{} cloud context of workspace {} is no longer owned by flight {}",
                    platform, workspace_id, flight_id
                )))
            }
            StateRule::BrokenOnFailure => {
                let target = StateTarget::CloudContext {
                    workspace_id,
                    platform,
                };
                let mut tx = self.pool.begin().await?;
                if state::fetch_state(&mut tx, target).await?.is_none() {
                    warn!("No {} to mark broken", target);
                    return Ok(());
                }
                state::update_state(
                    &mut tx,
                    target,
                    Some(flight_id),
                    None,
                    WsmResourceState::Broken,
                    Some(error),
                )
                .await?;
                tx.commit().await?;
                Ok(())
            }
        }
    }

    /// Claim a READY context for deletion. The controlled-resource count is read in the same
    /// transaction as the claim, so a resource inserted concurrently either shows up in the
    /// count or makes one of the two writers fail.
    pub async fn delete_start(&self, workspace_id: Uuid, platform: CloudPlatform, flight_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let remaining = count_controlled_on_platform(&mut *tx, workspace_id, platform).await?;
        if remaining > 0 {
            return Err(OrchestratorError::InvalidInput(format!(
                "workspace {} still has {} controlled {} resources",
                workspace_id, remaining, platform
            )));
        }

        state::update_state(
            &mut tx,
            StateTarget::CloudContext {
                workspace_id,
                platform,
            },
            None,
            Some(flight_id),
            WsmResourceState::Deleting,
            None,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove a DELETING row owned by `flight_id` and log the deletion. An absent row means a
    /// retry.
    pub async fn delete_success(
        &self,
        workspace_id: Uuid,
        platform: CloudPlatform,
        flight_id: &str,
        actor_email: &str,
    ) -> Result<()> {
        let target = StateTarget::CloudContext {
            workspace_id,
            platform,
        };
        let mut tx = self.pool.begin().await?;
        if state::fetch_state(&mut tx, target).await?.is_none() {
            return Ok(());
        }

        state::update_state(
            &mut tx,
            target,
            Some(flight_id),
            Some(flight_id),
            WsmResourceState::NotExists,
            None,
        )
        .await?;

        sqlx::query("DELETE FROM cloud_context WHERE workspace_id = ? AND cloud_platform = ? AND flight_id = ?")
            .bind(workspace_id.to_string())
            .bind(platform)
            .bind(flight_id)
            .execute(&mut *tx)
            .await?;
        insert_activity(
            &mut *tx,
            workspace_id,
            ActivityChangeType::Delete,
            actor_email,
            &workspace_id.to_string(),
            ActivitySubjectType::cloud_context(platform)?,
        )
        .await?;

        tx.commit().await?;
        info!("Deleted {}", target);
        Ok(())
    }

    /// Undo of [`delete_start`](Self::delete_start).
    pub async fn delete_failure(&self, workspace_id: Uuid, platform: CloudPlatform, flight_id: &str) -> Result<()> {
        let target = StateTarget::CloudContext {
            workspace_id,
            platform,
        };
        let mut tx = self.pool.begin().await?;
        if state::fetch_state(&mut tx, target).await?.is_none() {
            return Ok(());
        }
        state::update_state(
            &mut tx,
            target,
            Some(flight_id),
            None,
            WsmResourceState::Ready,
            None,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete the row only while `flight_id` still owns it. Returns true when a row went away.
    pub async fn delete_with_flight_id_validation(
        &self,
        workspace_id: Uuid,
        platform: CloudPlatform,
        flight_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cloud_context WHERE workspace_id = ? AND cloud_platform = ? AND flight_id = ?")
            .bind(workspace_id.to_string())
            .bind(platform)
            .bind(flight_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted {} cloud context of workspace {} for flight {}", platform, workspace_id, flight_id);
        }
        Ok(deleted)
    }

    pub async fn get_record(&self, workspace_id: Uuid, platform: CloudPlatform) -> Result<Option<CloudContextRecord>> {
        let row = sqlx::query_as::<_, CloudContextRow>(
            "SELECT * FROM cloud_context WHERE workspace_id = ? AND cloud_platform = ?",
        )
        .bind(workspace_id.to_string())
        .bind(platform)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CloudContextRecord::try_from).transpose()
    }

    /// The deserialized context, only once the row is READY.
    pub async fn get_ready_context(&self, workspace_id: Uuid, platform: CloudPlatform) -> Result<Option<CloudContext>> {
        Ok(self
            .get_record(workspace_id, platform)
            .await?
            .filter(|r| r.common.state == WsmResourceState::Ready)
            .and_then(|r| r.context))
    }

    pub async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<CloudContextRecord>> {
        list_cloud_contexts(&self.pool, workspace_id).await
    }
}

pub(crate) async fn list_cloud_contexts<'e, E: SqliteExecutor<'e>>(
    executor: E,
    workspace_id: Uuid,
) -> Result<Vec<CloudContextRecord>> {
    let rows = sqlx::query_as::<_, CloudContextRow>(
        "SELECT * FROM cloud_context WHERE workspace_id = ? ORDER BY cloud_platform",
    )
    .bind(workspace_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(CloudContextRecord::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct CloudContextRow {
    workspace_id: String,
    cloud_platform: CloudPlatform,
    context: Option<String>,
    spend_profile: Option<String>,
    state: WsmResourceState,
    flight_id: Option<String>,
    error: Option<String>,
}

impl TryFrom<CloudContextRow> for CloudContextRecord {
    type Error = OrchestratorError;

    fn try_from(row: CloudContextRow) -> Result<Self> {
        let context = row
            .context
            .as_deref()
            .map(|json| CloudContext::deserialize(row.cloud_platform, json))
            .transpose()?;

        Ok(Self {
            workspace_id: super::parse_uuid(&row.workspace_id)?,
            platform: row.cloud_platform,
            common: CloudContextCommonFields {
                spend_profile: row.spend_profile,
                state: row.state,
                flight_id: row.flight_id,
                error: row.error,
            },
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{ActivityLogDao, ResourceDao, WorkspaceDao};
    use crate::model::{
        AccessScope, AwsCloudContext, CloningInstructions, ControlledFields, ManagedBy, ResourceAttributes, Workspace,
        WsmResource,
    };
    use crate::state::PrivateResourceState;
    use crate::test_utils::create_test_db;

    async fn setup() -> (CloudContextDao, Uuid) {
        let pool = create_test_db().await;
        let workspace_id = Uuid::new_v4();
        WorkspaceDao::new(pool.clone())
            .create_workspace(&Workspace {
                workspace_id,
                user_facing_id: format!("ws-{}", workspace_id.simple()),
                display_name: None,
                description: None,
                spend_profile: None,
                created_by_email: None,
                created_date: chrono::Utc::now(),
            })
            .await
            .expect("Failed to create workspace");
        (CloudContextDao::new(pool), workspace_id)
    }

    fn aws_context() -> CloudContext {
        CloudContext::Aws(AwsCloudContext {
            organization_id: "o-1".to_string(),
            account_id: "1".to_string(),
            tenant_alias: "t".to_string(),
            environment_alias: "dev".to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_start_is_retry_safe_and_exclusive() {
        let (dao, ws) = setup().await;

        dao.create_start(ws, CloudPlatform::Aws, None, "flight-1")
            .await
            .expect("Failed to start create");
        dao.create_start(ws, CloudPlatform::Aws, None, "flight-1")
            .await
            .expect("Retry of create start should succeed");

        match dao.create_start(ws, CloudPlatform::Aws, None, "flight-2").await {
            Err(OrchestratorError::DuplicateResource(_)) => {}
            other => panic!("Expected DuplicateResource, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_success_stores_context() {
        let (dao, ws) = setup().await;
        dao.create_start(ws, CloudPlatform::Aws, Some("spend-1"), "flight-1")
            .await
            .expect("Failed to start create");

        assert!(dao.get_ready_context(ws, CloudPlatform::Aws).await.unwrap().is_none());

        dao.create_success(ws, &aws_context(), "flight-1", "alice@example.com")
            .await
            .expect("Failed to finish create");
        dao.create_success(ws, &aws_context(), "flight-1", "alice@example.com")
            .await
            .expect("Retry of create success should succeed");

        let record = dao.get_record(ws, CloudPlatform::Aws).await.unwrap().unwrap();
        assert_eq!(record.common.state, WsmResourceState::Ready);
        assert_eq!(record.common.flight_id, None);
        assert_eq!(record.common.spend_profile.as_deref(), Some("spend-1"));
        assert_eq!(record.context, Some(aws_context()));
    }

    #[tokio::test]
    async fn test_create_failure_rules() {
        let (dao, ws) = setup().await;

        dao.create_start(ws, CloudPlatform::Aws, None, "flight-1").await.unwrap();
        dao.create_failure(ws, CloudPlatform::Aws, "flight-1", "boom", StateRule::DeleteOnFailure)
            .await
            .expect("Failed to apply delete rule");
        assert!(dao.get_record(ws, CloudPlatform::Aws).await.unwrap().is_none());

        dao.create_start(ws, CloudPlatform::Aws, None, "flight-2").await.unwrap();
        dao.create_failure(ws, CloudPlatform::Aws, "flight-2", "boom", StateRule::BrokenOnFailure)
            .await
            .expect("Failed to apply broken rule");
        let record = dao.get_record(ws, CloudPlatform::Aws).await.unwrap().unwrap();
        assert_eq!(record.common.state, WsmResourceState::Broken);
        assert_eq!(record.common.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_delete_with_flight_id_validation_only_removes_own_row() {
        let (dao, ws) = setup().await;
        dao.create_start(ws, CloudPlatform::Aws, None, "flight-1").await.unwrap();

        assert!(!dao
            .delete_with_flight_id_validation(ws, CloudPlatform::Aws, "flight-other")
            .await
            .unwrap());
        assert!(dao
            .delete_with_flight_id_validation(ws, CloudPlatform::Aws, "flight-1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_two_phase_delete() {
        let (dao, ws) = setup().await;
        dao.create_start(ws, CloudPlatform::Aws, None, "create").await.unwrap();
        dao.create_success(ws, &aws_context(), "create", "alice@example.com").await.unwrap();

        dao.delete_start(ws, CloudPlatform::Aws, "delete").await.unwrap();
        let record = dao.get_record(ws, CloudPlatform::Aws).await.unwrap().unwrap();
        assert_eq!(record.common.state, WsmResourceState::Deleting);
        assert_eq!(record.common.flight_id.as_deref(), Some("delete"));

        match dao.delete_start(ws, CloudPlatform::Aws, "other-delete").await {
            Err(OrchestratorError::StaleState(_)) => {}
            other => panic!("Expected StaleState, got {:?}", other),
        }

        dao.delete_success(ws, CloudPlatform::Aws, "delete", "alice@example.com").await.unwrap();
        dao.delete_success(ws, CloudPlatform::Aws, "delete", "alice@example.com").await.unwrap();
        assert!(dao.get_record(ws, CloudPlatform::Aws).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_failure_restores_ready() {
        let (dao, ws) = setup().await;
        dao.create_start(ws, CloudPlatform::Aws, None, "create").await.unwrap();
        dao.create_success(ws, &aws_context(), "create", "alice@example.com").await.unwrap();
        dao.delete_start(ws, CloudPlatform::Aws, "delete").await.unwrap();

        dao.delete_failure(ws, CloudPlatform::Aws, "delete").await.unwrap();
        assert_eq!(
            dao.get_ready_context(ws, CloudPlatform::Aws).await.unwrap(),
            Some(aws_context())
        );
    }

    fn aws_folder(workspace_id: Uuid) -> WsmResource {
        WsmResource {
            workspace_id,
            resource_id: Uuid::new_v4(),
            name: "folder".to_string(),
            description: None,
            cloning_instructions: CloningInstructions::CopyNothing,
            folder_id: None,
            attributes: ResourceAttributes::AwsStorageFolder {
                prefix: "folder".to_string(),
                region: "us-east-1".to_string(),
            },
            controlled: Some(ControlledFields {
                access_scope: AccessScope::Shared,
                managed_by: ManagedBy::User,
                assigned_user: None,
                private_resource_state: PrivateResourceState::NotApplicable,
                application_id: None,
                region: Some("us-east-1".to_string()),
            }),
            state: WsmResourceState::Creating,
            flight_id: None,
            error: None,
            created_by_flight: None,
            created_by_email: Some("alice@example.com".to_string()),
            created_date: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_delete_start_refuses_while_resources_remain() {
        let (dao, ws) = setup().await;
        dao.create_start(ws, CloudPlatform::Aws, None, "create").await.unwrap();
        dao.create_success(ws, &aws_context(), "create", "alice@example.com").await.unwrap();

        let resources = ResourceDao::new(dao.pool.clone());
        let folder = aws_folder(ws);
        resources.create_start(&folder, "resource-flight").await.unwrap();

        match dao.delete_start(ws, CloudPlatform::Aws, "delete").await {
            Err(OrchestratorError::InvalidInput(_)) => {}
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
        let record = dao.get_record(ws, CloudPlatform::Aws).await.unwrap().unwrap();
        assert_eq!(record.common.state, WsmResourceState::Ready);
        assert_eq!(record.common.flight_id, None);

        // Once the claim is taken, new resources on the platform are refused.
        resources
            .create_failure(ws, folder.resource_id, "resource-flight", "gone", StateRule::DeleteOnFailure)
            .await
            .unwrap();
        dao.delete_start(ws, CloudPlatform::Aws, "delete").await.unwrap();
        match resources.create_start(&aws_folder(ws), "late-flight").await {
            Err(OrchestratorError::CloudContextRequired(_)) => {}
            other => panic!("Expected CloudContextRequired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_failure_on_ready_context_is_stale() {
        let (dao, ws) = setup().await;
        dao.create_start(ws, CloudPlatform::Aws, None, "create").await.unwrap();
        dao.create_success(ws, &aws_context(), "create", "alice@example.com").await.unwrap();

        match dao
            .create_failure(ws, CloudPlatform::Aws, "create", "late", StateRule::DeleteOnFailure)
            .await
        {
            Err(OrchestratorError::StaleState(_)) => {}
            other => panic!("Expected StaleState, got {:?}", other),
        }
        assert!(dao.get_ready_context(ws, CloudPlatform::Aws).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_success_commits_with_activity() {
        let (dao, ws) = setup().await;
        dao.create_start(ws, CloudPlatform::Aws, None, "create").await.unwrap();

        sqlx::query("ALTER TABLE activity_log RENAME TO activity_log_moved")
            .execute(&dao.pool)
            .await
            .unwrap();
        assert!(dao
            .create_success(ws, &aws_context(), "create", "alice@example.com")
            .await
            .is_err());
        let record = dao.get_record(ws, CloudPlatform::Aws).await.unwrap().unwrap();
        assert_eq!(record.common.state, WsmResourceState::Creating);
        assert_eq!(record.context, None);

        sqlx::query("ALTER TABLE activity_log_moved RENAME TO activity_log")
            .execute(&dao.pool)
            .await
            .unwrap();
        dao.create_success(ws, &aws_context(), "create", "alice@example.com").await.unwrap();
        let changes = ActivityLogDao::new(dao.pool.clone()).list_changes(ws).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_subject_type, ActivitySubjectType::AwsCloudContext);
    }
}
