use super::activity::{insert_activity, ActivityChangeType, ActivitySubjectType};
use super::state::{self, StateTarget};
use crate::error::{OrchestratorError, Result};
use crate::model::{
    AccessScope, CloningInstructions, CloudPlatform, ControlledFields, ManagedBy, ResourceAttributes,
    ResourceType, StewardshipType, WsmResource,
};
use crate::state::{PrivateResourceState, StateRule, WsmResourceState};
use chrono::DateTime;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ResourceDao {
    pool: SqlitePool,
}

impl ResourceDao {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a controlled resource row as CREATING, owned by `flight_id`.
    ///
    /// Rejects resources whose platform has no READY cloud context, and any id or name already
    /// taken in the workspace.
    pub async fn create_start(&self, resource: &WsmResource, flight_id: &str) -> Result<()> {
        let target = StateTarget::Resource {
            workspace_id: resource.workspace_id,
            resource_id: resource.resource_id,
        };
        let mut tx = self.pool.begin().await?;

        let row = state::fetch_state(&mut tx, target).await?;
        if state::is_in_state(row.as_ref(), WsmResourceState::Creating, Some(flight_id)) {
            info!("Resource create start already done for {}", target);
            return Ok(());
        }

        let platform = resource.platform();
        if platform != CloudPlatform::Any {
            let ready: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM cloud_context WHERE workspace_id = ? AND cloud_platform = ? AND state = ?",
            )
            .bind(resource.workspace_id.to_string())
            .bind(platform)
            .bind(WsmResourceState::Ready)
            .fetch_optional(&mut *tx)
            .await?;

            if ready.is_none() {
                return Err(OrchestratorError::CloudContextRequired(format!(
                    "workspace {} has no {} cloud context",
                    resource.workspace_id, platform
                )));
            }
        }

        insert_resource(&mut tx, resource, WsmResourceState::Creating, Some(flight_id)).await?;
        tx.commit().await?;

        info!(
            "Inserted CREATING {:?} {} ({}) for flight {}",
            resource.resource_type(),
            resource.resource_id,
            resource.name,
            flight_id
        );
        Ok(())
    }

    /// Flip the row to READY and log the creation in the same transaction.
    pub async fn create_success(
        &self,
        workspace_id: Uuid,
        resource_id: Uuid,
        flight_id: &str,
        actor_email: &str,
    ) -> Result<()> {
        let target = StateTarget::Resource {
            workspace_id,
            resource_id,
        };
        let mut tx = self.pool.begin().await?;
        let row = state::fetch_state(&mut tx, target).await?;
        if state::is_in_state(row.as_ref(), WsmResourceState::Ready, None) {
            info!("Resource create finish already done for {}", target);
            return Ok(());
        }

        state::update_state(&mut tx, target, Some(flight_id), None, WsmResourceState::Ready, None).await?;
        insert_activity(
            &mut *tx,
            workspace_id,
            ActivityChangeType::Create,
            actor_email,
            &resource_id.to_string(),
            ActivitySubjectType::Resource,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Undo of [`create_start`](Self::create_start). A missing row is already undone.
    pub async fn create_failure(
        &self,
        workspace_id: Uuid,
        resource_id: Uuid,
        flight_id: &str,
        error: &str,
        rule: StateRule,
    ) -> Result<()> {
        let target = StateTarget::Resource {
            workspace_id,
            resource_id,
        };
        let mut tx = self.pool.begin().await?;
        if state::fetch_state(&mut tx, target).await?.is_none() {
            return Ok(());
        }

        match rule {
            StateRule::DeleteOnFailure => {
                let result = sqlx::query(
                    "DELETE FROM resource WHERE workspace_id = ? AND resource_id = ? AND flight_id = ?",
                )
                .bind(workspace_id.to_string())
                .bind(resource_id.to_string())
                .bind(flight_id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    warn!("{} is not owned by flight {}; left in place", target, flight_id);
                    return Err(OrchestratorError::StaleState(format!(
                        "{} is no longer owned by flight {}",
                        target, flight_id
                    )));
                }
                info!("Deleted {} after failed create", target);
            }
            StateRule::BrokenOnFailure => {
                state::update_state(
                    &mut tx,
                    target,
                    Some(flight_id),
                    None,
                    WsmResourceState::Broken,
                    Some(error),
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Claim a READY or BROKEN resource for deletion.
    pub async fn delete_start(&self, workspace_id: Uuid, resource_id: Uuid, flight_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        state::update_state(
            &mut tx,
            StateTarget::Resource {
                workspace_id,
                resource_id,
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
        resource_id: Uuid,
        flight_id: &str,
        actor_email: &str,
    ) -> Result<()> {
        let target = StateTarget::Resource {
            workspace_id,
            resource_id,
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

        sqlx::query("DELETE FROM resource WHERE workspace_id = ? AND resource_id = ?")
            .bind(workspace_id.to_string())
            .bind(resource_id.to_string())
            .execute(&mut *tx)
            .await?;
        insert_activity(
            &mut *tx,
            workspace_id,
            ActivityChangeType::Delete,
            actor_email,
            &resource_id.to_string(),
            ActivitySubjectType::Resource,
        )
        .await?;

        tx.commit().await?;
        info!("Deleted {}", target);
        Ok(())
    }

    /// Undo of [`delete_start`](Self::delete_start).
    pub async fn delete_failure(&self, workspace_id: Uuid, resource_id: Uuid, flight_id: &str) -> Result<()> {
        let target = StateTarget::Resource {
            workspace_id,
            resource_id,
        };
        let mut tx = self.pool.begin().await?;
        if state::fetch_state(&mut tx, target).await?.is_none() {
            return Ok(());
        }
        state::update_state(&mut tx, target, Some(flight_id), None, WsmResourceState::Ready, None).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Referenced resources carry no cloud state, so they go straight to READY.
    pub async fn create_referenced(&self, resource: &WsmResource) -> Result<()> {
        if resource.stewardship() != StewardshipType::Referenced {
            return Err(OrchestratorError::InternalLogic(format!(
                "resource {} is not a referenced resource",
                resource.resource_id
            )));
        }
        let mut conn = self.pool.acquire().await?;
        insert_resource(&mut conn, resource, WsmResourceState::Ready, None).await?;
        info!("Inserted referenced resource {} ({})", resource.resource_id, resource.name);
        Ok(())
    }

    /// Returns true when a referenced resource row was removed.
    pub async fn delete_referenced(&self, workspace_id: Uuid, resource_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM resource WHERE workspace_id = ? AND resource_id = ? AND stewardship_type = ?",
        )
        .bind(workspace_id.to_string())
        .bind(resource_id.to_string())
        .bind(StewardshipType::Referenced)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_resource(&self, workspace_id: Uuid, resource_id: Uuid) -> Result<WsmResource> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE workspace_id = ? AND resource_id = ?")
            .bind(workspace_id.to_string())
            .bind(resource_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("resource {} in workspace {}", resource_id, workspace_id))
            })?;

        row.try_into()
    }

    pub async fn get_resource_by_name(&self, workspace_id: Uuid, name: &str) -> Result<WsmResource> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE workspace_id = ? AND name = ?")
            .bind(workspace_id.to_string())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("resource {} in workspace {}", name, workspace_id)))?;

        row.try_into()
    }

    pub async fn list_resources(&self, workspace_id: Uuid) -> Result<Vec<WsmResource>> {
        let rows = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE workspace_id = ? ORDER BY name")
            .bind(workspace_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(WsmResource::try_from).collect()
    }

    /// Count controlled resources still living on `platform`.
    pub async fn count_controlled_on_platform(&self, workspace_id: Uuid, platform: CloudPlatform) -> Result<i64> {
        count_controlled_on_platform(&self.pool, workspace_id, platform).await
    }

    pub async fn set_private_state(
        &self,
        workspace_id: Uuid,
        resource_id: Uuid,
        private_state: PrivateResourceState,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE resource SET private_resource_state = ? WHERE workspace_id = ? AND resource_id = ? AND access_scope = ?",
        )
        .bind(private_state)
        .bind(workspace_id.to_string())
        .bind(resource_id.to_string())
        .bind(AccessScope::Private)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(OrchestratorError::InternalLogic(format!(
                "no private resource {} in workspace {}",
                resource_id, workspace_id
            )));
        }
        info!("Private resource {} is now {:?}", resource_id, private_state);
        Ok(())
    }
}

async fn insert_resource(
    conn: &mut SqliteConnection,
    resource: &WsmResource,
    resource_state: WsmResourceState,
    flight_id: Option<&str>,
) -> Result<()> {
    let controlled = resource.controlled.as_ref();
    let result = sqlx::query(
        r#"
        INSERT INTO resource (
            workspace_id, resource_id, name, description, stewardship_type, resource_type,
            cloud_platform, cloning_instructions, folder_id, attributes, access_scope, managed_by,
            assigned_user, private_resource_state, application_id, region, state, flight_id,
            error, created_by_flight, created_by_email, created_date
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
        "#,
    )
    .bind(resource.workspace_id.to_string())
    .bind(resource.resource_id.to_string())
    .bind(&resource.name)
    .bind(&resource.description)
    .bind(resource.stewardship())
    .bind(resource.resource_type())
    .bind(resource.platform())
    .bind(resource.cloning_instructions)
    .bind(resource.folder_id.map(|id| id.to_string()))
    .bind(resource.attributes.to_versioned_json()?)
    .bind(controlled.map(|c| c.access_scope))
    .bind(controlled.map(|c| c.managed_by))
    .bind(controlled.and_then(|c| c.assigned_user.clone()))
    .bind(controlled.map(|c| c.private_resource_state))
    .bind(controlled.and_then(|c| c.application_id.clone()))
    .bind(controlled.and_then(|c| c.region.clone()))
    .bind(resource_state)
    .bind(flight_id)
    .bind(flight_id)
    .bind(&resource.created_by_email)
    .bind(resource.created_date.timestamp())
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if super::is_unique_violation(&e) => Err(OrchestratorError::DuplicateResource(format!(
            "a resource with id {} or name {} already exists in workspace {}",
            resource.resource_id, resource.name, resource.workspace_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// READY resources whose cloning instructions ask for something to be copied.
pub(crate) async fn count_controlled_on_platform<'e, E: SqliteExecutor<'e>>(
    executor: E,
    workspace_id: Uuid,
    platform: CloudPlatform,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM resource WHERE workspace_id = ? AND cloud_platform = ? AND stewardship_type = ?",
    )
    .bind(workspace_id.to_string())
    .bind(platform)
    .bind(StewardshipType::Controlled)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub(crate) async fn list_cloneable_resources<'e, E: SqliteExecutor<'e>>(
    executor: E,
    workspace_id: Uuid,
) -> Result<Vec<WsmResource>> {
    let rows = sqlx::query_as::<_, ResourceRow>(
        "SELECT * FROM resource WHERE workspace_id = ? AND state = ? AND cloning_instructions != ? ORDER BY name",
    )
    .bind(workspace_id.to_string())
    .bind(WsmResourceState::Ready)
    .bind(CloningInstructions::CopyNothing)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(WsmResource::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    workspace_id: String,
    resource_id: String,
    name: String,
    description: Option<String>,
    stewardship_type: StewardshipType,
    resource_type: ResourceType,
    cloning_instructions: CloningInstructions,
    folder_id: Option<String>,
    attributes: String,
    access_scope: Option<AccessScope>,
    managed_by: Option<ManagedBy>,
    assigned_user: Option<String>,
    private_resource_state: Option<PrivateResourceState>,
    application_id: Option<String>,
    region: Option<String>,
    state: WsmResourceState,
    flight_id: Option<String>,
    error: Option<String>,
    created_by_flight: Option<String>,
    created_by_email: Option<String>,
    created_date: i64,
}

impl TryFrom<ResourceRow> for WsmResource {
    type Error = OrchestratorError;

    fn try_from(row: ResourceRow) -> Result<Self> {
        let attributes = ResourceAttributes::from_versioned_json(&row.attributes)?;
        if attributes.resource_type() != row.resource_type {
            return Err(OrchestratorError::InternalLogic(format!(
                "resource {} stored as {:?} but attributes describe {:?}",
                row.resource_id,
                row.resource_type,
                attributes.resource_type()
            )));
        }

        let controlled = match (row.stewardship_type, row.access_scope, row.managed_by) {
            (StewardshipType::Controlled, Some(access_scope), Some(managed_by)) => Some(ControlledFields {
                access_scope,
                managed_by,
                assigned_user: row.assigned_user,
                private_resource_state: row
                    .private_resource_state
                    .unwrap_or(PrivateResourceState::NotApplicable),
                application_id: row.application_id,
                region: row.region,
            }),
            (StewardshipType::Controlled, _, _) => {
                return Err(OrchestratorError::InternalLogic(format!(
                    "controlled resource {} is missing access scope or managed by",
                    row.resource_id
                )));
            }
            (StewardshipType::Referenced, _, _) => None,
        };

        Ok(Self {
            workspace_id: super::parse_uuid(&row.workspace_id)?,
            resource_id: super::parse_uuid(&row.resource_id)?,
            name: row.name,
            description: row.description,
            cloning_instructions: row.cloning_instructions,
            folder_id: super::parse_optional_uuid(row.folder_id)?,
            attributes,
            controlled,
            state: row.state,
            flight_id: row.flight_id,
            error: row.error,
            created_by_flight: row.created_by_flight,
            created_by_email: row.created_by_email,
            created_date: DateTime::from_timestamp(row.created_date, 0).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{ActivityLogDao, CloudContextDao, WorkspaceDao};
    use crate::model::{GcpCloudContext, CloudContext, Workspace};
    use crate::test_utils::create_test_db;
    use chrono::Utc;

    async fn setup() -> (SqlitePool, Uuid) {
        let pool = create_test_db().await;
        let workspace_id = Uuid::new_v4();
        WorkspaceDao::new(pool.clone())
            .create_workspace(&Workspace {
                workspace_id,
                user_facing_id: "resource-tests".to_string(),
                display_name: None,
                description: None,
                spend_profile: None,
                created_by_email: None,
                created_date: Utc::now(),
            })
            .await
            .expect("Failed to create workspace");
        (pool, workspace_id)
    }

    async fn add_gcp_context(pool: &SqlitePool, workspace_id: Uuid) {
        let dao = CloudContextDao::new(pool.clone());
        dao.create_start(workspace_id, CloudPlatform::Gcp, None, "ctx").await.unwrap();
        dao.create_success(
            workspace_id,
            &CloudContext::Gcp(GcpCloudContext {
                project_id: "p-1".to_string(),
                default_zone: None,
                policy_groups: None,
            }),
            "ctx",
            "alice@example.com",
        )
        .await
        .unwrap();
    }

    fn flexible(workspace_id: Uuid, name: &str) -> WsmResource {
        WsmResource {
            workspace_id,
            resource_id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            cloning_instructions: CloningInstructions::CopyDefinition,
            folder_id: None,
            attributes: ResourceAttributes::Flexible {
                type_namespace: "terra".to_string(),
                type_name: "note".to_string(),
                data: Some("{}".to_string()),
            },
            controlled: Some(ControlledFields {
                access_scope: AccessScope::Private,
                managed_by: ManagedBy::User,
                assigned_user: Some("alice@example.com".to_string()),
                private_resource_state: PrivateResourceState::Initializing,
                application_id: None,
                region: None,
            }),
            state: WsmResourceState::Creating,
            flight_id: None,
            error: None,
            created_by_flight: None,
            created_by_email: Some("alice@example.com".to_string()),
            created_date: Utc::now(),
        }
    }

    fn bucket(workspace_id: Uuid) -> WsmResource {
        let mut resource = flexible(workspace_id, "bucket");
        resource.attributes = ResourceAttributes::GcsBucket {
            bucket_name: "b-1".to_string(),
            location: None,
        };
        resource
    }

    #[tokio::test]
    async fn test_create_lifecycle() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool);
        let resource = flexible(ws, "notes");

        dao.create_start(&resource, "f1").await.expect("Failed to start create");
        dao.create_start(&resource, "f1").await.expect("Retry should succeed");

        let stored = dao.get_resource(ws, resource.resource_id).await.unwrap();
        assert_eq!(stored.state, WsmResourceState::Creating);
        assert_eq!(stored.flight_id.as_deref(), Some("f1"));
        assert_eq!(stored.created_by_flight.as_deref(), Some("f1"));
        assert_eq!(stored.attributes, resource.attributes);

        dao.create_success(ws, resource.resource_id, "f1", "alice@example.com").await.unwrap();
        dao.create_success(ws, resource.resource_id, "f1", "alice@example.com")
            .await
            .expect("Retry should succeed");
        let stored = dao.get_resource(ws, resource.resource_id).await.unwrap();
        assert_eq!(stored.state, WsmResourceState::Ready);
        assert_eq!(stored.flight_id, None);

        // One entry, committed with the READY transition.
        let changes = ActivityLogDao::new(dao.pool.clone()).list_changes(ws).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ActivityChangeType::Create);
        assert_eq!(changes[0].change_subject_id, resource.resource_id.to_string());
    }

    #[tokio::test]
    async fn test_create_success_rolls_back_without_activity_log() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool.clone());
        let resource = flexible(ws, "unlogged");
        dao.create_start(&resource, "f1").await.unwrap();

        sqlx::query("DROP TABLE activity_log").execute(&pool).await.unwrap();
        assert!(dao
            .create_success(ws, resource.resource_id, "f1", "alice@example.com")
            .await
            .is_err());

        let stored = dao.get_resource(ws, resource.resource_id).await.unwrap();
        assert_eq!(stored.state, WsmResourceState::Creating);
        assert_eq!(stored.flight_id.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn test_create_failure_on_ready_row_is_stale() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool);
        let resource = flexible(ws, "finished");
        dao.create_start(&resource, "f1").await.unwrap();
        dao.create_success(ws, resource.resource_id, "f1", "alice@example.com").await.unwrap();

        for rule in [StateRule::DeleteOnFailure, StateRule::BrokenOnFailure] {
            match dao.create_failure(ws, resource.resource_id, "f1", "late", rule).await {
                Err(OrchestratorError::StaleState(_)) => {}
                other => panic!("Expected StaleState for {:?}, got {:?}", rule, other),
            }
        }
        assert_eq!(
            dao.get_resource(ws, resource.resource_id).await.unwrap().state,
            WsmResourceState::Ready
        );
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool);

        dao.create_start(&flexible(ws, "same"), "f1").await.unwrap();
        match dao.create_start(&flexible(ws, "same"), "f2").await {
            Err(OrchestratorError::DuplicateResource(_)) => {}
            other => panic!("Expected DuplicateResource, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cloud_resource_requires_context() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool.clone());

        match dao.create_start(&bucket(ws), "f1").await {
            Err(OrchestratorError::CloudContextRequired(_)) => {}
            other => panic!("Expected CloudContextRequired, got {:?}", other),
        }

        add_gcp_context(&pool, ws).await;
        dao.create_start(&bucket(ws), "f1").await.expect("Context is now READY");
    }

    #[tokio::test]
    async fn test_create_failure_rules() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool);

        let deleted = flexible(ws, "deleted");
        dao.create_start(&deleted, "f1").await.unwrap();
        dao.create_failure(ws, deleted.resource_id, "f1", "boom", StateRule::DeleteOnFailure)
            .await
            .unwrap();
        assert!(matches!(
            dao.get_resource(ws, deleted.resource_id).await,
            Err(OrchestratorError::NotFound(_))
        ));
        dao.create_failure(ws, deleted.resource_id, "f1", "boom", StateRule::DeleteOnFailure)
            .await
            .expect("Undo of a missing row should succeed");

        let broken = flexible(ws, "broken");
        dao.create_start(&broken, "f2").await.unwrap();
        dao.create_failure(ws, broken.resource_id, "f2", "quota", StateRule::BrokenOnFailure)
            .await
            .unwrap();
        let stored = dao.get_resource(ws, broken.resource_id).await.unwrap();
        assert_eq!(stored.state, WsmResourceState::Broken);
        assert_eq!(stored.error.as_deref(), Some("quota"));

        dao.delete_start(ws, broken.resource_id, "f3")
            .await
            .expect("Broken resources can be deleted");
    }

    #[tokio::test]
    async fn test_delete_lifecycle() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool);
        let resource = flexible(ws, "doomed");
        dao.create_start(&resource, "c").await.unwrap();

        match dao.delete_start(ws, resource.resource_id, "d").await {
            Err(OrchestratorError::StaleState(_)) => {}
            other => panic!("Expected StaleState while creating, got {:?}", other),
        }

        dao.create_success(ws, resource.resource_id, "c", "alice@example.com").await.unwrap();
        dao.delete_start(ws, resource.resource_id, "d").await.unwrap();
        dao.delete_failure(ws, resource.resource_id, "d").await.unwrap();
        assert_eq!(
            dao.get_resource(ws, resource.resource_id).await.unwrap().state,
            WsmResourceState::Ready
        );

        dao.delete_start(ws, resource.resource_id, "d2").await.unwrap();
        dao.delete_success(ws, resource.resource_id, "d2", "alice@example.com").await.unwrap();
        dao.delete_success(ws, resource.resource_id, "d2", "alice@example.com").await.unwrap();
        assert!(dao.list_resources(ws).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_private_state_and_cloneable_listing() {
        let (pool, ws) = setup().await;
        let dao = ResourceDao::new(pool.clone());

        let mut skipped = flexible(ws, "skipped");
        skipped.cloning_instructions = CloningInstructions::CopyNothing;
        let kept = flexible(ws, "kept");
        for r in [&skipped, &kept] {
            dao.create_start(r, "f").await.unwrap();
            dao.create_success(ws, r.resource_id, "f", "alice@example.com").await.unwrap();
        }

        dao.set_private_state(ws, kept.resource_id, PrivateResourceState::Active)
            .await
            .unwrap();
        let stored = dao.get_resource_by_name(ws, "kept").await.unwrap();
        assert_eq!(
            stored.controlled.map(|c| c.private_resource_state),
            Some(PrivateResourceState::Active)
        );

        let cloneable = list_cloneable_resources(&pool, ws).await.unwrap();
        assert_eq!(cloneable.len(), 1);
        assert_eq!(cloneable[0].name, "kept");
    }
}
