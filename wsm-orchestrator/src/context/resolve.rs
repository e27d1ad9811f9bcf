use super::CloudContextService;
use crate::flight::{FlightContext, Step, StepResult};
use crate::keys;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Load the workspace's READY context for one platform into the working map.
///
/// Read-only. Skips the lookup when an earlier step already put the context there.
pub(crate) struct ResolveCloudContextStep {
    service: Arc<dyn CloudContextService>,
}

impl ResolveCloudContextStep {
    pub(crate) fn new(service: Arc<dyn CloudContextService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Step for ResolveCloudContextStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        if ctx.working().contains(&keys::CLOUD_CONTEXT) {
            debug!("Cloud context already resolved");
            return Ok(());
        }

        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let context = self.service.get_required_context(workspace_id).await?;
        ctx.working_mut().put(&keys::CLOUD_CONTEXT, &context)?;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AwsContextService;
    use crate::dao::{CloudContextDao, WorkspaceDao};
    use crate::error::OrchestratorError;
    use crate::flight::{FlightMap, StepFailure};
    use crate::model::{AwsCloudContext, CloudContext, CloudPlatform, Workspace};
    use crate::test_utils::create_test_db;
    use chrono::Utc;
    use uuid::Uuid;

    fn aws_context() -> CloudContext {
        CloudContext::Aws(AwsCloudContext {
            organization_id: "o-1".to_string(),
            account_id: "123456789012".to_string(),
            tenant_alias: "t".to_string(),
            environment_alias: "dev".to_string(),
        })
    }

    async fn setup() -> (CloudContextDao, Uuid) {
        let pool = create_test_db().await;
        let workspace_id = Uuid::new_v4();
        WorkspaceDao::new(pool.clone())
            .create_workspace(&Workspace {
                workspace_id,
                user_facing_id: "resolve-ws".to_string(),
                display_name: None,
                description: None,
                spend_profile: None,
                created_by_email: None,
                created_date: Utc::now(),
            })
            .await
            .unwrap();
        (CloudContextDao::new(pool), workspace_id)
    }

    #[tokio::test]
    async fn test_missing_context_is_context_required() {
        let (dao, workspace_id) = setup().await;
        let step = ResolveCloudContextStep::new(Arc::new(AwsContextService::new(dao, None)));
        let inputs = FlightMap::new().with(&keys::WORKSPACE_ID, &workspace_id).unwrap();
        let mut ctx = FlightContext::new("f1", "Test", inputs);

        match step.execute(&mut ctx).await {
            Err(StepFailure::Fatal(OrchestratorError::CloudContextRequired(_))) => {}
            other => panic!("Expected CloudContextRequired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolves_ready_context_once() {
        let (dao, workspace_id) = setup().await;
        dao.create_start(workspace_id, CloudPlatform::Aws, None, "ctx-flight").await.unwrap();
        dao.create_success(workspace_id, &aws_context(), "ctx-flight", "alice@example.com").await.unwrap();

        let step = ResolveCloudContextStep::new(Arc::new(AwsContextService::new(dao.clone(), None)));
        let inputs = FlightMap::new().with(&keys::WORKSPACE_ID, &workspace_id).unwrap();
        let mut ctx = FlightContext::new("f1", "Test", inputs);
        step.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.working().get(&keys::CLOUD_CONTEXT).unwrap(), Some(aws_context()));

        // A second run keeps what is already in the working map.
        dao.delete_start(workspace_id, CloudPlatform::Aws, "del").await.unwrap();
        step.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.working().get(&keys::CLOUD_CONTEXT).unwrap(), Some(aws_context()));
    }
}
