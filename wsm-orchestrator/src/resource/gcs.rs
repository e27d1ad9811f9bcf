use super::steps::broker_ref;
use super::ResourceHandler;
use crate::cloud::{bucket_role, group_member, ignore_not_found, GcpClient};
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightPlan, RetryRule, Step, StepResult};
use crate::iam::{declared_roles, IdentityBroker, ServiceIdentity};
use crate::keys;
use crate::model::{ResourceAttributes, ResourceType, WsmResource};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct GcsBucketHandler {
    gcp: Arc<dyn GcpClient>,
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
}

impl GcsBucketHandler {
    pub fn new(gcp: Arc<dyn GcpClient>, broker: Arc<dyn IdentityBroker>, service_identity: ServiceIdentity) -> Self {
        Self {
            gcp,
            broker,
            service_identity,
        }
    }
}

impl ResourceHandler for GcsBucketHandler {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ControlledGcpGcsBucket
    }

    fn add_create_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(CreateGcsBucketStep { gcp: self.gcp.clone() }, RetryRule::cloud());
        plan.add_step(
            GcsBucketCloudSyncStep {
                gcp: self.gcp.clone(),
                broker: self.broker.clone(),
                service_identity: self.service_identity.clone(),
            },
            RetryRule::cloud(),
        );
        Ok(())
    }

    fn add_delete_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(DeleteGcsBucketStep { gcp: self.gcp.clone() }, RetryRule::cloud());
        Ok(())
    }
}

fn bucket_attributes(resource: &WsmResource) -> Result<(String, Option<String>)> {
    match &resource.attributes {
        ResourceAttributes::GcsBucket { bucket_name, location } => Ok((
            bucket_name.clone(),
            location
                .clone()
                .or_else(|| resource.controlled.as_ref().and_then(|c| c.region.clone())),
        )),
        other => Err(OrchestratorError::InternalLogic(format!(
            "bucket handler given {:?} attributes",
            other.resource_type()
        ))),
    }
}

fn project_id(ctx: &FlightContext) -> Result<String> {
    let context = ctx.working().require(&keys::CLOUD_CONTEXT)?;
    context
        .as_gcp()
        .map(|gcp| gcp.project_id.clone())
        .ok_or_else(|| OrchestratorError::InternalLogic(format!("expected a GCP context, got {}", context.platform())))
}

struct CreateGcsBucketStep {
    gcp: Arc<dyn GcpClient>,
}

impl CreateGcsBucketStep {
    /// Whether an existing bucket lives in the workspace's project.
    async fn in_project(&self, bucket_project_number: &str, project_id: &str) -> Result<bool> {
        let project = self
            .gcp
            .get_project(project_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("project {}", project_id)))?;
        Ok(project.project_number == bucket_project_number)
    }
}

#[async_trait]
impl Step for CreateGcsBucketStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (bucket_name, location) = bucket_attributes(&resource)?;
        let project_id = project_id(ctx)?;

        if let Some(existing) = self.gcp.get_bucket(&bucket_name).await? {
            if self.in_project(&existing.project_number, &project_id).await? {
                info!("Bucket {} already exists in project {}", bucket_name, project_id);
                return Ok(());
            }
            return Err(OrchestratorError::DuplicateResource(format!(
                "bucket name {} is already in use",
                bucket_name
            ))
            .into());
        }

        ctx.check_interrupted()?;
        self.gcp
            .create_bucket(&project_id, &bucket_name, location.as_deref())
            .await?;
        info!("Created bucket {} in project {}", bucket_name, project_id);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (bucket_name, _) = bucket_attributes(&resource)?;
        let project_id = project_id(ctx)?;

        let Some(existing) = self.gcp.get_bucket(&bucket_name).await? else {
            return Ok(());
        };
        if !self.in_project(&existing.project_number, &project_id).await? {
            warn!("Bucket {} belongs to another project; leaving it", bucket_name);
            return Ok(());
        }
        ignore_not_found(self.gcp.delete_bucket(&bucket_name).await)?;
        info!("Deleted bucket {}", bucket_name);
        Ok(())
    }
}

/// Bind the resource's broker-synced groups onto the bucket IAM policy.
struct GcsBucketCloudSyncStep {
    gcp: Arc<dyn GcpClient>,
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
}

#[async_trait]
impl Step for GcsBucketCloudSyncStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (bucket_name, _) = bucket_attributes(&resource)?;
        let target = broker_ref(&resource)?;

        let mut policy = self.gcp.get_bucket_iam_policy(&bucket_name).await?;
        for role in declared_roles(resource.category()?) {
            let group = self
                .broker
                .sync_policy_to_group(self.service_identity.token(), &target, role.as_str())
                .await?;
            policy.add_binding(bucket_role(*role), &group_member(&group));
            ctx.check_interrupted()?;
        }

        match self.gcp.set_bucket_iam_policy(&bucket_name, &policy).await {
            Ok(()) => Ok(()),
            Err(OrchestratorError::DuplicateResource(msg)) => {
                Err(OrchestratorError::RetryableRemote(format!("bucket policy changed concurrently: {}", msg)).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct DeleteGcsBucketStep {
    gcp: Arc<dyn GcpClient>,
}

#[async_trait]
impl Step for DeleteGcsBucketStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (bucket_name, _) = bucket_attributes(&resource)?;
        ignore_not_found(self.gcp.delete_bucket(&bucket_name).await)?;
        info!("Deleted bucket {}", bucket_name);
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;
    use crate::flight::{FlightMap, StepFailure};
    use crate::model::{
        AccessScope, CloningInstructions, CloudContext, ControlledFields, GcpCloudContext, ManagedBy,
    };
    use crate::state::{PrivateResourceState, WsmResourceState};
    use chrono::Utc;
    use uuid::Uuid;

    fn bucket_resource(name: &str) -> WsmResource {
        WsmResource {
            workspace_id: Uuid::new_v4(),
            resource_id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            cloning_instructions: CloningInstructions::CopyNothing,
            folder_id: None,
            attributes: ResourceAttributes::GcsBucket {
                bucket_name: name.to_string(),
                location: Some("US".to_string()),
            },
            controlled: Some(ControlledFields {
                access_scope: AccessScope::Shared,
                managed_by: ManagedBy::User,
                assigned_user: None,
                private_resource_state: PrivateResourceState::NotApplicable,
                application_id: None,
                region: None,
            }),
            state: WsmResourceState::Creating,
            flight_id: None,
            error: None,
            created_by_flight: None,
            created_by_email: None,
            created_date: Utc::now(),
        }
    }

    fn context_for(cloud: &FakeCloud, project_id: &str, resource: &WsmResource) -> FlightContext {
        cloud.add_project(project_id);
        let inputs = FlightMap::new().with(&keys::RESOURCE, resource).unwrap();
        let mut ctx = FlightContext::new("f1", "Test", inputs);
        ctx.working_mut()
            .put(
                &keys::CLOUD_CONTEXT,
                &CloudContext::Gcp(GcpCloudContext {
                    project_id: project_id.to_string(),
                    default_zone: None,
                    policy_groups: None,
                }),
            )
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_replay_creates_one_bucket() {
        let cloud = Arc::new(FakeCloud::new());
        let resource = bucket_resource("replayed");
        let mut ctx = context_for(&cloud, "terra-a", &resource);
        let step = CreateGcsBucketStep { gcp: cloud.clone() };

        step.execute(&mut ctx).await.unwrap();
        step.execute(&mut ctx).await.unwrap();
        assert!(cloud.has_bucket("replayed"));
        assert_eq!(cloud.create_count("bucket"), 1);
    }

    #[tokio::test]
    async fn test_bucket_in_another_project_is_duplicate() {
        let cloud = Arc::new(FakeCloud::new());
        let other = cloud.add_project("someone-else");
        cloud.add_bucket(&other.project_number, "taken");

        let resource = bucket_resource("taken");
        let mut ctx = context_for(&cloud, "terra-b", &resource);
        let step = CreateGcsBucketStep { gcp: cloud.clone() };

        match step.execute(&mut ctx).await {
            Err(StepFailure::Fatal(OrchestratorError::DuplicateResource(_))) => {}
            other => panic!("Expected DuplicateResource, got {:?}", other),
        }

        // Undo never touches a bucket owned elsewhere.
        step.compensate(&mut ctx).await.unwrap();
        assert!(cloud.has_bucket("taken"));
    }

    #[tokio::test]
    async fn test_create_classification() {
        let cloud = Arc::new(FakeCloud::new());
        let resource = bucket_resource("classified");
        let mut ctx = context_for(&cloud, "terra-c", &resource);
        let step = CreateGcsBucketStep { gcp: cloud.clone() };

        cloud.fail_next("create_bucket", 400);
        assert!(matches!(
            step.execute(&mut ctx).await,
            Err(StepFailure::Fatal(OrchestratorError::InvalidInput(_)))
        ));

        cloud.fail_next("create_bucket", 503);
        assert!(matches!(step.execute(&mut ctx).await, Err(StepFailure::Retryable(_))));

        step.execute(&mut ctx).await.unwrap();
        assert!(cloud.has_bucket("classified"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_bucket() {
        let cloud = Arc::new(FakeCloud::new());
        let resource = bucket_resource("gone");
        let mut ctx = context_for(&cloud, "terra-d", &resource);
        DeleteGcsBucketStep { gcp: cloud }.execute(&mut ctx).await.unwrap();
    }
}
