use super::ResourceHandler;
use crate::cloud::{ignore_not_found, AwsClient};
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightPlan, RetryRule, Step, StepResult};
use crate::keys;
use crate::model::{AwsCloudContext, ResourceAttributes, ResourceType, WsmResource};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// A prefix marker under the environment's storage bucket.
pub struct AwsStorageFolderHandler {
    aws: Arc<dyn AwsClient>,
}

impl AwsStorageFolderHandler {
    pub fn new(aws: Arc<dyn AwsClient>) -> Self {
        Self { aws }
    }
}

impl ResourceHandler for AwsStorageFolderHandler {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ControlledAwsStorageFolder
    }

    fn add_create_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(CreateAwsStorageFolderStep { aws: self.aws.clone() }, RetryRule::cloud());
        Ok(())
    }

    fn add_delete_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(DeleteAwsStorageFolderStep { aws: self.aws.clone() }, RetryRule::cloud());
        Ok(())
    }
}

fn folder_attributes(resource: &WsmResource) -> Result<(String, String)> {
    match &resource.attributes {
        ResourceAttributes::AwsStorageFolder { prefix, region } => Ok((prefix.clone(), region.clone())),
        other => Err(OrchestratorError::InternalLogic(format!(
            "storage folder handler given {:?} attributes",
            other.resource_type()
        ))),
    }
}

fn aws_context(ctx: &FlightContext) -> Result<AwsCloudContext> {
    let context = ctx.working().require(&keys::CLOUD_CONTEXT)?;
    context.as_aws().cloned().ok_or_else(|| {
        OrchestratorError::InternalLogic(format!("expected an AWS context, got {}", context.platform()))
    })
}

struct CreateAwsStorageFolderStep {
    aws: Arc<dyn AwsClient>,
}

#[async_trait]
impl Step for CreateAwsStorageFolderStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (prefix, region) = folder_attributes(&resource)?;
        let context = aws_context(ctx)?;

        if self.aws.folder_exists(&context, &prefix).await? {
            return Ok(());
        }
        ctx.check_interrupted()?;
        self.aws.create_folder(&context, &prefix, &region).await?;
        info!("Created storage folder {} in account {}", prefix, context.account_id);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (prefix, _) = folder_attributes(&resource)?;
        let context = aws_context(ctx)?;
        ignore_not_found(self.aws.delete_folder(&context, &prefix).await)?;
        Ok(())
    }
}

struct DeleteAwsStorageFolderStep {
    aws: Arc<dyn AwsClient>,
}

#[async_trait]
impl Step for DeleteAwsStorageFolderStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (prefix, _) = folder_attributes(&resource)?;
        let context = aws_context(ctx)?;
        ignore_not_found(self.aws.delete_folder(&context, &prefix).await)?;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
