use super::ResourceHandler;
use crate::cloud::{ignore_not_found, AzureClient};
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightPlan, RetryRule, Step, StepResult};
use crate::keys;
use crate::model::{AzureCloudContext, ResourceAttributes, ResourceType, WsmResource};
use crate::state::StateRule;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Managed disks. Failed creates stay behind as BROKEN rows so the partial disk can be found.
pub struct AzureDiskHandler {
    azure: Arc<dyn AzureClient>,
}

impl AzureDiskHandler {
    pub fn new(azure: Arc<dyn AzureClient>) -> Self {
        Self { azure }
    }
}

impl ResourceHandler for AzureDiskHandler {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ControlledAzureDisk
    }

    fn default_state_rule(&self) -> StateRule {
        StateRule::BrokenOnFailure
    }

    fn cloneable(&self) -> bool {
        false
    }

    fn add_create_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(CreateAzureDiskStep { azure: self.azure.clone() }, RetryRule::cloud());
        Ok(())
    }

    fn add_delete_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(DeleteAzureDiskStep { azure: self.azure.clone() }, RetryRule::cloud());
        Ok(())
    }
}

fn disk_attributes(resource: &WsmResource) -> Result<(String, u32, String)> {
    match &resource.attributes {
        ResourceAttributes::AzureDisk {
            disk_name,
            size_gb,
            region,
        } => Ok((disk_name.clone(), *size_gb, region.clone())),
        other => Err(OrchestratorError::InternalLogic(format!(
            "disk handler given {:?} attributes",
            other.resource_type()
        ))),
    }
}

fn azure_context(ctx: &FlightContext) -> Result<AzureCloudContext> {
    let context = ctx.working().require(&keys::CLOUD_CONTEXT)?;
    context.as_azure().cloned().ok_or_else(|| {
        OrchestratorError::InternalLogic(format!("expected an Azure context, got {}", context.platform()))
    })
}

struct CreateAzureDiskStep {
    azure: Arc<dyn AzureClient>,
}

#[async_trait]
impl Step for CreateAzureDiskStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (disk_name, size_gb, region) = disk_attributes(&resource)?;
        let context = azure_context(ctx)?;

        if self.azure.get_disk(&context, &disk_name).await?.is_some() {
            info!("Disk {} already exists", disk_name);
            return Ok(());
        }
        ctx.check_interrupted()?;
        self.azure.create_disk(&context, &disk_name, size_gb, &region).await?;
        info!("Created disk {} in {}", disk_name, context.resource_group_id);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (disk_name, _, _) = disk_attributes(&resource)?;
        let context = azure_context(ctx)?;
        ignore_not_found(self.azure.delete_disk(&context, &disk_name).await)?;
        Ok(())
    }
}

struct DeleteAzureDiskStep {
    azure: Arc<dyn AzureClient>,
}

#[async_trait]
impl Step for DeleteAzureDiskStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let (disk_name, _, _) = disk_attributes(&resource)?;
        let context = azure_context(ctx)?;
        ignore_not_found(self.azure.delete_disk(&context, &disk_name).await)?;
        info!("Deleted disk {}", disk_name);
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
