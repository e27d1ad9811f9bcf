use super::CloudContextService;
use crate::cloud::AzureClient;
use crate::dao::CloudContextDao;
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightMap, FlightPlan, RetryRule, Step, StepResult};
use crate::keys;
use crate::model::{CloudContext, CloudPlatform};
use async_trait::async_trait;
use std::sync::Arc;

/// Azure contexts bind to a managed resource group the customer already owns. Deleting the
/// context leaves the group alone.
pub struct AzureContextService {
    dao: CloudContextDao,
    azure: Arc<dyn AzureClient>,
}

impl AzureContextService {
    pub fn new(dao: CloudContextDao, azure: Arc<dyn AzureClient>) -> Self {
        Self { dao, azure }
    }
}

#[async_trait]
impl CloudContextService for AzureContextService {
    fn platform(&self) -> CloudPlatform {
        CloudPlatform::Azure
    }

    fn dao(&self) -> &CloudContextDao {
        &self.dao
    }

    fn add_create_steps(&self, plan: &mut FlightPlan, inputs: &FlightMap) -> Result<()> {
        if !inputs.contains(&keys::AZURE_CONTEXT_REQUEST) {
            return Err(OrchestratorError::InvalidInput(
                "an Azure cloud context needs a tenant, subscription and resource group".to_string(),
            ));
        }
        plan.add_step(
            ValidateAzureResourceGroupStep {
                azure: self.azure.clone(),
            },
            RetryRule::cloud(),
        );
        Ok(())
    }

    fn add_delete_steps(&self, _plan: &mut FlightPlan, _inputs: &FlightMap) -> Result<()> {
        Ok(())
    }
}

struct ValidateAzureResourceGroupStep {
    azure: Arc<dyn AzureClient>,
}

#[async_trait]
impl Step for ValidateAzureResourceGroupStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let request = ctx.inputs().require(&keys::AZURE_CONTEXT_REQUEST)?;
        if !self.azure.resource_group_exists(&request).await? {
            return Err(OrchestratorError::InvalidInput(format!(
                "resource group {} not found in subscription {}",
                request.resource_group_id, request.subscription_id
            ))
            .into());
        }
        ctx.working_mut().put(&keys::CLOUD_CONTEXT, &CloudContext::Azure(request))?;
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
    use crate::flight::StepFailure;
    use crate::model::AzureCloudContext;

    fn request() -> AzureCloudContext {
        AzureCloudContext {
            tenant_id: "tenant".to_string(),
            subscription_id: "sub".to_string(),
            resource_group_id: "mrg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_resource_group_is_invalid_input() {
        let step = ValidateAzureResourceGroupStep {
            azure: Arc::new(FakeCloud::new()),
        };
        let inputs = FlightMap::new().with(&keys::AZURE_CONTEXT_REQUEST, &request()).unwrap();
        let mut ctx = FlightContext::new("f1", "Test", inputs);

        match step.execute(&mut ctx).await {
            Err(StepFailure::Fatal(OrchestratorError::InvalidInput(_))) => {}
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
        assert!(!ctx.working().contains(&keys::CLOUD_CONTEXT));
    }

    #[tokio::test]
    async fn test_existing_resource_group_becomes_context() {
        let cloud = FakeCloud::new();
        cloud.add_resource_group("sub", "mrg");
        let step = ValidateAzureResourceGroupStep { azure: Arc::new(cloud) };
        let inputs = FlightMap::new().with(&keys::AZURE_CONTEXT_REQUEST, &request()).unwrap();
        let mut ctx = FlightContext::new("f1", "Test", inputs);

        step.execute(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.working().get(&keys::CLOUD_CONTEXT).unwrap(),
            Some(CloudContext::Azure(request()))
        );
    }
}
