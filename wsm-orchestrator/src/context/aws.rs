use super::CloudContextService;
use crate::dao::CloudContextDao;
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightMap, FlightPlan, RetryRule, Step, StepResult};
use crate::keys;
use crate::model::{AwsCloudContext, CloudContext, CloudPlatform};
use async_trait::async_trait;

/// AWS contexts are built from the landing-zone environment the server is configured with.
pub struct AwsContextService {
    dao: CloudContextDao,
    environment: Option<AwsCloudContext>,
}

impl AwsContextService {
    pub fn new(dao: CloudContextDao, environment: Option<AwsCloudContext>) -> Self {
        Self { dao, environment }
    }
}

#[async_trait]
impl CloudContextService for AwsContextService {
    fn platform(&self) -> CloudPlatform {
        CloudPlatform::Aws
    }

    fn dao(&self) -> &CloudContextDao {
        &self.dao
    }

    fn add_create_steps(&self, plan: &mut FlightPlan, _inputs: &FlightMap) -> Result<()> {
        plan.add_step(
            SetAwsContextStep {
                environment: self.environment.clone(),
            },
            RetryRule::None,
        );
        Ok(())
    }

    fn add_delete_steps(&self, _plan: &mut FlightPlan, _inputs: &FlightMap) -> Result<()> {
        Ok(())
    }
}

struct SetAwsContextStep {
    environment: Option<AwsCloudContext>,
}

#[async_trait]
impl Step for SetAwsContextStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let environment = self.environment.clone().ok_or_else(|| {
            OrchestratorError::InvalidInput("no AWS environment is configured".to_string())
        })?;
        ctx.working_mut().put(&keys::CLOUD_CONTEXT, &CloudContext::Aws(environment))?;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
