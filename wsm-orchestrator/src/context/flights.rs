use super::CloudContextService;
use crate::deps::FlightDeps;
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightFactory, FlightMap, FlightPlan, RetryRule, Step, StepFailure, StepResult};
use crate::keys;
use crate::state::StateRule;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Create start, the platform's steps, create finish.
pub struct CreateCloudContextFlight {
    deps: Arc<FlightDeps>,
}

impl CreateCloudContextFlight {
    pub const CLASS: &'static str = "CreateCloudContextFlight";

    pub(crate) fn new(deps: Arc<FlightDeps>) -> Self {
        Self { deps }
    }
}

impl FlightFactory for CreateCloudContextFlight {
    fn flight_class(&self) -> &'static str {
        Self::CLASS
    }

    fn build(&self, inputs: &FlightMap) -> Result<FlightPlan> {
        let platform = inputs.require(&keys::PLATFORM)?;
        let service = self.deps.contexts.get(platform)?;

        let mut plan = FlightPlan::new();
        plan.add_step(
            CreateCloudContextStartStep {
                service: service.clone(),
            },
            RetryRule::short_database(),
        );
        service.add_create_steps(&mut plan, inputs)?;
        plan.add_step(
            CreateCloudContextFinishStep { service },
            RetryRule::short_database(),
        );
        Ok(plan)
    }
}

/// Delete start, the platform's teardown, delete finish.
pub struct DeleteCloudContextFlight {
    deps: Arc<FlightDeps>,
}

impl DeleteCloudContextFlight {
    pub const CLASS: &'static str = "DeleteCloudContextFlight";

    pub(crate) fn new(deps: Arc<FlightDeps>) -> Self {
        Self { deps }
    }
}

impl FlightFactory for DeleteCloudContextFlight {
    fn flight_class(&self) -> &'static str {
        Self::CLASS
    }

    fn build(&self, inputs: &FlightMap) -> Result<FlightPlan> {
        let platform = inputs.require(&keys::PLATFORM)?;
        let service = self.deps.contexts.get(platform)?;

        let mut plan = FlightPlan::new();
        plan.add_step(
            DeleteCloudContextStartStep {
                service: service.clone(),
            },
            RetryRule::short_database(),
        );
        service.add_delete_steps(&mut plan, inputs)?;
        plan.add_step(
            DeleteCloudContextFinishStep { service },
            RetryRule::short_database(),
        );
        Ok(plan)
    }
}

struct CreateCloudContextStartStep {
    service: Arc<dyn CloudContextService>,
}

#[async_trait]
impl Step for CreateCloudContextStartStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let spend_profile = ctx.inputs().get(&keys::SPEND_PROFILE)?;
        self.service
            .create_start(workspace_id, spend_profile.as_deref(), ctx.flight_id())
            .await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let rule = ctx
            .inputs()
            .get(&keys::STATE_RULE)?
            .unwrap_or(StateRule::DeleteOnFailure);
        let error = format!("cloud context creation failed in flight {}", ctx.flight_id());
        self.service
            .create_failure(workspace_id, ctx.flight_id(), &error, rule)
            .await?;
        Ok(())
    }
}

struct CreateCloudContextFinishStep {
    service: Arc<dyn CloudContextService>,
}

#[async_trait]
impl Step for CreateCloudContextFinishStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let actor = ctx.inputs().require(&keys::USER_EMAIL)?;
        let context = ctx.working().require(&keys::CLOUD_CONTEXT)?;

        self.service
            .create_finish(workspace_id, &context, ctx.flight_id(), &actor)
            .await?;

        info!("{} cloud context ready for workspace {}", context.platform(), workspace_id);
        ctx.working_mut().put(&keys::RESPONSE_CLOUD_CONTEXT, &context)?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        Err(StepFailure::Fatal(OrchestratorError::StaleState(format!(
            "cloud context of flight {} is already READY",
            ctx.flight_id()
        ))))
    }
}

/// Claim the context for deletion. Refused while controlled resources remain on the platform.
struct DeleteCloudContextStartStep {
    service: Arc<dyn CloudContextService>,
}

#[async_trait]
impl Step for DeleteCloudContextStartStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let platform = self.service.platform();

        let record = self
            .service
            .dao()
            .get_record(workspace_id, platform)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("workspace {} has no {} cloud context", workspace_id, platform))
            })?;

        self.service.delete_start(workspace_id, ctx.flight_id()).await?;

        if let Some(context) = record.context {
            if !ctx.working().contains(&keys::CLOUD_CONTEXT) {
                ctx.working_mut().put(&keys::CLOUD_CONTEXT, &context)?;
            }
        }
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        self.service
            .dao()
            .delete_failure(workspace_id, self.service.platform(), ctx.flight_id())
            .await?;
        Ok(())
    }
}

struct DeleteCloudContextFinishStep {
    service: Arc<dyn CloudContextService>,
}

#[async_trait]
impl Step for DeleteCloudContextFinishStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let actor = ctx.inputs().require(&keys::USER_EMAIL)?;
        let platform = self.service.platform();

        self.service
            .dao()
            .delete_success(workspace_id, platform, ctx.flight_id(), &actor)
            .await?;

        info!("{} cloud context deleted from workspace {}", platform, workspace_id);
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
