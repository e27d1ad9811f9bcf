//! Workspace create and delete flights.

use crate::dao::{ActivityChangeType, ActivityLogDao, ActivitySubjectType, CloudContextDao, ResourceDao, WorkspaceDao};
use crate::deps::FlightDeps;
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightFactory, FlightMap, FlightPlan, RetryRule, Step, StepFailure, StepResult};
use crate::iam::{workspace_default_policy, BrokerResourceRef, IdentityBroker, ServiceIdentity};
use crate::keys;
use crate::model::CloudPlatform;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Row, creator lookup, broker workspace, response.
pub struct CreateWorkspaceFlight {
    deps: Arc<FlightDeps>,
}

impl CreateWorkspaceFlight {
    pub const CLASS: &'static str = "CreateWorkspaceFlight";

    pub(crate) fn new(deps: Arc<FlightDeps>) -> Self {
        Self { deps }
    }
}

impl FlightFactory for CreateWorkspaceFlight {
    fn flight_class(&self) -> &'static str {
        Self::CLASS
    }

    fn build(&self, _inputs: &FlightMap) -> Result<FlightPlan> {
        let mut plan = FlightPlan::new();
        plan.add_step(
            CreateWorkspaceInDbStep {
                workspaces: self.deps.workspaces.clone(),
            },
            RetryRule::short_database(),
        );
        plan.add_step(
            ResolveCreatorEmailStep {
                broker: self.deps.broker.clone(),
                workspaces: self.deps.workspaces.clone(),
            },
            RetryRule::broker(),
        );
        plan.add_step(
            CreateWorkspaceAuthzStep {
                broker: self.deps.broker.clone(),
                service_identity: self.deps.service_identity.clone(),
            },
            RetryRule::broker(),
        );
        plan.add_step(
            SetWorkspaceResponseStep {
                workspaces: self.deps.workspaces.clone(),
                activity: self.deps.activity.clone(),
            },
            RetryRule::short_database(),
        );
        Ok(plan)
    }
}

/// Emptiness check, broker workspace, row.
pub struct DeleteWorkspaceFlight {
    deps: Arc<FlightDeps>,
}

impl DeleteWorkspaceFlight {
    pub const CLASS: &'static str = "DeleteWorkspaceFlight";

    pub(crate) fn new(deps: Arc<FlightDeps>) -> Self {
        Self { deps }
    }
}

impl FlightFactory for DeleteWorkspaceFlight {
    fn flight_class(&self) -> &'static str {
        Self::CLASS
    }

    fn build(&self, _inputs: &FlightMap) -> Result<FlightPlan> {
        let mut plan = FlightPlan::new();
        plan.add_step(
            CheckWorkspaceEmptyStep {
                cloud_contexts: self.deps.cloud_contexts.clone(),
                resources: self.deps.resources.clone(),
            },
            RetryRule::short_database(),
        );
        plan.add_step(
            DeleteWorkspaceAuthzStep {
                broker: self.deps.broker.clone(),
                service_identity: self.deps.service_identity.clone(),
            },
            RetryRule::broker(),
        );
        plan.add_step(
            DeleteWorkspaceInDbStep {
                workspaces: self.deps.workspaces.clone(),
                activity: self.deps.activity.clone(),
            },
            RetryRule::short_database(),
        );
        Ok(plan)
    }
}

struct CreateWorkspaceInDbStep {
    workspaces: WorkspaceDao,
}

#[async_trait]
impl Step for CreateWorkspaceInDbStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace = ctx.inputs().require(&keys::WORKSPACE)?;
        self.workspaces.create_workspace(&workspace).await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace = ctx.inputs().require(&keys::WORKSPACE)?;
        self.workspaces.delete_workspace(workspace.workspace_id).await?;
        Ok(())
    }
}

struct ResolveCreatorEmailStep {
    broker: Arc<dyn IdentityBroker>,
    workspaces: WorkspaceDao,
}

#[async_trait]
impl Step for ResolveCreatorEmailStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace = ctx.inputs().require(&keys::WORKSPACE)?;
        let token = ctx.inputs().require(&keys::USER_TOKEN)?;

        let user = self.broker.user_info(&token).await?.ok_or_else(|| {
            OrchestratorError::InvalidInput("the requesting user is not registered with the broker".to_string())
        })?;
        self.workspaces
            .set_created_by_email(workspace.workspace_id, &user.user_email)
            .await?;
        ctx.working_mut().put(&keys::USER_EMAIL, &user.user_email)?;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

/// The broker workspace carries the default policy: the creator owns it, the service manages it.
struct CreateWorkspaceAuthzStep {
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
}

#[async_trait]
impl Step for CreateWorkspaceAuthzStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace = ctx.inputs().require(&keys::WORKSPACE)?;
        let owner = ctx.working().require(&keys::USER_EMAIL)?;

        let target = BrokerResourceRef::workspace(workspace.workspace_id);
        let policy = workspace_default_policy(&self.service_identity, &owner);
        self.broker
            .create_resource(self.service_identity.token(), &target, &policy, None)
            .await?;
        info!("Created broker workspace {} owned by {}", target, owner);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace = ctx.inputs().require(&keys::WORKSPACE)?;
        self.broker
            .delete_resource(
                self.service_identity.token(),
                &BrokerResourceRef::workspace(workspace.workspace_id),
            )
            .await?;
        Ok(())
    }
}

struct SetWorkspaceResponseStep {
    workspaces: WorkspaceDao,
    activity: ActivityLogDao,
}

#[async_trait]
impl Step for SetWorkspaceResponseStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE)?.workspace_id;
        let actor = ctx.working().require(&keys::USER_EMAIL)?;

        let workspace = self.workspaces.get_workspace(workspace_id).await?;
        self.activity
            .write_activity(
                workspace_id,
                ActivityChangeType::Create,
                &actor,
                &workspace_id.to_string(),
                ActivitySubjectType::Workspace,
            )
            .await?;
        ctx.working_mut().put(&keys::RESPONSE_WORKSPACE, &workspace)?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        Err(StepFailure::Fatal(OrchestratorError::StaleState(format!(
            "workspace of flight {} is already created",
            ctx.flight_id()
        ))))
    }
}

/// Cloud contexts and cloud-less controlled resources must be deleted first; the row cascade
/// would otherwise orphan their remote state.
struct CheckWorkspaceEmptyStep {
    cloud_contexts: CloudContextDao,
    resources: ResourceDao,
}

#[async_trait]
impl Step for CheckWorkspaceEmptyStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;

        let contexts = self.cloud_contexts.list_for_workspace(workspace_id).await?;
        if let Some(context) = contexts.first() {
            return Err(OrchestratorError::InvalidInput(format!(
                "workspace {} still has a {} cloud context",
                workspace_id, context.platform
            ))
            .into());
        }
        let controlled = self
            .resources
            .count_controlled_on_platform(workspace_id, CloudPlatform::Any)
            .await?;
        if controlled > 0 {
            return Err(OrchestratorError::InvalidInput(format!(
                "workspace {} still has {} controlled resources",
                workspace_id, controlled
            ))
            .into());
        }
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct DeleteWorkspaceAuthzStep {
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
}

#[async_trait]
impl Step for DeleteWorkspaceAuthzStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let target = BrokerResourceRef::workspace(workspace_id);
        match self
            .broker
            .delete_resource(self.service_identity.token(), &target)
            .await
        {
            Ok(()) => {}
            Err(OrchestratorError::NotFound(_)) => warn!("Broker workspace {} was already gone", target),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct DeleteWorkspaceInDbStep {
    workspaces: WorkspaceDao,
    activity: ActivityLogDao,
}

#[async_trait]
impl Step for DeleteWorkspaceInDbStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let actor = ctx.inputs().require(&keys::USER_EMAIL)?;

        if self.workspaces.delete_workspace(workspace_id).await? {
            self.activity
                .write_activity(
                    workspace_id,
                    ActivityChangeType::Delete,
                    &actor,
                    &workspace_id.to_string(),
                    ActivitySubjectType::Workspace,
                )
                .await?;
        }
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
