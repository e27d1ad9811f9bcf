//! Steps shared by every controlled resource type.

use crate::dao::ResourceDao;
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, Step, StepFailure, StepResult};
use crate::iam::{controlled_resource_policy, BrokerResourceRef, IdentityBroker, ResourcePolicyRequest, ServiceIdentity};
use crate::keys;
use crate::model::WsmResource;
use crate::state::{PrivateResourceState, StateRule};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) fn broker_ref(resource: &WsmResource) -> Result<BrokerResourceRef> {
    Ok(BrokerResourceRef::controlled(resource.category()?, resource.resource_id))
}

/// Claim the resource id and name with a CREATING row.
pub(crate) struct CreateResourceInDbStartStep {
    pub(crate) resources: ResourceDao,
}

#[async_trait]
impl Step for CreateResourceInDbStartStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        self.resources.create_start(&resource, ctx.flight_id()).await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let rule = ctx
            .inputs()
            .get(&keys::STATE_RULE)?
            .unwrap_or(StateRule::DeleteOnFailure);
        let error = format!("create flight {} failed", ctx.flight_id());
        self.resources
            .create_failure(resource.workspace_id, resource.resource_id, ctx.flight_id(), &error, rule)
            .await?;
        Ok(())
    }
}

/// Create the broker resource under the workspace, with the synthesized policy.
pub(crate) struct CreateBrokerResourceStep {
    pub(crate) broker: Arc<dyn IdentityBroker>,
    pub(crate) service_identity: ServiceIdentity,
}

#[async_trait]
impl Step for CreateBrokerResourceStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let controlled = resource.controlled()?;
        let private_role = ctx.inputs().get(&keys::PRIVATE_ROLE)?;
        let application = ctx.inputs().get(&keys::APPLICATION)?;

        let policy = controlled_resource_policy(
            &self.service_identity,
            &ResourcePolicyRequest {
                category: controlled.category(),
                private_role,
                assignee: controlled.assigned_user.as_deref(),
                application: application.as_ref(),
            },
        )?;

        let target = broker_ref(&resource)?;
        let parent = BrokerResourceRef::workspace(resource.workspace_id);
        self.broker
            .create_resource(self.service_identity.token(), &target, &policy, Some(&parent))
            .await?;
        info!("Created broker resource {}", target);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let target = broker_ref(&resource)?;
        self.broker
            .delete_resource(self.service_identity.token(), &target)
            .await?;
        info!("Deleted broker resource {}", target);
        Ok(())
    }
}

/// Flip a PRIVATE resource to ACTIVE once the assignee's grant is visible in the broker.
pub(crate) struct ActivatePrivateResourceStep {
    pub(crate) resources: ResourceDao,
    pub(crate) broker: Arc<dyn IdentityBroker>,
    pub(crate) service_identity: ServiceIdentity,
}

#[async_trait]
impl Step for ActivatePrivateResourceStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let controlled = resource.controlled()?;

        if let (Some(assignee), Some(role)) = (
            controlled.assigned_user.as_deref(),
            ctx.inputs().get(&keys::PRIVATE_ROLE)?,
        ) {
            let target = broker_ref(&resource)?;
            let policies = self
                .broker
                .list_resource_policies(self.service_identity.token(), &target)
                .await?;
            if !policies.members(role.as_str()).contains(assignee) {
                return Err(StepFailure::Retryable(OrchestratorError::RetryableRemote(format!(
                    "{} not yet granted {} on {}",
                    assignee,
                    role.as_str(),
                    target
                ))));
            }
        }

        ctx.check_interrupted()?;
        self.resources
            .set_private_state(resource.workspace_id, resource.resource_id, PrivateResourceState::Active)
            .await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        self.resources
            .set_private_state(
                resource.workspace_id,
                resource.resource_id,
                PrivateResourceState::Initializing,
            )
            .await?;
        Ok(())
    }
}

/// Mark the row READY, with its activity entry, and publish the finished resource.
///
/// Undo reports StaleState; a READY resource is never rolled back by its create flight.
pub(crate) struct SetCreateResponseStep {
    pub(crate) resources: ResourceDao,
}

#[async_trait]
impl Step for SetCreateResponseStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let actor = ctx.inputs().require(&keys::USER_EMAIL)?;

        self.resources
            .create_success(resource.workspace_id, resource.resource_id, ctx.flight_id(), &actor)
            .await?;
        let created = self
            .resources
            .get_resource(resource.workspace_id, resource.resource_id)
            .await?;

        ctx.working_mut().put(&keys::RESPONSE_RESOURCE, &created)?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        Err(StepFailure::Fatal(OrchestratorError::StaleState(format!(
            "resource of flight {} is already READY",
            ctx.flight_id()
        ))))
    }
}

pub(crate) struct DeleteResourceStartStep {
    pub(crate) resources: ResourceDao,
}

#[async_trait]
impl Step for DeleteResourceStartStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        self.resources
            .delete_start(resource.workspace_id, resource.resource_id, ctx.flight_id())
            .await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        self.resources
            .delete_failure(resource.workspace_id, resource.resource_id, ctx.flight_id())
            .await?;
        Ok(())
    }
}

/// Remove the broker resource. Already gone counts as done.
pub(crate) struct DeleteBrokerResourceStep {
    pub(crate) broker: Arc<dyn IdentityBroker>,
    pub(crate) service_identity: ServiceIdentity,
}

#[async_trait]
impl Step for DeleteBrokerResourceStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let target = broker_ref(&resource)?;
        match self
            .broker
            .delete_resource(self.service_identity.token(), &target)
            .await
        {
            Ok(()) => {}
            Err(OrchestratorError::NotFound(_)) => warn!("Broker resource {} was already gone", target),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

pub(crate) struct DeleteResourceFinishStep {
    pub(crate) resources: ResourceDao,
}

#[async_trait]
impl Step for DeleteResourceFinishStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let actor = ctx.inputs().require(&keys::USER_EMAIL)?;

        self.resources
            .delete_success(resource.workspace_id, resource.resource_id, ctx.flight_id(), &actor)
            .await?;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
