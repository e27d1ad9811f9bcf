use super::steps::{
    ActivatePrivateResourceStep, CreateBrokerResourceStep, CreateResourceInDbStartStep, DeleteBrokerResourceStep,
    DeleteResourceFinishStep, DeleteResourceStartStep, SetCreateResponseStep,
};
use crate::context::ResolveCloudContextStep;
use crate::deps::FlightDeps;
use crate::error::Result;
use crate::flight::{FlightFactory, FlightMap, FlightPlan, RetryRule};
use crate::keys;
use crate::model::CloudPlatform;
use std::sync::Arc;

/// Metadata row, broker resource, context, the type's cloud steps, private activation, response.
pub struct CreateControlledResourceFlight {
    deps: Arc<FlightDeps>,
}

impl CreateControlledResourceFlight {
    pub const CLASS: &'static str = "CreateControlledResourceFlight";

    pub(crate) fn new(deps: Arc<FlightDeps>) -> Self {
        Self { deps }
    }
}

impl FlightFactory for CreateControlledResourceFlight {
    fn flight_class(&self) -> &'static str {
        Self::CLASS
    }

    fn build(&self, inputs: &FlightMap) -> Result<FlightPlan> {
        let resource = inputs.require(&keys::RESOURCE)?;
        let handler = self.deps.handlers.get(resource.resource_type())?;

        let mut plan = FlightPlan::new();
        plan.add_step(
            CreateResourceInDbStartStep {
                resources: self.deps.resources.clone(),
            },
            RetryRule::row_contention(),
        );
        plan.add_step(
            CreateBrokerResourceStep {
                broker: self.deps.broker.clone(),
                service_identity: self.deps.service_identity.clone(),
            },
            RetryRule::broker(),
        );
        if resource.platform() != CloudPlatform::Any {
            plan.add_step(
                ResolveCloudContextStep::new(self.deps.contexts.get(resource.platform())?),
                RetryRule::short_database(),
            );
        }
        handler.add_create_steps(&mut plan, &resource)?;
        if resource.is_private() {
            plan.add_step(
                ActivatePrivateResourceStep {
                    resources: self.deps.resources.clone(),
                    broker: self.deps.broker.clone(),
                    service_identity: self.deps.service_identity.clone(),
                },
                RetryRule::broker(),
            );
        }
        plan.add_step(
            SetCreateResponseStep {
                resources: self.deps.resources.clone(),
            },
            RetryRule::short_database(),
        );
        Ok(plan)
    }
}

pub struct DeleteControlledResourceFlight {
    deps: Arc<FlightDeps>,
}

impl DeleteControlledResourceFlight {
    pub const CLASS: &'static str = "DeleteControlledResourceFlight";

    pub(crate) fn new(deps: Arc<FlightDeps>) -> Self {
        Self { deps }
    }
}

impl FlightFactory for DeleteControlledResourceFlight {
    fn flight_class(&self) -> &'static str {
        Self::CLASS
    }

    fn build(&self, inputs: &FlightMap) -> Result<FlightPlan> {
        let resource = inputs.require(&keys::RESOURCE)?;
        let handler = self.deps.handlers.get(resource.resource_type())?;

        let mut plan = FlightPlan::new();
        plan.add_step(
            DeleteResourceStartStep {
                resources: self.deps.resources.clone(),
            },
            RetryRule::row_contention(),
        );
        if resource.platform() != CloudPlatform::Any {
            plan.add_step(
                ResolveCloudContextStep::new(self.deps.contexts.get(resource.platform())?),
                RetryRule::short_database(),
            );
        }
        handler.add_delete_steps(&mut plan, &resource)?;
        plan.add_step(
            DeleteBrokerResourceStep {
                broker: self.deps.broker.clone(),
                service_identity: self.deps.service_identity.clone(),
            },
            RetryRule::broker(),
        );
        plan.add_step(
            DeleteResourceFinishStep {
                resources: self.deps.resources.clone(),
            },
            RetryRule::short_database(),
        );
        Ok(plan)
    }
}
