use super::steps::broker_ref;
use super::ResourceHandler;
use crate::cloud::{dataset_role, group_member, ignore_not_found, to_dataset_access, Binding, GcpClient};
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightPlan, RetryRule, Step, StepResult};
use crate::iam::{declared_roles, IdentityBroker, ServiceIdentity};
use crate::keys;
use crate::model::{ResourceAttributes, ResourceType, WsmResource};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

pub struct BigQueryDatasetHandler {
    gcp: Arc<dyn GcpClient>,
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
}

impl BigQueryDatasetHandler {
    pub fn new(gcp: Arc<dyn GcpClient>, broker: Arc<dyn IdentityBroker>, service_identity: ServiceIdentity) -> Self {
        Self {
            gcp,
            broker,
            service_identity,
        }
    }
}

impl ResourceHandler for BigQueryDatasetHandler {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ControlledGcpBigQueryDataset
    }

    fn add_create_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(
            CreateBigQueryDatasetStep {
                gcp: self.gcp.clone(),
                broker: self.broker.clone(),
                service_identity: self.service_identity.clone(),
            },
            RetryRule::cloud(),
        );
        Ok(())
    }

    fn add_delete_steps(&self, plan: &mut FlightPlan, _resource: &WsmResource) -> Result<()> {
        plan.add_step(DeleteBigQueryDatasetStep { gcp: self.gcp.clone() }, RetryRule::cloud());
        Ok(())
    }
}

struct DatasetAttributes {
    project_id: String,
    dataset_id: String,
    location: Option<String>,
}

fn dataset_attributes(resource: &WsmResource) -> Result<DatasetAttributes> {
    match &resource.attributes {
        ResourceAttributes::BigQueryDataset {
            project_id,
            dataset_id,
            location,
        } => Ok(DatasetAttributes {
            project_id: project_id.clone(),
            dataset_id: dataset_id.clone(),
            location: location
                .clone()
                .or_else(|| resource.controlled.as_ref().and_then(|c| c.region.clone())),
        }),
        other => Err(OrchestratorError::InternalLogic(format!(
            "dataset handler given {:?} attributes",
            other.resource_type()
        ))),
    }
}

/// Create the dataset with its access list already in place.
///
/// Datasets take access as one group per entry, so the role bindings are flattened before
/// the call.
struct CreateBigQueryDatasetStep {
    gcp: Arc<dyn GcpClient>,
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
}

#[async_trait]
impl Step for CreateBigQueryDatasetStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let dataset = dataset_attributes(&resource)?;
        let target = broker_ref(&resource)?;

        let mut bindings = Vec::new();
        for role in declared_roles(resource.category()?) {
            let group = self
                .broker
                .sync_policy_to_group(self.service_identity.token(), &target, role.as_str())
                .await?;
            bindings.push(Binding {
                role: dataset_role(*role).to_string(),
                members: BTreeSet::from([group_member(&group)]),
            });
            ctx.check_interrupted()?;
        }
        let access = to_dataset_access(&bindings)?;

        match self
            .gcp
            .create_dataset(&dataset.project_id, &dataset.dataset_id, dataset.location.as_deref(), &access)
            .await
        {
            Ok(()) => info!("Created dataset {}.{}", dataset.project_id, dataset.dataset_id),
            Err(OrchestratorError::DuplicateResource(_)) => {
                info!("Dataset {}.{} already exists", dataset.project_id, dataset.dataset_id)
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let dataset = dataset_attributes(&resource)?;
        ignore_not_found(
            self.gcp
                .delete_dataset(&dataset.project_id, &dataset.dataset_id)
                .await,
        )?;
        Ok(())
    }
}

struct DeleteBigQueryDatasetStep {
    gcp: Arc<dyn GcpClient>,
}

#[async_trait]
impl Step for DeleteBigQueryDatasetStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = ctx.inputs().require(&keys::RESOURCE)?;
        let dataset = dataset_attributes(&resource)?;
        ignore_not_found(
            self.gcp
                .delete_dataset(&dataset.project_id, &dataset.dataset_id)
                .await,
        )?;
        info!("Deleted dataset {}.{}", dataset.project_id, dataset.dataset_id);
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
