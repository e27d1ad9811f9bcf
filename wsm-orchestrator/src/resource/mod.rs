//! Controlled resources: the per-type handlers and the flights that create and delete them.
//!
//! A [`ResourceHandler`] contributes only the cloud steps of its type. The flights wrap them in
//! the generic metadata, broker and response steps.

mod aws_folder;
mod azure_disk;
mod bigquery;
mod flexible;
mod flights;
mod gcs;
mod steps;

pub use aws_folder::AwsStorageFolderHandler;
pub use azure_disk::AzureDiskHandler;
pub use bigquery::BigQueryDatasetHandler;
pub use flexible::FlexibleResourceHandler;
pub use flights::{CreateControlledResourceFlight, DeleteControlledResourceFlight};
pub use gcs::GcsBucketHandler;
pub(crate) use steps::broker_ref;

use crate::cloud::CloudClients;
use crate::error::{OrchestratorError, Result};
use crate::flight::FlightPlan;
use crate::iam::{IdentityBroker, ServiceIdentity};
use crate::model::{ResourceType, StewardshipType, WsmResource};
use crate::state::StateRule;
use std::collections::HashMap;
use std::sync::Arc;

/// Strategy for one controlled resource type.
pub trait ResourceHandler: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Fate of the metadata row when a create flight fails for good.
    fn default_state_rule(&self) -> StateRule {
        StateRule::DeleteOnFailure
    }

    fn cloneable(&self) -> bool {
        true
    }

    /// Cloud steps run after the cloud context is resolved. Undo must remove what they made.
    fn add_create_steps(&self, plan: &mut FlightPlan, resource: &WsmResource) -> Result<()>;

    /// Cloud teardown run before the broker resource is deleted.
    fn add_delete_steps(&self, plan: &mut FlightPlan, resource: &WsmResource) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct ResourceHandlers {
    handlers: HashMap<ResourceType, Arc<dyn ResourceHandler>>,
}

impl ResourceHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers for every controlled type.
    pub fn standard(clients: &CloudClients, broker: Arc<dyn IdentityBroker>, service_identity: ServiceIdentity) -> Self {
        Self::new()
            .with(Arc::new(GcsBucketHandler::new(
                clients.gcp.clone(),
                broker.clone(),
                service_identity.clone(),
            )))
            .with(Arc::new(BigQueryDatasetHandler::new(
                clients.gcp.clone(),
                broker,
                service_identity,
            )))
            .with(Arc::new(AzureDiskHandler::new(clients.azure.clone())))
            .with(Arc::new(AwsStorageFolderHandler::new(clients.aws.clone())))
            .with(Arc::new(FlexibleResourceHandler))
    }

    pub fn with(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        self.handlers.insert(handler.resource_type(), handler);
        self
    }

    pub fn get(&self, resource_type: ResourceType) -> Result<Arc<dyn ResourceHandler>> {
        self.handlers.get(&resource_type).cloned().ok_or_else(|| {
            OrchestratorError::InternalLogic(format!("no handler for resource type {:?}", resource_type))
        })
    }

    /// Referenced resources clone as metadata, so they always qualify.
    pub fn is_cloneable(&self, resource_type: ResourceType) -> bool {
        match resource_type.stewardship() {
            StewardshipType::Referenced => true,
            StewardshipType::Controlled => self
                .handlers
                .get(&resource_type)
                .is_some_and(|handler| handler.cloneable()),
        }
    }
}
