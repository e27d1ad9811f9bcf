//! Per-platform cloud context services and the flights that create and delete contexts.
//!
//! Each platform implements [`CloudContextService`] once. The generic create/delete flights
//! bracket the platform's own steps with the shared placeholder and finish steps.

mod aws;
mod azure;
mod flights;
mod gcp;
mod resolve;

pub use aws::AwsContextService;
pub use azure::AzureContextService;
pub use flights::{CreateCloudContextFlight, DeleteCloudContextFlight};
pub use gcp::GcpContextService;
pub(crate) use resolve::ResolveCloudContextStep;

use crate::dao::CloudContextDao;
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightMap, FlightPlan};
use crate::model::{CloudContext, CloudPlatform};
use crate::state::StateRule;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of one platform's cloud context.
#[async_trait]
pub trait CloudContextService: Send + Sync {
    fn platform(&self) -> CloudPlatform;

    fn dao(&self) -> &CloudContextDao;

    /// Platform steps run between create start and create finish. By the end they must have
    /// left the finished context under `keys::CLOUD_CONTEXT` in the working map.
    fn add_create_steps(&self, plan: &mut FlightPlan, inputs: &FlightMap) -> Result<()>;

    /// Teardown run between delete start and delete finish.
    fn add_delete_steps(&self, plan: &mut FlightPlan, inputs: &FlightMap) -> Result<()>;

    async fn get_context(&self, workspace_id: Uuid) -> Result<Option<CloudContext>> {
        self.dao().get_ready_context(workspace_id, self.platform()).await
    }

    async fn get_required_context(&self, workspace_id: Uuid) -> Result<CloudContext> {
        self.get_context(workspace_id).await?.ok_or_else(|| {
            OrchestratorError::CloudContextRequired(format!(
                "workspace {} has no ready {} cloud context",
                workspace_id,
                self.platform()
            ))
        })
    }

    async fn create_start(&self, workspace_id: Uuid, spend_profile: Option<&str>, flight_id: &str) -> Result<()> {
        self.dao()
            .create_start(workspace_id, self.platform(), spend_profile, flight_id)
            .await
    }

    async fn create_finish(
        &self,
        workspace_id: Uuid,
        context: &CloudContext,
        flight_id: &str,
        actor_email: &str,
    ) -> Result<()> {
        if context.platform() != self.platform() {
            return Err(OrchestratorError::InternalLogic(format!(
                "{} context handed to the {} context service",
                context.platform(),
                self.platform()
            )));
        }
        self.dao()
            .create_success(workspace_id, context, flight_id, actor_email)
            .await
    }

    async fn create_failure(&self, workspace_id: Uuid, flight_id: &str, error: &str, rule: StateRule) -> Result<()> {
        self.dao()
            .create_failure(workspace_id, self.platform(), flight_id, error, rule)
            .await
    }

    async fn delete_start(&self, workspace_id: Uuid, flight_id: &str) -> Result<()> {
        self.dao().delete_start(workspace_id, self.platform(), flight_id).await
    }

    /// Remove the row only while `flight_id` still owns it.
    async fn delete_with_flight_id_validation(&self, workspace_id: Uuid, flight_id: &str) -> Result<bool> {
        self.dao()
            .delete_with_flight_id_validation(workspace_id, self.platform(), flight_id)
            .await
    }
}

/// The context services, keyed by platform.
#[derive(Clone, Default)]
pub struct CloudContextServices {
    services: BTreeMap<CloudPlatform, Arc<dyn CloudContextService>>,
}

impl CloudContextServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service: Arc<dyn CloudContextService>) -> Self {
        self.services.insert(service.platform(), service);
        self
    }

    pub fn get(&self, platform: CloudPlatform) -> Result<Arc<dyn CloudContextService>> {
        self.services.get(&platform).cloned().ok_or_else(|| {
            OrchestratorError::InternalLogic(format!("no cloud context service for {}", platform))
        })
    }
}
