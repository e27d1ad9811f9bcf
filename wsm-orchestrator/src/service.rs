//! The workspace manager: validates requests, submits flights and waits on their outcome.

use crate::clone::{filter_readable, gather_snapshot, plan_items, remap_folders, CloneIds, ClonePlan, CloneStage};
use crate::cloud::CloudClients;
use crate::context::{
    AwsContextService, AzureContextService, CloudContextServices, CreateCloudContextFlight, DeleteCloudContextFlight,
    GcpContextService,
};
use crate::dao::{
    ActivityChangeType, ActivityLogDao, ActivityLogEntry, ActivitySubjectType, ApplicationDao, CloudContextDao,
    FolderDao, ResourceDao, WorkspaceDao,
};
use crate::deps::FlightDeps;
use crate::error::{FlightError, OrchestratorError, Result};
use crate::flight::{FlightDebugInfo, FlightEngine, FlightKey, FlightMap, FlightState, FlightStatus};
use crate::iam::{BearerToken, ControlledResourceIamRole, IdentityBroker, ServiceIdentity};
use crate::keys;
use crate::model::{
    AccessScope, AwsCloudContext, AzureCloudContext, CloningInstructions, CloudContext, CloudContextRecord,
    CloudPlatform, ControlledFields, Folder, ManagedBy, ResourceAttributes, StewardshipType, Workspace,
    WsmApplication, WsmResource,
};
use crate::resource::{broker_ref, CreateControlledResourceFlight, DeleteControlledResourceFlight, ResourceHandlers};
use crate::state::{PrivateResourceState, StateRule, WsmResourceState};
use crate::workspace::{CreateWorkspaceFlight, DeleteWorkspaceFlight};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Knobs that are not part of any single request.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Zone recorded on new GCP contexts.
    pub gcp_default_zone: Option<String>,
    /// Account and region every AWS context is bound to. AWS contexts fail without it.
    pub aws_environment: Option<AwsCloudContext>,
    /// Overrides each resource type's own failure rule.
    pub state_rule_override: Option<StateRule>,
    /// How long the synchronous operations wait for their flight.
    pub flight_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            gcp_default_zone: None,
            aws_environment: None,
            state_rule_override: None,
            flight_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateWorkspaceRequest {
    /// Generated when absent.
    pub workspace_id: Option<Uuid>,
    pub user_facing_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub spend_profile: Option<String>,
}

/// Which cloud context to create. Azure contexts name an existing managed resource group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "UPPERCASE")]
pub enum CloudContextRequest {
    Gcp,
    Azure(AzureCloudContext),
    Aws,
}

impl CloudContextRequest {
    pub fn platform(&self) -> CloudPlatform {
        match self {
            Self::Gcp => CloudPlatform::Gcp,
            Self::Azure(_) => CloudPlatform::Azure,
            Self::Aws => CloudPlatform::Aws,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateControlledResourceRequest {
    pub workspace_id: Uuid,
    /// Generated when absent.
    pub resource_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub cloning_instructions: CloningInstructions,
    pub folder_id: Option<Uuid>,
    pub attributes: ResourceAttributes,
    pub access_scope: AccessScope,
    pub managed_by: ManagedBy,
    /// Private user resources default to the caller.
    pub assigned_user: Option<String>,
    pub private_role: Option<ControlledResourceIamRole>,
    pub application_id: Option<String>,
    pub region: Option<String>,
}

impl CreateControlledResourceRequest {
    /// A shared, user managed resource with no folder.
    pub fn shared(workspace_id: Uuid, name: &str, attributes: ResourceAttributes) -> Self {
        Self {
            workspace_id,
            resource_id: None,
            name: name.to_string(),
            description: None,
            cloning_instructions: CloningInstructions::CopyNothing,
            folder_id: None,
            attributes,
            access_scope: AccessScope::Shared,
            managed_by: ManagedBy::User,
            assigned_user: None,
            private_role: None,
            application_id: None,
            region: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReferencedResourceRequest {
    pub workspace_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub cloning_instructions: CloningInstructions,
    pub folder_id: Option<Uuid>,
    pub attributes: ResourceAttributes,
}

/// Builds a [`WorkspaceManager`] and registers every flight class with its engine.
pub struct WorkspaceManagerBuilder {
    pool: SqlitePool,
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
    clients: CloudClients,
    options: ManagerOptions,
    handlers: Option<ResourceHandlers>,
}

impl WorkspaceManagerBuilder {
    pub fn new(
        pool: SqlitePool,
        broker: Arc<dyn IdentityBroker>,
        service_identity: ServiceIdentity,
        clients: CloudClients,
    ) -> Self {
        Self {
            pool,
            broker,
            service_identity,
            clients,
            options: ManagerOptions::default(),
            handlers: None,
        }
    }

    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the standard resource handlers.
    pub fn handlers(mut self, handlers: ResourceHandlers) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn build(self) -> WorkspaceManager {
        let workspaces = WorkspaceDao::new(self.pool.clone());
        let cloud_contexts = CloudContextDao::new(self.pool.clone());
        let resources = ResourceDao::new(self.pool.clone());
        let activity = ActivityLogDao::new(self.pool.clone());

        let contexts = CloudContextServices::new()
            .with(Arc::new(GcpContextService::new(
                cloud_contexts.clone(),
                self.clients.gcp.clone(),
                self.broker.clone(),
                self.service_identity.clone(),
                self.options.gcp_default_zone.clone(),
            )))
            .with(Arc::new(AzureContextService::new(
                cloud_contexts.clone(),
                self.clients.azure.clone(),
            )))
            .with(Arc::new(AwsContextService::new(
                cloud_contexts.clone(),
                self.options.aws_environment.clone(),
            )));

        let handlers = self.handlers.unwrap_or_else(|| {
            ResourceHandlers::standard(&self.clients, self.broker.clone(), self.service_identity.clone())
        });

        let deps = Arc::new(FlightDeps {
            workspaces: workspaces.clone(),
            cloud_contexts: cloud_contexts.clone(),
            resources: resources.clone(),
            activity: activity.clone(),
            broker: self.broker.clone(),
            service_identity: self.service_identity.clone(),
            contexts,
            handlers,
        });

        let engine = FlightEngine::builder(self.pool.clone())
            .register(Arc::new(CreateWorkspaceFlight::new(deps.clone())))
            .register(Arc::new(DeleteWorkspaceFlight::new(deps.clone())))
            .register(Arc::new(CreateCloudContextFlight::new(deps.clone())))
            .register(Arc::new(DeleteCloudContextFlight::new(deps.clone())))
            .register(Arc::new(CreateControlledResourceFlight::new(deps.clone())))
            .register(Arc::new(DeleteControlledResourceFlight::new(deps.clone())))
            .build();

        WorkspaceManager {
            folders: FolderDao::new(self.pool.clone()),
            applications: ApplicationDao::new(self.pool.clone()),
            pool: self.pool,
            engine,
            deps,
            options: self.options,
        }
    }
}

#[derive(Clone)]
pub struct WorkspaceManager {
    pool: SqlitePool,
    engine: FlightEngine,
    deps: Arc<FlightDeps>,
    folders: FolderDao,
    applications: ApplicationDao,
    options: ManagerOptions,
}

impl WorkspaceManager {
    pub fn builder(
        pool: SqlitePool,
        broker: Arc<dyn IdentityBroker>,
        service_identity: ServiceIdentity,
        clients: CloudClients,
    ) -> WorkspaceManagerBuilder {
        WorkspaceManagerBuilder::new(pool, broker, service_identity, clients)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn engine(&self) -> &FlightEngine {
        &self.engine
    }

    pub fn service_identity(&self) -> &ServiceIdentity {
        &self.deps.service_identity
    }

    /// Resume flights left running by a previous process.
    pub async fn recover(&self) -> Result<Vec<String>> {
        self.engine.recover().await
    }

    // Workspaces

    pub async fn create_workspace(&self, user: &BearerToken, request: CreateWorkspaceRequest) -> Result<Workspace> {
        let state = self
            .create_workspace_with_debug(user, request, FlightDebugInfo::default())
            .await?;
        flight_result(&state, &keys::RESPONSE_WORKSPACE)
    }

    /// Run the create flight and return its final state, whatever the outcome.
    pub async fn create_workspace_with_debug(
        &self,
        user: &BearerToken,
        request: CreateWorkspaceRequest,
        debug: FlightDebugInfo,
    ) -> Result<FlightState> {
        let workspace = new_workspace(request)?;
        let inputs = create_workspace_inputs(&workspace, user)?;
        self.run_flight(CreateWorkspaceFlight::CLASS, inputs, debug).await
    }

    pub async fn get_workspace(&self, workspace_id: Uuid) -> Result<Workspace> {
        self.deps.workspaces.get_workspace(workspace_id).await
    }

    pub async fn get_workspace_by_user_facing_id(&self, user_facing_id: &str) -> Result<Workspace> {
        self.deps.workspaces.get_workspace_by_user_facing_id(user_facing_id).await
    }

    /// Fails with InvalidInput while the workspace still has cloud contexts or controlled resources.
    pub async fn delete_workspace(&self, user: &BearerToken, workspace_id: Uuid) -> Result<()> {
        self.get_workspace(workspace_id).await?;
        let actor = self.caller_email(user).await?;
        let inputs = FlightMap::new()
            .with(&keys::WORKSPACE_ID, &workspace_id)?
            .with(&keys::USER_EMAIL, &actor)?;
        let state = self
            .run_flight(DeleteWorkspaceFlight::CLASS, inputs, FlightDebugInfo::default())
            .await?;
        flight_succeeded(&state)
    }

    /// Most recent change recorded in the workspace's activity log.
    pub async fn last_change(&self, workspace_id: Uuid) -> Result<Option<ActivityLogEntry>> {
        self.deps.activity.last_change(workspace_id).await
    }

    // Cloud contexts

    pub async fn create_cloud_context(
        &self,
        user: &BearerToken,
        workspace_id: Uuid,
        request: CloudContextRequest,
    ) -> Result<CloudContext> {
        let state = self
            .create_cloud_context_with_debug(user, workspace_id, request, FlightDebugInfo::default())
            .await?;
        flight_result(&state, &keys::RESPONSE_CLOUD_CONTEXT)
    }

    pub async fn create_cloud_context_with_debug(
        &self,
        user: &BearerToken,
        workspace_id: Uuid,
        request: CloudContextRequest,
        debug: FlightDebugInfo,
    ) -> Result<FlightState> {
        let workspace = self.get_workspace(workspace_id).await?;
        let actor = self.caller_email(user).await?;

        let mut inputs = FlightMap::new()
            .with(&keys::WORKSPACE_ID, &workspace_id)?
            .with(&keys::PLATFORM, &request.platform())?
            .with(&keys::USER_EMAIL, &actor)?;
        if let Some(spend_profile) = &workspace.spend_profile {
            inputs.put(&keys::SPEND_PROFILE, spend_profile)?;
        }
        if let Some(rule) = self.options.state_rule_override {
            inputs.put(&keys::STATE_RULE, &rule)?;
        }
        if let CloudContextRequest::Azure(azure) = &request {
            inputs.put(&keys::AZURE_CONTEXT_REQUEST, azure)?;
        }
        self.run_flight(CreateCloudContextFlight::CLASS, inputs, debug).await
    }

    /// The READY context of a platform, or `None`.
    pub async fn get_cloud_context(&self, workspace_id: Uuid, platform: CloudPlatform) -> Result<Option<CloudContext>> {
        self.deps.contexts.get(platform)?.get_context(workspace_id).await
    }

    pub async fn list_cloud_contexts(&self, workspace_id: Uuid) -> Result<Vec<CloudContextRecord>> {
        self.deps.cloud_contexts.list_for_workspace(workspace_id).await
    }

    /// Fails with InvalidInput while controlled resources remain on the platform.
    pub async fn delete_cloud_context(&self, user: &BearerToken, workspace_id: Uuid, platform: CloudPlatform) -> Result<()> {
        let actor = self.caller_email(user).await?;
        let inputs = FlightMap::new()
            .with(&keys::WORKSPACE_ID, &workspace_id)?
            .with(&keys::PLATFORM, &platform)?
            .with(&keys::USER_EMAIL, &actor)?;
        let state = self
            .run_flight(DeleteCloudContextFlight::CLASS, inputs, FlightDebugInfo::default())
            .await?;
        flight_succeeded(&state)
    }

    // Controlled resources

    pub async fn create_controlled_resource(
        &self,
        user: &BearerToken,
        request: CreateControlledResourceRequest,
    ) -> Result<WsmResource> {
        let state = self
            .create_controlled_resource_with_debug(user, request, FlightDebugInfo::default())
            .await?;
        flight_result(&state, &keys::RESPONSE_RESOURCE)
    }

    /// Validate the request, then run the create flight to a terminal state.
    ///
    /// Request errors come back as `Err` before any flight starts. Flight failures come back
    /// as the flight's final state.
    pub async fn create_controlled_resource_with_debug(
        &self,
        user: &BearerToken,
        request: CreateControlledResourceRequest,
        debug: FlightDebugInfo,
    ) -> Result<FlightState> {
        let actor = self.caller_email(user).await?;
        let flight_id = Uuid::new_v4().to_string();
        let inputs = self.controlled_resource_inputs(request, &actor, &flight_id).await?;

        self.engine
            .submit_with_id(&flight_id, CreateControlledResourceFlight::CLASS, inputs, debug)
            .await?;
        self.engine.wait_for_flight(&flight_id, self.options.flight_timeout).await
    }

    async fn controlled_resource_inputs(
        &self,
        request: CreateControlledResourceRequest,
        actor: &str,
        flight_id: &str,
    ) -> Result<FlightMap> {
        let workspace_id = request.workspace_id;
        self.get_workspace(workspace_id).await?;

        let resource_type = request.attributes.resource_type();
        if resource_type.stewardship() != StewardshipType::Controlled {
            return Err(OrchestratorError::InvalidInput(format!(
                "{:?} is not a controlled resource type",
                resource_type
            )));
        }
        let handler = self.deps.handlers.get(resource_type)?;
        if let Some(folder_id) = request.folder_id {
            self.require_folder(workspace_id, folder_id).await?;
        }

        let application = match (request.managed_by, &request.application_id) {
            (ManagedBy::Application, Some(application_id)) => {
                if !self.applications.is_enabled(workspace_id, application_id).await? {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "application {} is not enabled in workspace {}",
                        application_id, workspace_id
                    )));
                }
                Some(self.applications.get_application(application_id).await?)
            }
            (ManagedBy::Application, None) => {
                return Err(OrchestratorError::InvalidInput(
                    "application managed resources require an application".to_string(),
                ));
            }
            (ManagedBy::User, _) => None,
        };

        let private = request.access_scope == AccessScope::Private;
        let assigned_user = match (private, request.managed_by, request.assigned_user) {
            (true, ManagedBy::User, None) => Some(actor.to_string()),
            (_, _, assigned) => assigned,
        };
        let private_role = if private { request.private_role } else { None };
        match private_role {
            Some(ControlledResourceIamRole::Owner) => {
                return Err(OrchestratorError::InvalidInput(
                    "OWNER cannot be granted on a private resource".to_string(),
                ));
            }
            None if private && assigned_user.is_some() => {
                return Err(OrchestratorError::InvalidInput(
                    "private resources with an assigned user require a private role".to_string(),
                ));
            }
            _ => {}
        }

        let resource = WsmResource {
            workspace_id,
            resource_id: request.resource_id.unwrap_or_else(Uuid::new_v4),
            name: request.name,
            description: request.description,
            cloning_instructions: request.cloning_instructions,
            folder_id: request.folder_id,
            attributes: request.attributes,
            controlled: Some(ControlledFields {
                access_scope: request.access_scope,
                managed_by: request.managed_by,
                assigned_user,
                private_resource_state: if private {
                    PrivateResourceState::Initializing
                } else {
                    PrivateResourceState::NotApplicable
                },
                application_id: request.application_id,
                region: request.region,
            }),
            state: WsmResourceState::Creating,
            flight_id: Some(flight_id.to_string()),
            error: None,
            created_by_flight: Some(flight_id.to_string()),
            created_by_email: Some(actor.to_string()),
            created_date: Utc::now(),
        };
        resource.validate()?;

        let state_rule = self
            .options
            .state_rule_override
            .unwrap_or_else(|| handler.default_state_rule());

        let mut inputs = FlightMap::new()
            .with(&keys::WORKSPACE_ID, &workspace_id)?
            .with(&keys::RESOURCE, &resource)?
            .with(&keys::USER_EMAIL, &actor.to_string())?
            .with(&keys::STATE_RULE, &state_rule)?;
        if let Some(role) = private_role {
            inputs.put(&keys::PRIVATE_ROLE, &role)?;
        }
        if let Some(application) = &application {
            inputs.put(&keys::APPLICATION, application)?;
        }
        debug!(
            "Create inputs for {} ({:?}, {:?})",
            resource.resource_id, resource_type, state_rule
        );
        Ok(inputs)
    }

    pub async fn delete_controlled_resource(&self, user: &BearerToken, workspace_id: Uuid, resource_id: Uuid) -> Result<()> {
        let state = self
            .delete_controlled_resource_with_debug(user, workspace_id, resource_id, FlightDebugInfo::default())
            .await?;
        flight_succeeded(&state)
    }

    pub async fn delete_controlled_resource_with_debug(
        &self,
        user: &BearerToken,
        workspace_id: Uuid,
        resource_id: Uuid,
        debug: FlightDebugInfo,
    ) -> Result<FlightState> {
        let actor = self.caller_email(user).await?;
        let resource = self.deps.resources.get_resource(workspace_id, resource_id).await?;
        if resource.stewardship() != StewardshipType::Controlled {
            return Err(OrchestratorError::InvalidInput(format!(
                "resource {} is not controlled",
                resource_id
            )));
        }
        let inputs = FlightMap::new()
            .with(&keys::WORKSPACE_ID, &workspace_id)?
            .with(&keys::RESOURCE, &resource)?
            .with(&keys::USER_EMAIL, &actor)?;
        let flight_id = Uuid::new_v4().to_string();
        self.engine
            .submit_with_id(&flight_id, DeleteControlledResourceFlight::CLASS, inputs, debug)
            .await?;
        self.engine.wait_for_flight(&flight_id, self.options.flight_timeout).await
    }

    /// Remove a departed assignee from a private resource and mark it ABANDONED.
    pub async fn abandon_private_resource(&self, workspace_id: Uuid, resource_id: Uuid) -> Result<()> {
        let resource = self.deps.resources.get_resource(workspace_id, resource_id).await?;
        let controlled = resource.controlled()?;
        if controlled.access_scope != AccessScope::Private {
            return Err(OrchestratorError::InvalidInput(format!(
                "resource {} is not private",
                resource_id
            )));
        }

        if let Some(assignee) = &controlled.assigned_user {
            let target = broker_ref(&resource)?;
            let token = self.deps.service_identity.token();
            let policies = self.deps.broker.list_resource_policies(token, &target).await?;
            for role in policies.roles_of(assignee) {
                if role == ControlledResourceIamRole::Owner.as_str() {
                    continue;
                }
                self.deps
                    .broker
                    .remove_user_from_policy(token, &target, role, assignee)
                    .await?;
                info!("Removed {} from {} on {}", assignee, role, target);
            }
        }
        self.deps
            .resources
            .set_private_state(workspace_id, resource_id, PrivateResourceState::Abandoned)
            .await
    }

    /// Log the broker policies on a resource. Never fails.
    pub async fn dump_resource_policies(&self, resource: &WsmResource) {
        let target = match broker_ref(resource) {
            Ok(target) => target,
            Err(e) => {
                warn!("No broker resource for {}: {}", resource.resource_id, e);
                return;
            }
        };
        match self
            .deps
            .broker
            .list_resource_policies(self.deps.service_identity.token(), &target)
            .await
        {
            Ok(policies) => {
                for role in policies.roles() {
                    info!("{} {}: {:?}", target, role, policies.members(role));
                }
            }
            Err(OrchestratorError::Interrupted(reason)) => {
                info!("Policy dump of {} interrupted: {}", target, reason);
            }
            Err(e) => warn!("Could not list policies of {}: {}", target, e),
        }
    }

    // Referenced resources

    /// Referenced resources need no cloud work and are written directly as READY.
    pub async fn create_referenced_resource(
        &self,
        user: &BearerToken,
        request: CreateReferencedResourceRequest,
    ) -> Result<WsmResource> {
        let actor = self.caller_email(user).await?;
        self.get_workspace(request.workspace_id).await?;
        if request.attributes.resource_type().stewardship() != StewardshipType::Referenced {
            return Err(OrchestratorError::InvalidInput(format!(
                "{:?} is not a referenced resource type",
                request.attributes.resource_type()
            )));
        }
        if let Some(folder_id) = request.folder_id {
            self.require_folder(request.workspace_id, folder_id).await?;
        }

        let resource = WsmResource {
            workspace_id: request.workspace_id,
            resource_id: Uuid::new_v4(),
            name: request.name,
            description: request.description,
            cloning_instructions: request.cloning_instructions,
            folder_id: request.folder_id,
            attributes: request.attributes,
            controlled: None,
            state: WsmResourceState::Ready,
            flight_id: None,
            error: None,
            created_by_flight: None,
            created_by_email: Some(actor.clone()),
            created_date: Utc::now(),
        };
        resource.validate()?;

        self.deps.resources.create_referenced(&resource).await?;
        self.deps
            .activity
            .write_activity(
                resource.workspace_id,
                ActivityChangeType::Create,
                &actor,
                &resource.resource_id.to_string(),
                ActivitySubjectType::Resource,
            )
            .await?;
        self.deps
            .resources
            .get_resource(resource.workspace_id, resource.resource_id)
            .await
    }

    pub async fn delete_referenced_resource(&self, user: &BearerToken, workspace_id: Uuid, resource_id: Uuid) -> Result<()> {
        let actor = self.caller_email(user).await?;
        if !self.deps.resources.delete_referenced(workspace_id, resource_id).await? {
            return Err(OrchestratorError::NotFound(format!(
                "referenced resource {} in workspace {}",
                resource_id, workspace_id
            )));
        }
        self.deps
            .activity
            .write_activity(
                workspace_id,
                ActivityChangeType::Delete,
                &actor,
                &resource_id.to_string(),
                ActivitySubjectType::Resource,
            )
            .await
    }

    pub async fn get_resource(&self, workspace_id: Uuid, resource_id: Uuid) -> Result<WsmResource> {
        self.deps.resources.get_resource(workspace_id, resource_id).await
    }

    pub async fn list_resources(&self, workspace_id: Uuid) -> Result<Vec<WsmResource>> {
        self.deps.resources.list_resources(workspace_id).await
    }

    // Folders and applications

    pub async fn create_folder(
        &self,
        workspace_id: Uuid,
        display_name: &str,
        description: Option<&str>,
        parent_folder_id: Option<Uuid>,
    ) -> Result<Folder> {
        self.get_workspace(workspace_id).await?;
        let folder = Folder {
            workspace_id,
            folder_id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            description: description.map(String::from),
            parent_folder_id,
        };
        self.folders.create_folder(&folder).await?;
        Ok(folder)
    }

    pub async fn list_folders(&self, workspace_id: Uuid) -> Result<Vec<Folder>> {
        self.folders.list_folders(workspace_id).await
    }

    pub async fn register_application(&self, application: &WsmApplication) -> Result<()> {
        self.applications.register_application(application).await
    }

    pub async fn enable_application(&self, workspace_id: Uuid, application_id: &str) -> Result<()> {
        self.get_workspace(workspace_id).await?;
        self.applications.enable_application(workspace_id, application_id).await
    }

    pub async fn disable_application(&self, workspace_id: Uuid, application_id: &str) -> Result<()> {
        self.applications.disable_application(workspace_id, application_id).await
    }

    pub async fn list_enabled_applications(&self, workspace_id: Uuid) -> Result<Vec<WsmApplication>> {
        self.applications.list_enabled(workspace_id).await
    }

    // Clone

    /// Snapshot the source, start creating the destination workspace and plan the copy.
    ///
    /// The destination flight is submitted but not awaited; its id is on the plan.
    pub async fn clone_workspace(
        &self,
        user: &BearerToken,
        source_workspace_id: Uuid,
        destination: CreateWorkspaceRequest,
    ) -> Result<ClonePlan> {
        let stage = CloneStage::GatherSnapshot;
        let snapshot = gather_snapshot(&self.pool, source_workspace_id, &self.deps.handlers).await?;

        let stage = advance(stage, source_workspace_id)?;
        let destination = new_workspace(destination)?;
        let inputs = create_workspace_inputs(&destination, user)?;
        let destination_flight_id = self.engine.submit(CreateWorkspaceFlight::CLASS, inputs).await?;

        let stage = advance(stage, source_workspace_id)?;
        let ids = CloneIds::generate(&snapshot);
        let folders = remap_folders(&snapshot.folders, &ids, destination.workspace_id)?;
        let (controlled, skipped) = filter_readable(self.deps.broker.as_ref(), user, snapshot.controlled).await?;
        let controlled = plan_items(controlled, &ids.controlled, &ids)?;
        let referenced = plan_items(snapshot.referenced, &ids.referenced, &ids)?;

        info!(
            "Clone plan {} -> {}: {} folders, {} controlled, {} referenced, {} skipped",
            source_workspace_id,
            destination.workspace_id,
            folders.len(),
            controlled.len(),
            referenced.len(),
            skipped.len()
        );
        Ok(ClonePlan {
            source_workspace_id,
            destination_workspace_id: destination.workspace_id,
            destination_flight_id,
            folders,
            referenced,
            controlled,
            skipped,
            stage,
        })
    }

    // Helpers

    async fn run_flight(&self, flight_class: &str, inputs: FlightMap, debug: FlightDebugInfo) -> Result<FlightState> {
        let flight_id = Uuid::new_v4().to_string();
        self.engine.submit_with_id(&flight_id, flight_class, inputs, debug).await?;
        self.engine.wait_for_flight(&flight_id, self.options.flight_timeout).await
    }

    async fn caller_email(&self, user: &BearerToken) -> Result<String> {
        self.deps
            .broker
            .user_info(user)
            .await?
            .map(|u| u.user_email)
            .ok_or_else(|| OrchestratorError::InvalidInput("the requesting user is not registered".to_string()))
    }

    async fn require_folder(&self, workspace_id: Uuid, folder_id: Uuid) -> Result<()> {
        match self.folders.get_folder(workspace_id, folder_id).await {
            Ok(_) => Ok(()),
            Err(OrchestratorError::NotFound(_)) => Err(OrchestratorError::InvalidInput(format!(
                "folder {} is not in workspace {}",
                folder_id, workspace_id
            ))),
            Err(e) => Err(e),
        }
    }
}

fn advance(stage: CloneStage, source_workspace_id: Uuid) -> Result<CloneStage> {
    let next = stage
        .next()
        .ok_or_else(|| OrchestratorError::InternalLogic(format!("clone stage {:?} has no successor", stage)))?;
    debug!("Clone of {}: {:?} -> {:?}", source_workspace_id, stage, next);
    Ok(next)
}

fn new_workspace(request: CreateWorkspaceRequest) -> Result<Workspace> {
    if request.user_facing_id.trim().is_empty() {
        return Err(OrchestratorError::InvalidInput("user facing id must not be empty".to_string()));
    }
    Ok(Workspace {
        workspace_id: request.workspace_id.unwrap_or_else(Uuid::new_v4),
        user_facing_id: request.user_facing_id,
        display_name: request.display_name,
        description: request.description,
        spend_profile: request.spend_profile,
        created_by_email: None,
        created_date: Utc::now(),
    })
}

fn create_workspace_inputs(workspace: &Workspace, user: &BearerToken) -> Result<FlightMap> {
    FlightMap::new()
        .with(&keys::WORKSPACE_ID, &workspace.workspace_id)?
        .with(&keys::WORKSPACE, workspace)?
        .with(&keys::USER_TOKEN, user)
}

/// The error a finished flight ended with.
pub fn flight_failure(state: &FlightState) -> OrchestratorError {
    OrchestratorError::FlightFailed {
        flight_id: state.flight_id.clone(),
        status: state.status,
        error: state.error.clone().unwrap_or_else(|| FlightError {
            kind: crate::error::ErrorKind::InternalLogic,
            message: format!("flight ended {:?} without a recorded error", state.status),
        }),
    }
}

fn flight_succeeded(state: &FlightState) -> Result<()> {
    match state.status {
        FlightStatus::Success => Ok(()),
        _ => Err(flight_failure(state)),
    }
}

fn flight_result<T: DeserializeOwned>(state: &FlightState, key: &FlightKey<T>) -> Result<T> {
    flight_succeeded(state)?;
    state.result(key)?.ok_or_else(|| {
        OrchestratorError::InternalLogic(format!(
            "flight {} succeeded without {}",
            state.flight_id,
            key.name()
        ))
    })
}
