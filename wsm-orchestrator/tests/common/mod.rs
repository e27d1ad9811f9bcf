#![allow(dead_code)]

use std::sync::Arc;
use uuid::Uuid;
use wsm_orchestrator::cloud::{CloudClients, FakeCloud};
use wsm_orchestrator::iam::{BearerToken, InMemoryBroker, ServiceIdentity};
use wsm_orchestrator::model::{AccessScope, ResourceAttributes};
use wsm_orchestrator::test_utils::create_test_db;
use wsm_orchestrator::{
    CloudContextRequest, CreateControlledResourceRequest, CreateWorkspaceRequest, ManagerOptions, WorkspaceManager,
};

pub const SERVICE_EMAIL: &str = "wsm@service.iam";
pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";

pub struct Harness {
    pub manager: WorkspaceManager,
    pub broker: Arc<InMemoryBroker>,
    pub cloud: Arc<FakeCloud>,
    pub alice: BearerToken,
    pub bob: BearerToken,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(ManagerOptions::default()).await
    }

    pub async fn with_options(options: ManagerOptions) -> Self {
        let pool = create_test_db().await;
        let broker = Arc::new(InMemoryBroker::new());
        let cloud = Arc::new(FakeCloud::new());

        let service_token = BearerToken::new("service-token");
        let alice = BearerToken::new("alice-token");
        let bob = BearerToken::new("bob-token");
        broker.add_user(&service_token, SERVICE_EMAIL);
        broker.add_user(&alice, ALICE);
        broker.add_user(&bob, BOB);

        let clients = CloudClients {
            gcp: cloud.clone(),
            azure: cloud.clone(),
            aws: cloud.clone(),
        };
        let manager = WorkspaceManager::builder(
            pool,
            broker.clone(),
            ServiceIdentity::new(SERVICE_EMAIL, service_token),
            clients,
        )
        .options(options)
        .build();

        Self {
            manager,
            broker,
            cloud,
            alice,
            bob,
        }
    }

    /// A workspace owned by alice.
    pub async fn workspace(&self, user_facing_id: &str) -> Uuid {
        self.manager
            .create_workspace(
                &self.alice,
                CreateWorkspaceRequest {
                    user_facing_id: user_facing_id.to_string(),
                    ..Default::default()
                },
            )
            .await
            .expect("Failed to create workspace")
            .workspace_id
    }

    /// A workspace owned by alice with a READY GCP context; returns the project id too.
    pub async fn gcp_workspace(&self, user_facing_id: &str) -> (Uuid, String) {
        let workspace_id = self.workspace(user_facing_id).await;
        let context = self
            .manager
            .create_cloud_context(&self.alice, workspace_id, CloudContextRequest::Gcp)
            .await
            .expect("Failed to create GCP context");
        let project_id = context
            .as_gcp()
            .expect("GCP context")
            .project_id
            .clone();
        (workspace_id, project_id)
    }
}

pub fn bucket(name: &str) -> ResourceAttributes {
    ResourceAttributes::GcsBucket {
        bucket_name: name.to_string(),
        location: None,
    }
}

pub fn private_bucket_request(workspace_id: Uuid, name: &str, assignee: &str) -> CreateControlledResourceRequest {
    let mut request = CreateControlledResourceRequest::shared(workspace_id, name, bucket(name));
    request.access_scope = AccessScope::Private;
    request.assigned_user = Some(assignee.to_string());
    request.private_role = Some(wsm_orchestrator::iam::ControlledResourceIamRole::Writer);
    request
}
