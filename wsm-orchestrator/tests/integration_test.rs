//! End-to-end workspace lifecycle through the manager: workspace, cloud contexts, resources,
//! activity log, and the rules that keep deletes ordered.

mod common;

use common::{bucket, Harness, ALICE};
use wsm_orchestrator::dao::{ActivityChangeType, ActivitySubjectType};
use wsm_orchestrator::iam::{BrokerResourceRef, WsmIamRole};
use wsm_orchestrator::model::{AwsCloudContext, AzureCloudContext, CloudPlatform, ResourceAttributes};
use wsm_orchestrator::{
    CloudContextRequest, CreateControlledResourceRequest, CreateWorkspaceRequest, ErrorKind, ManagerOptions,
    OrchestratorError, WsmResourceState,
};

#[tokio::test]
async fn test_create_workspace_records_creator_and_broker_workspace() {
    let h = Harness::new().await;

    let workspace = h
        .manager
        .create_workspace(
            &h.alice,
            CreateWorkspaceRequest {
                user_facing_id: "genomics".to_string(),
                display_name: Some("Genomics".to_string()),
                spend_profile: Some("wm-default-spend-profile".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create workspace");

    assert_eq!(workspace.user_facing_id, "genomics");
    assert_eq!(workspace.created_by_email.as_deref(), Some(ALICE));

    let policies = h
        .broker
        .policies(&BrokerResourceRef::workspace(workspace.workspace_id))
        .expect("broker workspace");
    assert!(policies.members(WsmIamRole::Owner.as_str()).contains(ALICE));

    let by_name = h
        .manager
        .get_workspace_by_user_facing_id("genomics")
        .await
        .unwrap();
    assert_eq!(by_name.workspace_id, workspace.workspace_id);

    let change = h.manager.last_change(workspace.workspace_id).await.unwrap().unwrap();
    assert_eq!(change.change_type, ActivityChangeType::Create);
    assert_eq!(change.change_subject_type, ActivitySubjectType::Workspace);
    assert_eq!(change.actor_email, ALICE);
}

#[tokio::test]
async fn test_duplicate_user_facing_id_is_rejected() {
    let h = Harness::new().await;
    h.workspace("shared-name").await;

    let err = h
        .manager
        .create_workspace(
            &h.bob,
            CreateWorkspaceRequest {
                user_facing_id: "shared-name".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateResource);
}

#[tokio::test]
async fn test_unregistered_caller_is_invalid_input() {
    let h = Harness::new().await;
    let stranger = wsm_orchestrator::iam::BearerToken::new("nobody");

    let err = h
        .manager
        .create_workspace(
            &stranger,
            CreateWorkspaceRequest {
                user_facing_id: "ghost".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // The failed flight removed its row.
    assert!(matches!(
        h.manager.get_workspace_by_user_facing_id("ghost").await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_full_gcp_lifecycle() {
    let h = Harness::new().await;
    let (workspace_id, project_id) = h.gcp_workspace("lifecycle").await;
    assert!(project_id.starts_with("terra-"));
    assert!(h.cloud.has_project(&project_id));

    let context = h
        .manager
        .get_cloud_context(workspace_id, CloudPlatform::Gcp)
        .await
        .unwrap()
        .expect("ready context");
    let groups = context.as_gcp().unwrap().policy_groups.clone().expect("policy groups");
    let project_iam = h.cloud.project_iam(&project_id).unwrap();
    assert!(project_iam
        .bindings
        .iter()
        .any(|b| b.members.iter().any(|m| m.contains(&groups.owner))));

    let resource = h
        .manager
        .create_controlled_resource(
            &h.alice,
            CreateControlledResourceRequest::shared(workspace_id, "results", bucket("lifecycle-results")),
        )
        .await
        .expect("Failed to create bucket");
    assert_eq!(resource.state, WsmResourceState::Ready);
    assert!(h.cloud.has_bucket("lifecycle-results"));

    // The context cannot go while a resource still lives in it.
    let err = h
        .manager
        .delete_cloud_context(&h.alice, workspace_id, CloudPlatform::Gcp)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(h.cloud.has_project(&project_id));

    // Nor the workspace while it has a context.
    let err = h.manager.delete_workspace(&h.alice, workspace_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    h.manager
        .delete_controlled_resource(&h.alice, workspace_id, resource.resource_id)
        .await
        .expect("Failed to delete bucket");
    assert!(!h.cloud.has_bucket("lifecycle-results"));

    h.manager
        .delete_cloud_context(&h.alice, workspace_id, CloudPlatform::Gcp)
        .await
        .expect("Failed to delete context");
    assert!(!h.cloud.has_project(&project_id));
    assert!(h.manager.list_cloud_contexts(workspace_id).await.unwrap().is_empty());

    h.manager
        .delete_workspace(&h.alice, workspace_id)
        .await
        .expect("Failed to delete workspace");
    assert!(!h.broker.has_resource(&BrokerResourceRef::workspace(workspace_id)));
    assert!(matches!(
        h.manager.get_workspace(workspace_id).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_second_context_on_same_platform_is_duplicate() {
    let h = Harness::new().await;
    let (workspace_id, _) = h.gcp_workspace("twice").await;

    let err = h
        .manager
        .create_cloud_context(&h.alice, workspace_id, CloudContextRequest::Gcp)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateResource);
    assert_eq!(h.cloud.create_count("project"), 1);
}

#[tokio::test]
async fn test_azure_context_requires_existing_resource_group() {
    let h = Harness::new().await;
    let workspace_id = h.workspace("azure").await;
    let request = AzureCloudContext {
        tenant_id: "tenant".to_string(),
        subscription_id: "sub".to_string(),
        resource_group_id: "mrg".to_string(),
    };

    let err = h
        .manager
        .create_cloud_context(&h.alice, workspace_id, CloudContextRequest::Azure(request.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(h.manager.list_cloud_contexts(workspace_id).await.unwrap().is_empty());

    h.cloud.add_resource_group("sub", "mrg");
    let context = h
        .manager
        .create_cloud_context(&h.alice, workspace_id, CloudContextRequest::Azure(request.clone()))
        .await
        .expect("Failed to create Azure context");
    assert_eq!(context.as_azure(), Some(&request));
}

#[tokio::test]
async fn test_aws_context_uses_configured_environment() {
    let environment = AwsCloudContext {
        organization_id: "o-123".to_string(),
        account_id: "123456789012".to_string(),
        tenant_alias: "tenant".to_string(),
        environment_alias: "dev".to_string(),
    };
    let h = Harness::with_options(ManagerOptions {
        aws_environment: Some(environment.clone()),
        ..Default::default()
    })
    .await;
    let workspace_id = h.workspace("aws").await;

    let context = h
        .manager
        .create_cloud_context(&h.alice, workspace_id, CloudContextRequest::Aws)
        .await
        .expect("Failed to create AWS context");
    assert_eq!(context.as_aws(), Some(&environment));

    let folder = h
        .manager
        .create_controlled_resource(
            &h.alice,
            CreateControlledResourceRequest::shared(
                workspace_id,
                "scratch",
                ResourceAttributes::AwsStorageFolder {
                    prefix: "scratch".to_string(),
                    region: "us-east-1".to_string(),
                },
            ),
        )
        .await
        .expect("Failed to create folder");
    assert!(h.cloud.has_folder("123456789012", "scratch"));

    h.manager
        .delete_controlled_resource(&h.alice, workspace_id, folder.resource_id)
        .await
        .unwrap();
    assert!(!h.cloud.has_folder("123456789012", "scratch"));
}

#[tokio::test]
async fn test_aws_context_without_environment_fails() {
    let h = Harness::new().await;
    let workspace_id = h.workspace("no-aws").await;

    let err = h
        .manager
        .create_cloud_context(&h.alice, workspace_id, CloudContextRequest::Aws)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(h
        .manager
        .get_cloud_context(workspace_id, CloudPlatform::Aws)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_resource_without_context_needs_cloud_context() {
    let h = Harness::new().await;
    let workspace_id = h.workspace("no-context").await;

    let err = h
        .manager
        .create_controlled_resource(
            &h.alice,
            CreateControlledResourceRequest::shared(workspace_id, "orphan", bucket("orphan-bucket")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CloudContextRequired);
    assert!(h.manager.list_resources(workspace_id).await.unwrap().is_empty());
    assert!(!h.cloud.has_bucket("orphan-bucket"));
}

#[tokio::test]
async fn test_flexible_resource_needs_no_context() {
    let h = Harness::new().await;
    let workspace_id = h.workspace("flex").await;

    let resource = h
        .manager
        .create_controlled_resource(
            &h.alice,
            CreateControlledResourceRequest::shared(
                workspace_id,
                "notes",
                ResourceAttributes::Flexible {
                    type_namespace: "terra".to_string(),
                    type_name: "notes".to_string(),
                    data: Some("{}".to_string()),
                },
            ),
        )
        .await
        .expect("Failed to create flexible resource");
    assert_eq!(resource.state, WsmResourceState::Ready);

    // Cloud-less controlled resources still block the workspace delete.
    let err = h.manager.delete_workspace(&h.alice, workspace_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    h.manager
        .delete_controlled_resource(&h.alice, workspace_id, resource.resource_id)
        .await
        .unwrap();
    h.manager.delete_workspace(&h.alice, workspace_id).await.unwrap();
}

#[tokio::test]
async fn test_referenced_resources_and_folders() {
    let h = Harness::new().await;
    let workspace_id = h.workspace("refs").await;

    let parent = h
        .manager
        .create_folder(workspace_id, "analysis", None, None)
        .await
        .unwrap();
    let child = h
        .manager
        .create_folder(workspace_id, "2024", Some("this year"), Some(parent.folder_id))
        .await
        .unwrap();
    assert_eq!(h.manager.list_folders(workspace_id).await.unwrap().len(), 2);

    let repo = h
        .manager
        .create_referenced_resource(
            &h.alice,
            wsm_orchestrator::CreateReferencedResourceRequest {
                workspace_id,
                name: "pipeline".to_string(),
                description: None,
                cloning_instructions: wsm_orchestrator::model::CloningInstructions::CopyReference,
                folder_id: Some(child.folder_id),
                attributes: ResourceAttributes::ReferencedGitRepo {
                    git_repo_url: "https://github.com/example/pipeline.git".to_string(),
                },
            },
        )
        .await
        .expect("Failed to create referenced resource");
    assert_eq!(repo.state, WsmResourceState::Ready);
    assert_eq!(repo.folder_id, Some(child.folder_id));

    // Referenced resources do not hold up the workspace delete, but they go with it.
    h.manager
        .delete_referenced_resource(&h.alice, workspace_id, repo.resource_id)
        .await
        .unwrap();
    assert!(matches!(
        h.manager
            .delete_referenced_resource(&h.alice, workspace_id, repo.resource_id)
            .await,
        Err(OrchestratorError::NotFound(_))
    ));
    h.manager.delete_workspace(&h.alice, workspace_id).await.unwrap();
}

#[tokio::test]
async fn test_folder_in_other_workspace_is_invalid() {
    let h = Harness::new().await;
    let first = h.workspace("first").await;
    let second = h.workspace("second").await;
    let folder = h.manager.create_folder(first, "mine", None, None).await.unwrap();

    let mut request = CreateControlledResourceRequest::shared(
        second,
        "notes",
        ResourceAttributes::Flexible {
            type_namespace: "terra".to_string(),
            type_name: "notes".to_string(),
            data: None,
        },
    );
    request.folder_id = Some(folder.folder_id);

    let err = h.manager.create_controlled_resource(&h.alice, request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_recover_finds_nothing_after_clean_runs() {
    let h = Harness::new().await;
    h.workspace("clean").await;

    let resumed = h.manager.recover().await.unwrap();
    assert!(resumed.is_empty());
}
