mod common;

use common::{bucket, private_bucket_request, Harness, BOB};
use std::time::Duration;
use wsm_orchestrator::model::{CloningInstructions, ResourceAttributes};
use wsm_orchestrator::{
    CloneStage, CreateControlledResourceRequest, CreateReferencedResourceRequest, CreateWorkspaceRequest,
    FlightStatus, OrchestratorError,
};

#[tokio::test]
async fn test_clone_plan_remaps_and_filters_by_caller() {
    let h = Harness::new().await;
    let (source, _) = h.gcp_workspace("source").await;

    let root = h.manager.create_folder(source, "root", None, None).await.unwrap();
    let child = h
        .manager
        .create_folder(source, "child", None, Some(root.folder_id))
        .await
        .unwrap();

    let repo = h
        .manager
        .create_referenced_resource(
            &h.alice,
            CreateReferencedResourceRequest {
                workspace_id: source,
                name: "repo".to_string(),
                description: None,
                cloning_instructions: CloningInstructions::CopyReference,
                folder_id: Some(child.folder_id),
                attributes: ResourceAttributes::ReferencedGitRepo {
                    git_repo_url: "https://github.com/example/repo.git".to_string(),
                },
            },
        )
        .await
        .unwrap();

    let mut shared = CreateControlledResourceRequest::shared(source, "shared", bucket("clone-shared"));
    shared.cloning_instructions = CloningInstructions::CopyDefinition;
    let shared = h.manager.create_controlled_resource(&h.alice, shared).await.unwrap();

    let mut private = private_bucket_request(source, "bobs", BOB);
    private.cloning_instructions = CloningInstructions::CopyDefinition;
    let private = h.manager.create_controlled_resource(&h.alice, private).await.unwrap();

    // COPY_NOTHING never reaches the plan.
    h.manager
        .create_controlled_resource(
            &h.alice,
            CreateControlledResourceRequest::shared(source, "scratch", bucket("clone-scratch")),
        )
        .await
        .unwrap();

    // Bob cannot read the shared bucket but is the private bucket's assignee.
    let plan = h
        .manager
        .clone_workspace(
            &h.bob,
            source,
            CreateWorkspaceRequest {
                user_facing_id: "destination".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to plan clone");

    assert_eq!(plan.stage, CloneStage::PrepareClonePlan);
    assert_eq!(plan.source_workspace_id, source);
    assert_ne!(plan.destination_workspace_id, source);

    assert_eq!(plan.folders.len(), 2);
    assert!(plan.folders.iter().all(|f| f.workspace_id == plan.destination_workspace_id));
    let new_root = &plan.folders[0];
    assert_eq!(new_root.display_name, "root");
    assert_eq!(plan.folders[1].parent_folder_id, Some(new_root.folder_id));

    assert_eq!(plan.referenced.len(), 1);
    assert_eq!(plan.referenced[0].source.resource_id, repo.resource_id);
    assert_eq!(plan.referenced[0].destination_folder_id, Some(plan.folders[1].folder_id));
    assert_ne!(plan.referenced[0].destination_resource_id, repo.resource_id);

    assert_eq!(plan.controlled.len(), 1);
    assert_eq!(plan.controlled[0].source.resource_id, private.resource_id);
    assert_eq!(plan.skipped, vec![shared.resource_id]);

    // The destination workspace is created by its own flight, owned by the caller.
    let state = h
        .manager
        .engine()
        .wait_for_flight(&plan.destination_flight_id, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(state.status, FlightStatus::Success);
    let destination = h.manager.get_workspace(plan.destination_workspace_id).await.unwrap();
    assert_eq!(destination.user_facing_id, "destination");
    assert_eq!(destination.created_by_email.as_deref(), Some(BOB));
}

#[tokio::test]
async fn test_clone_of_missing_workspace_is_not_found() {
    let h = Harness::new().await;

    let err = h
        .manager
        .clone_workspace(
            &h.alice,
            uuid::Uuid::new_v4(),
            CreateWorkspaceRequest {
                user_facing_id: "nowhere".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
    // Nothing was submitted for the destination.
    assert!(h.manager.engine().list_flights(None).await.unwrap().is_empty());
}
