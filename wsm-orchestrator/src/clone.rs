//! Workspace clone: snapshot the source, start the destination workspace, and plan which
//! resources to copy under which new ids.

use crate::dao::{fetch_workspace, list_cloneable_resources, list_cloud_contexts, list_enabled_applications, list_folders};
use crate::error::{OrchestratorError, Result};
use crate::iam::{BearerToken, IdentityBroker, ACTION_READ};
use crate::model::{CloudContextRecord, Folder, StewardshipType, Workspace, WsmApplication, WsmResource};
use crate::resource::ResourceHandlers;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloneStage {
    GatherSnapshot,
    CreateDestinationWorkspace,
    PrepareClonePlan,
    /// Copying resources into the destination. Not driven yet.
    Materialize,
}

impl CloneStage {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::GatherSnapshot => Some(Self::CreateDestinationWorkspace),
            Self::CreateDestinationWorkspace => Some(Self::PrepareClonePlan),
            Self::PrepareClonePlan => Some(Self::Materialize),
            Self::Materialize => None,
        }
    }
}

/// The source workspace as read in one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneSourceSnapshot {
    pub workspace: Workspace,
    pub cloud_contexts: Vec<CloudContextRecord>,
    pub applications: Vec<WsmApplication>,
    pub folders: Vec<Folder>,
    pub controlled: Vec<WsmResource>,
    pub referenced: Vec<WsmResource>,
}

/// Read everything a clone needs from the source inside a single read transaction.
///
/// Leaves out COPY_NOTHING resources, resources that are not READY, and controlled types
/// whose handler cannot be cloned.
pub async fn gather_snapshot(
    pool: &SqlitePool,
    workspace_id: Uuid,
    handlers: &ResourceHandlers,
) -> Result<CloneSourceSnapshot> {
    let mut tx = pool.begin().await?;

    let workspace = fetch_workspace(&mut *tx, workspace_id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {}", workspace_id)))?;
    let cloud_contexts = list_cloud_contexts(&mut *tx, workspace_id).await?;
    let applications = list_enabled_applications(&mut *tx, workspace_id).await?;
    let folders = list_folders(&mut *tx, workspace_id).await?;
    let resources = list_cloneable_resources(&mut *tx, workspace_id).await?;

    tx.commit().await?;

    let (controlled, referenced): (Vec<_>, Vec<_>) = resources
        .into_iter()
        .filter(|r| handlers.is_cloneable(r.resource_type()))
        .partition(|r| r.stewardship() == StewardshipType::Controlled);

    debug!(
        "Snapshot of {}: {} folders, {} controlled, {} referenced",
        workspace_id,
        folders.len(),
        controlled.len(),
        referenced.len()
    );
    Ok(CloneSourceSnapshot {
        workspace,
        cloud_contexts,
        applications,
        folders,
        controlled,
        referenced,
    })
}

/// Source id to destination id, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneIds {
    pub folders: BTreeMap<Uuid, Uuid>,
    pub referenced: BTreeMap<Uuid, Uuid>,
    pub controlled: BTreeMap<Uuid, Uuid>,
}

impl CloneIds {
    /// A fresh id for every folder and resource in the snapshot.
    pub fn generate(snapshot: &CloneSourceSnapshot) -> Self {
        Self {
            folders: snapshot
                .folders
                .iter()
                .map(|f| (f.folder_id, Uuid::new_v4()))
                .collect(),
            referenced: snapshot
                .referenced
                .iter()
                .map(|r| (r.resource_id, Uuid::new_v4()))
                .collect(),
            controlled: snapshot
                .controlled
                .iter()
                .map(|r| (r.resource_id, Uuid::new_v4()))
                .collect(),
        }
    }
}

/// Destination copies of the source folders, parents ahead of their children.
pub fn remap_folders(folders: &[Folder], ids: &CloneIds, destination_workspace_id: Uuid) -> Result<Vec<Folder>> {
    let mut remapped = Vec::with_capacity(folders.len());
    let mut placed = BTreeSet::new();
    let mut pending: Vec<&Folder> = folders.iter().collect();

    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();
        for folder in pending {
            let parent_ready = folder.parent_folder_id.is_none_or(|p| placed.contains(&p));
            if !parent_ready {
                deferred.push(folder);
                continue;
            }
            let folder_id = remap(&ids.folders, folder.folder_id)?;
            let parent_folder_id = folder
                .parent_folder_id
                .map(|parent| remap(&ids.folders, parent))
                .transpose()?;
            remapped.push(Folder {
                workspace_id: destination_workspace_id,
                folder_id,
                display_name: folder.display_name.clone(),
                description: folder.description.clone(),
                parent_folder_id,
            });
            placed.insert(folder.folder_id);
        }
        if deferred.len() == before {
            return Err(OrchestratorError::InternalLogic(format!(
                "{} folders have parents outside the snapshot or form a cycle",
                before
            )));
        }
        pending = deferred;
    }
    Ok(remapped)
}

fn remap(map: &BTreeMap<Uuid, Uuid>, source: Uuid) -> Result<Uuid> {
    map.get(&source)
        .copied()
        .ok_or_else(|| OrchestratorError::InternalLogic(format!("no destination id for {}", source)))
}

/// One resource to copy into the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCloneItem {
    pub source: WsmResource,
    pub destination_resource_id: Uuid,
    pub destination_folder_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClonePlan {
    pub source_workspace_id: Uuid,
    pub destination_workspace_id: Uuid,
    /// Flight creating the destination workspace; submitted, not awaited.
    pub destination_flight_id: String,
    pub folders: Vec<Folder>,
    pub referenced: Vec<ResourceCloneItem>,
    pub controlled: Vec<ResourceCloneItem>,
    /// Controlled resources the requesting user cannot read.
    pub skipped: Vec<Uuid>,
    pub stage: CloneStage,
}

/// Split controlled resources by whether the user can read them. Referenced resources hold only
/// metadata the user already sees, so they always pass.
pub async fn filter_readable(
    broker: &dyn IdentityBroker,
    user_token: &BearerToken,
    resources: Vec<WsmResource>,
) -> Result<(Vec<WsmResource>, Vec<Uuid>)> {
    let mut readable = Vec::new();
    let mut skipped = Vec::new();
    for resource in resources {
        if resource.stewardship() == StewardshipType::Referenced {
            readable.push(resource);
            continue;
        }
        let target = crate::resource::broker_ref(&resource)?;
        if broker.resource_permission(user_token, &target, ACTION_READ).await? {
            readable.push(resource);
        } else {
            info!("Skipping {} in clone; caller cannot read it", target);
            skipped.push(resource.resource_id);
        }
    }
    Ok((readable, skipped))
}

/// Pair each readable resource with its destination ids.
pub fn plan_items(resources: Vec<WsmResource>, resource_ids: &BTreeMap<Uuid, Uuid>, ids: &CloneIds) -> Result<Vec<ResourceCloneItem>> {
    resources
        .into_iter()
        .map(|source| {
            let destination_resource_id = remap(resource_ids, source.resource_id)?;
            let destination_folder_id = source
                .folder_id
                .and_then(|folder| ids.folders.get(&folder).copied());
            Ok(ResourceCloneItem {
                source,
                destination_resource_id,
                destination_folder_id,
            })
        })
        .collect()
}
