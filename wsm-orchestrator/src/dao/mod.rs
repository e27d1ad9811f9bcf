//! SQLite access for workspaces, cloud contexts, resources and their satellites.
//!
//! Lifecycle writes go through [`state::update_state`] inside a transaction so the state check
//! and the write see the same row.

mod activity;
mod application;
mod cloud_context;
mod folder;
mod resource;
pub(crate) mod state;
mod workspace;

pub use activity::{ActivityChangeType, ActivityLogDao, ActivityLogEntry, ActivitySubjectType};
pub use application::ApplicationDao;
pub use cloud_context::CloudContextDao;
pub use folder::FolderDao;
pub use resource::ResourceDao;
pub use workspace::WorkspaceDao;

pub(crate) use application::list_enabled_applications;
pub(crate) use cloud_context::list_cloud_contexts;
pub(crate) use folder::list_folders;
pub(crate) use resource::list_cloneable_resources;
pub(crate) use workspace::fetch_workspace;

use crate::error::{OrchestratorError, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| OrchestratorError::InternalLogic(format!("Stored id {} is not a uuid: {}", raw, e)))
}

pub(crate) fn parse_optional_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
}
