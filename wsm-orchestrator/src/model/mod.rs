//! Workspace, resource and cloud context types.

mod cloud_context;
mod resource;
mod workspace;

pub use cloud_context::{
    AwsCloudContext, AzureCloudContext, CloudContext, CloudContextCommonFields,
    CloudContextRecord, GcpCloudContext, GcpPolicyGroups,
};
pub use resource::{
    AccessScope, CloningInstructions, ControlledFields, ControlledResourceCategory, ManagedBy,
    ResourceAttributes, ResourceType, StewardshipType, WsmResource,
};
pub use workspace::{ApplicationState, Folder, Workspace, WsmApplication};

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum CloudPlatform {
    Gcp,
    Azure,
    Aws,
    /// Resources that live in no particular cloud.
    Any,
}

impl std::fmt::Display for CloudPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gcp => "GCP",
            Self::Azure => "AZURE",
            Self::Aws => "AWS",
            Self::Any => "ANY",
        };
        f.write_str(s)
    }
}

/// Split a stored blob into its version tag and body.
pub(crate) fn read_version(json: &str) -> Result<(u64, serde_json::Value)> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            OrchestratorError::InvalidSerializedVersion("serialized form has no version tag".to_string())
        })?;
    Ok((version, value))
}
