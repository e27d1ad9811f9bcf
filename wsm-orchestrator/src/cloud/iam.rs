//! Cloud-native IAM: binding lists with etags, and the role tables that map broker roles onto
//! them.

use crate::error::{OrchestratorError, Result};
use crate::iam::{ControlledResourceIamRole, WsmIamRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const GROUP_PREFIX: &str = "group:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    pub members: BTreeSet<String>,
}

/// A binding list as read from the cloud. `etag` guards read-modify-write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl IamPolicy {
    /// Add `member` to `role`. Returns false when it was already bound.
    pub fn add_binding(&mut self, role: &str, member: &str) -> bool {
        match self.bindings.iter_mut().find(|b| b.role == role) {
            Some(binding) => binding.members.insert(member.to_string()),
            None => {
                self.bindings.push(Binding {
                    role: role.to_string(),
                    members: BTreeSet::from([member.to_string()]),
                });
                true
            }
        }
    }

    pub fn members(&self, role: &str) -> BTreeSet<String> {
        self.bindings
            .iter()
            .filter(|b| b.role == role)
            .flat_map(|b| b.members.iter().cloned())
            .collect()
    }
}

/// One BigQuery dataset access entry. Each entry names exactly one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetAccessEntry {
    pub role: String,
    pub group_by_email: String,
}

pub fn group_member(email: &str) -> String {
    format!("{}{}", GROUP_PREFIX, email)
}

/// Translate bindings into one access entry per member.
pub fn to_dataset_access(bindings: &[Binding]) -> Result<Vec<DatasetAccessEntry>> {
    let mut entries = Vec::new();
    for binding in bindings {
        for member in &binding.members {
            let email = member.strip_prefix(GROUP_PREFIX).ok_or_else(|| {
                OrchestratorError::InternalLogic(format!("dataset access member {} is not a group", member))
            })?;
            if email.is_empty() || email.contains(',') {
                return Err(OrchestratorError::InternalLogic(format!(
                    "dataset access member {} does not name exactly one group",
                    member
                )));
            }
            entries.push(DatasetAccessEntry {
                role: binding.role.clone(),
                group_by_email: email.to_string(),
            });
        }
    }

    let expected: usize = bindings.iter().map(|b| b.members.len()).sum();
    if entries.len() != expected {
        return Err(OrchestratorError::InternalLogic(format!(
            "translated {} access entries from {} members",
            entries.len(),
            expected
        )));
    }
    Ok(entries)
}

/// Project role a workspace policy group is bound to.
pub fn project_role(role: WsmIamRole, project_id: &str) -> Result<String> {
    let custom = match role {
        WsmIamRole::Owner => "terraProjectOwner",
        WsmIamRole::Writer | WsmIamRole::Application => "terraProjectWriter",
        WsmIamRole::Reader => "terraProjectReader",
        WsmIamRole::Manager | WsmIamRole::ProjectOwner => {
            return Err(OrchestratorError::InternalLogic(format!(
                "workspace role {:?} has no project role",
                role
            )));
        }
    };
    Ok(format!("projects/{}/roles/{}", project_id, custom))
}

pub fn bucket_role(role: ControlledResourceIamRole) -> &'static str {
    match role {
        ControlledResourceIamRole::Owner => "roles/storage.admin",
        ControlledResourceIamRole::Editor => "roles/storage.objectAdmin",
        ControlledResourceIamRole::Writer => "roles/storage.objectUser",
        ControlledResourceIamRole::Reader => "roles/storage.objectViewer",
    }
}

pub fn dataset_role(role: ControlledResourceIamRole) -> &'static str {
    match role {
        ControlledResourceIamRole::Owner | ControlledResourceIamRole::Editor => "OWNER",
        ControlledResourceIamRole::Writer => "WRITER",
        ControlledResourceIamRole::Reader => "READER",
    }
}
