//! Identity and access broker contract, role model and policy synthesis.

mod client;
mod identity;
#[cfg(any(test, feature = "test-utils"))]
mod mock;
mod policy;

pub use client::HttpIdentityBroker;
pub use identity::ServiceIdentity;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{BrokerCall, InMemoryBroker};
pub use policy::{controlled_resource_policy, declared_roles, workspace_default_policy, ResourcePolicyRequest};

use crate::error::Result;
use crate::model::ControlledResourceCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Resource types known to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BrokerResourceType {
    #[serde(rename = "workspace")]
    Workspace,
    #[serde(rename = "controlled-user-shared-workspace-resource")]
    ControlledUserShared,
    #[serde(rename = "controlled-user-private-workspace-resource")]
    ControlledUserPrivate,
    #[serde(rename = "controlled-application-shared-workspace-resource")]
    ControlledApplicationShared,
    #[serde(rename = "controlled-application-private-workspace-resource")]
    ControlledApplicationPrivate,
}

impl BrokerResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::ControlledUserShared => "controlled-user-shared-workspace-resource",
            Self::ControlledUserPrivate => "controlled-user-private-workspace-resource",
            Self::ControlledApplicationShared => "controlled-application-shared-workspace-resource",
            Self::ControlledApplicationPrivate => "controlled-application-private-workspace-resource",
        }
    }

    pub fn for_category(category: ControlledResourceCategory) -> Self {
        match category {
            ControlledResourceCategory::UserShared => Self::ControlledUserShared,
            ControlledResourceCategory::UserPrivate => Self::ControlledUserPrivate,
            ControlledResourceCategory::ApplicationShared => Self::ControlledApplicationShared,
            ControlledResourceCategory::ApplicationPrivate => Self::ControlledApplicationPrivate,
        }
    }
}

/// A (type, id) pair naming one broker resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrokerResourceRef {
    pub resource_type: BrokerResourceType,
    pub resource_id: String,
}

impl BrokerResourceRef {
    pub fn workspace(workspace_id: uuid::Uuid) -> Self {
        Self {
            resource_type: BrokerResourceType::Workspace,
            resource_id: workspace_id.to_string(),
        }
    }

    pub fn controlled(category: ControlledResourceCategory, resource_id: uuid::Uuid) -> Self {
        Self {
            resource_type: BrokerResourceType::for_category(category),
            resource_id: resource_id.to_string(),
        }
    }
}

impl std::fmt::Display for BrokerResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type.as_str(), self.resource_id)
    }
}

/// Roles on a controlled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlledResourceIamRole {
    Owner,
    Editor,
    Writer,
    Reader,
}

impl ControlledResourceIamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Writer => "writer",
            Self::Reader => "reader",
        }
    }
}

/// Roles on a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsmIamRole {
    Owner,
    Writer,
    Reader,
    Application,
    Manager,
    ProjectOwner,
}

impl WsmIamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Writer => "writer",
            Self::Reader => "reader",
            Self::Application => "application",
            Self::Manager => "manager",
            Self::ProjectOwner => "project-owner",
        }
    }
}

/// Credential attached to every broker call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user_email: String,
    pub user_subject_id: String,
}

/// Role name to member emails. Declared roles are present even with no members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyDocument {
    policies: BTreeMap<String, BTreeSet<String>>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `role` is present, possibly empty.
    pub fn declare(&mut self, role: &str) {
        self.policies.entry(role.to_string()).or_default();
    }

    pub fn add_member(&mut self, role: &str, email: &str) {
        self.policies
            .entry(role.to_string())
            .or_default()
            .insert(email.to_string());
    }

    pub fn remove_member(&mut self, role: &str, email: &str) -> bool {
        self.policies.get_mut(role).is_some_and(|m| m.remove(email))
    }

    /// Members of `role`; empty for undeclared roles.
    pub fn members(&self, role: &str) -> BTreeSet<String> {
        self.policies.get(role).cloned().unwrap_or_default()
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.policies.contains_key(role)
    }

    /// Roles in which `email` appears.
    pub fn roles_of(&self, email: &str) -> Vec<&str> {
        self.policies
            .iter()
            .filter(|(_, members)| members.contains(email))
            .map(|(role, _)| role.as_str())
            .collect()
    }
}

/// Actions checked through [`IdentityBroker::resource_permission`].
pub const ACTION_READ: &str = "read";

/// The external identity and access broker.
///
/// Implementations classify transport and status failures through the error taxonomy:
/// `create_resource` treats conflict as success and `delete_resource` treats not-found as
/// success.
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    /// `None` when the broker does not know the token's user.
    async fn user_info(&self, token: &BearerToken) -> Result<Option<AuthenticatedUser>>;

    async fn register_user(&self, token: &BearerToken) -> Result<AuthenticatedUser>;

    async fn create_resource(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        policies: &PolicyDocument,
        parent: Option<&BrokerResourceRef>,
    ) -> Result<()>;

    async fn delete_resource(&self, token: &BearerToken, resource: &BrokerResourceRef) -> Result<()>;

    async fn add_user_to_policy(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
        email: &str,
    ) -> Result<()>;

    async fn remove_user_from_policy(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
        email: &str,
    ) -> Result<()>;

    async fn resource_permission(&self, token: &BearerToken, resource: &BrokerResourceRef, action: &str)
        -> Result<bool>;

    /// Email of the group the broker keeps in sync with `role`. Idempotent.
    async fn sync_policy_to_group(&self, token: &BearerToken, resource: &BrokerResourceRef, role: &str)
        -> Result<String>;

    async fn list_resource_policies(&self, token: &BearerToken, resource: &BrokerResourceRef) -> Result<PolicyDocument>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_role_survives_serialization_when_empty() {
        let mut policy = PolicyDocument::new();
        policy.declare("reader");
        policy.add_member("owner", "wsm@sa");

        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"owner":["wsm@sa"],"reader":[]}"#);

        let back: PolicyDocument = serde_json::from_str(&json).unwrap();
        assert!(back.has_role("reader"));
        assert!(back.members("reader").is_empty());
        assert_eq!(back.roles_of("wsm@sa"), vec!["owner"]);
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = BearerToken::new("ya29.secret");
        assert_eq!(format!("{:?}", token), "BearerToken(***)");
        assert_eq!(token.secret(), "ya29.secret");
    }

    #[test]
    fn test_broker_type_names() {
        assert_eq!(
            BrokerResourceType::for_category(ControlledResourceCategory::UserPrivate).as_str(),
            "controlled-user-private-workspace-resource"
        );
        let json = serde_json::to_string(&BrokerResourceType::Workspace).unwrap();
        assert_eq!(json, "\"workspace\"");
    }
}
