//! In-memory broker for tests.

use super::{
    AuthenticatedUser, BearerToken, BrokerResourceRef, IdentityBroker, PolicyDocument,
    ACTION_READ,
};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    CreateResource(BrokerResourceRef),
    DeleteResource(BrokerResourceRef),
    AddUser(BrokerResourceRef, String, String),
    RemoveUser(BrokerResourceRef, String, String),
    SyncGroup(BrokerResourceRef, String),
}

struct StoredResource {
    policies: PolicyDocument,
    parent: Option<BrokerResourceRef>,
}

#[derive(Default)]
struct BrokerState {
    users: HashMap<String, AuthenticatedUser>,
    resources: BTreeMap<BrokerResourceRef, StoredResource>,
    calls: Vec<BrokerCall>,
    failures: HashMap<String, Vec<bool>>,
}

/// [`IdentityBroker`] backed by a map, with one-shot failure injection per operation name.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `token` resolve to `email`.
    pub fn add_user(&self, token: &BearerToken, email: &str) {
        self.lock().users.insert(
            token.secret().to_string(),
            AuthenticatedUser {
                user_email: email.to_string(),
                user_subject_id: format!("subject-{}", email),
            },
        );
    }

    /// Fail the next call to `operation` (e.g. `"create_resource"`).
    pub fn fail_next(&self, operation: &str, retryable: bool) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push(retryable);
    }

    pub fn has_resource(&self, resource: &BrokerResourceRef) -> bool {
        self.lock().resources.contains_key(resource)
    }

    pub fn policies(&self, resource: &BrokerResourceRef) -> Option<PolicyDocument> {
        self.lock().resources.get(resource).map(|r| r.policies.clone())
    }

    /// Remove a resource behind the orchestrator's back.
    pub fn remove_resource(&self, resource: &BrokerResourceRef) {
        self.lock().resources.remove(resource);
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().calls.clone()
    }

    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn group_email(resource: &BrokerResourceRef, role: &str) -> String {
        format!("policy-{}-{}@groups.example.com", role, resource.resource_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(state: &mut BrokerState, operation: &str) -> Result<()> {
        let Some(pending) = state.failures.get_mut(operation) else {
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }
        let retryable = pending.remove(0);
        let message = format!("injected broker failure in {}", operation);
        if retryable {
            Err(OrchestratorError::RetryableRemote(message))
        } else {
            Err(OrchestratorError::FatalRemote(message))
        }
    }

    fn user(state: &BrokerState, token: &BearerToken) -> Result<AuthenticatedUser> {
        state
            .users
            .get(token.secret())
            .cloned()
            .ok_or_else(|| OrchestratorError::FatalRemote("broker returned 401: unknown token".to_string()))
    }
}

#[async_trait]
impl IdentityBroker for InMemoryBroker {
    async fn user_info(&self, token: &BearerToken) -> Result<Option<AuthenticatedUser>> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "user_info")?;
        Ok(state.users.get(token.secret()).cloned())
    }

    async fn register_user(&self, token: &BearerToken) -> Result<AuthenticatedUser> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "register_user")?;
        let user = AuthenticatedUser {
            user_email: "workspace-manager@service.example.com".to_string(),
            user_subject_id: "service".to_string(),
        };
        state.users.insert(token.secret().to_string(), user.clone());
        Ok(user)
    }

    async fn create_resource(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        policies: &PolicyDocument,
        parent: Option<&BrokerResourceRef>,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "create_resource")?;
        Self::user(&state, token)?;
        if let Some(parent) = parent {
            if !state.resources.contains_key(parent) {
                return Err(OrchestratorError::FatalRemote(format!("broker returned 400: parent {} missing", parent)));
            }
        }
        state.calls.push(BrokerCall::CreateResource(resource.clone()));
        state.resources.entry(resource.clone()).or_insert_with(|| StoredResource {
            policies: policies.clone(),
            parent: parent.cloned(),
        });
        Ok(())
    }

    async fn delete_resource(&self, token: &BearerToken, resource: &BrokerResourceRef) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "delete_resource")?;
        Self::user(&state, token)?;
        state.calls.push(BrokerCall::DeleteResource(resource.clone()));
        state.resources.remove(resource);
        state
            .resources
            .retain(|_, stored| stored.parent.as_ref() != Some(resource));
        Ok(())
    }

    async fn add_user_to_policy(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
        email: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "add_user_to_policy")?;
        Self::user(&state, token)?;
        state
            .calls
            .push(BrokerCall::AddUser(resource.clone(), role.to_string(), email.to_string()));
        let stored = state
            .resources
            .get_mut(resource)
            .ok_or_else(|| OrchestratorError::NotFound(format!("broker resource {}", resource)))?;
        stored.policies.add_member(role, email);
        Ok(())
    }

    async fn remove_user_from_policy(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
        email: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "remove_user_from_policy")?;
        Self::user(&state, token)?;
        state
            .calls
            .push(BrokerCall::RemoveUser(resource.clone(), role.to_string(), email.to_string()));
        if let Some(stored) = state.resources.get_mut(resource) {
            stored.policies.remove_member(role, email);
        }
        Ok(())
    }

    async fn resource_permission(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        action: &str,
    ) -> Result<bool> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "resource_permission")?;
        let user = Self::user(&state, token)?;
        if action != ACTION_READ {
            return Ok(false);
        }

        let mut current = state.resources.get(resource);
        while let Some(stored) = current {
            if !stored.policies.roles_of(&user.user_email).is_empty() {
                return Ok(true);
            }
            current = stored.parent.as_ref().and_then(|p| state.resources.get(p));
        }
        Ok(false)
    }

    async fn sync_policy_to_group(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
    ) -> Result<String> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "sync_policy_to_group")?;
        Self::user(&state, token)?;
        let known = state
            .resources
            .get(resource)
            .is_some_and(|stored| stored.policies.has_role(role));
        if !known {
            return Err(OrchestratorError::NotFound(format!("policy {} on {}", role, resource)));
        }
        state
            .calls
            .push(BrokerCall::SyncGroup(resource.clone(), role.to_string()));
        Ok(Self::group_email(resource, role))
    }

    async fn list_resource_policies(&self, token: &BearerToken, resource: &BrokerResourceRef) -> Result<PolicyDocument> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "list_resource_policies")?;
        Self::user(&state, token)?;
        state
            .resources
            .get(resource)
            .map(|r| r.policies.clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("broker resource {}", resource)))
    }
}
