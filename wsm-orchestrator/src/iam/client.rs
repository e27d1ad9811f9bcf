//! REST client for the identity broker.

use super::{AuthenticatedUser, BearerToken, BrokerResourceRef, IdentityBroker, PolicyDocument};
use crate::error::{OrchestratorError, Result};
use crate::remote::{response_error, transport_error};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const SERVICE: &str = "broker";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessPolicyMembership {
    member_emails: BTreeSet<String>,
    roles: Vec<String>,
    #[serde(default)]
    actions: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullyQualifiedResourceId {
    resource_type_name: String,
    resource_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResourceRequest {
    resource_id: String,
    policies: BTreeMap<String, AccessPolicyMembership>,
    auth_domain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<FullyQualifiedResourceId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessPolicyResponseEntry {
    policy_name: String,
    policy: AccessPolicyMembership,
}

#[derive(Deserialize)]
struct SyncedGroup {
    email: String,
}

/// [`IdentityBroker`] over HTTP.
#[derive(Clone)]
pub struct HttpIdentityBroker {
    client: Client,
    base_url: Url,
}

impl HttpIdentityBroker {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OrchestratorError::InvalidInput(format!("invalid broker url {}: {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OrchestratorError::InternalLogic(format!("failed to build http client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OrchestratorError::InvalidInput(format!("broker url {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, token: &BearerToken) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(token.secret())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| transport_error(SERVICE, e))?;
        debug!("Broker responded {} for {}", response.status(), response.url());
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(response_error(SERVICE, response).await)
        }
    }

    fn resource_segments<'a>(resource: &'a BrokerResourceRef, extra: &[&'a str]) -> Vec<&'a str> {
        let mut segments = vec![
            "api",
            "resources",
            "v2",
            resource.resource_type.as_str(),
            resource.resource_id.as_str(),
        ];
        segments.extend_from_slice(extra);
        segments
    }
}

#[async_trait]
impl IdentityBroker for HttpIdentityBroker {
    async fn user_info(&self, token: &BearerToken) -> Result<Option<AuthenticatedUser>> {
        let url = self.url(&["register", "user", "v2", "self", "info"])?;
        match self.send(self.request(Method::GET, url, token)).await {
            Ok(response) => Ok(Some(response.json().await.map_err(|e| transport_error(SERVICE, e))?)),
            Err(OrchestratorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn register_user(&self, token: &BearerToken) -> Result<AuthenticatedUser> {
        let url = self.url(&["register", "user", "v2", "self"])?;
        let response = self.send(self.request(Method::POST, url, token)).await?;
        response.json().await.map_err(|e| transport_error(SERVICE, e))
    }

    async fn create_resource(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        policies: &PolicyDocument,
        parent: Option<&BrokerResourceRef>,
    ) -> Result<()> {
        let body = CreateResourceRequest {
            resource_id: resource.resource_id.clone(),
            policies: policies
                .roles()
                .map(|role| {
                    (
                        role.to_string(),
                        AccessPolicyMembership {
                            member_emails: policies.members(role),
                            roles: vec![role.to_string()],
                            actions: Vec::new(),
                        },
                    )
                })
                .collect(),
            auth_domain: Vec::new(),
            parent: parent.map(|p| FullyQualifiedResourceId {
                resource_type_name: p.resource_type.as_str().to_string(),
                resource_id: p.resource_id.clone(),
            }),
        };

        let url = self.url(&["api", "resources", "v2", resource.resource_type.as_str()])?;
        match self.send(self.request(Method::POST, url, token).json(&body)).await {
            Ok(_) => {
                info!("Created broker resource {}", resource);
                Ok(())
            }
            Err(OrchestratorError::DuplicateResource(_)) => {
                info!("Broker resource {} already exists", resource);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_resource(&self, token: &BearerToken, resource: &BrokerResourceRef) -> Result<()> {
        let url = self.url(&Self::resource_segments(resource, &[]))?;
        match self.send(self.request(Method::DELETE, url, token)).await {
            Ok(_) => {
                info!("Deleted broker resource {}", resource);
                Ok(())
            }
            Err(OrchestratorError::NotFound(_)) => {
                info!("Broker resource {} already gone", resource);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn add_user_to_policy(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
        email: &str,
    ) -> Result<()> {
        let url = self.url(&Self::resource_segments(resource, &["policies", role, "memberEmails", email]))?;
        self.send(self.request(Method::PUT, url, token)).await?;
        Ok(())
    }

    async fn remove_user_from_policy(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
        email: &str,
    ) -> Result<()> {
        let url = self.url(&Self::resource_segments(resource, &["policies", role, "memberEmails", email]))?;
        match self.send(self.request(Method::DELETE, url, token)).await {
            Ok(_) | Err(OrchestratorError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn resource_permission(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        action: &str,
    ) -> Result<bool> {
        let url = self.url(&Self::resource_segments(resource, &["action", action]))?;
        match self.send(self.request(Method::GET, url, token)).await {
            Ok(response) => response.json().await.map_err(|e| transport_error(SERVICE, e)),
            Err(OrchestratorError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn sync_policy_to_group(
        &self,
        token: &BearerToken,
        resource: &BrokerResourceRef,
        role: &str,
    ) -> Result<String> {
        let url = self.url(&[
            "api",
            "google",
            "v1",
            "resource",
            resource.resource_type.as_str(),
            resource.resource_id.as_str(),
            role,
            "sync",
        ])?;
        let response = self.send(self.request(Method::POST, url, token)).await?;
        let group: SyncedGroup = response.json().await.map_err(|e| transport_error(SERVICE, e))?;
        debug!("Role {} of {} syncs to {}", role, resource, group.email);
        Ok(group.email)
    }

    async fn list_resource_policies(&self, token: &BearerToken, resource: &BrokerResourceRef) -> Result<PolicyDocument> {
        let url = self.url(&Self::resource_segments(resource, &["policies"]))?;
        let response = self.send(self.request(Method::GET, url, token)).await?;
        let entries: Vec<AccessPolicyResponseEntry> =
            response.json().await.map_err(|e| transport_error(SERVICE, e))?;

        let mut policy = PolicyDocument::new();
        for entry in entries {
            policy.declare(&entry.policy_name);
            for email in &entry.policy.member_emails {
                policy.add_member(&entry.policy_name, email);
            }
        }
        Ok(policy)
    }
}
