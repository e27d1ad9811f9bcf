//! REST clients for the GCP and Azure JSON APIs.

use super::{
    AwsClient, AzureClient, AzureDiskInfo, BigQueryDatasetInfo, Binding, DatasetAccessEntry, GcpClient,
    GcpProject, GcsBucketInfo, IamPolicy,
};
use crate::error::{OrchestratorError, Result};
use crate::iam::BearerToken;
use crate::model::{AwsCloudContext, AzureCloudContext};
use crate::remote::{response_error, transport_error};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const AZURE_RESOURCE_GROUP_API: &str = "2021-04-01";
const AZURE_DISK_API: &str = "2023-04-02";

/// Authenticated JSON calls against one API root.
#[derive(Clone)]
struct JsonApi {
    service: &'static str,
    client: Client,
    base_url: Url,
    token: BearerToken,
}

impl JsonApi {
    fn new(service: &'static str, base_url: &str, token: BearerToken) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OrchestratorError::InvalidInput(format!("invalid {} url {}: {}", service, base_url, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OrchestratorError::InternalLogic(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            service,
            client,
            base_url,
            token,
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OrchestratorError::InvalidInput(format!("{} url cannot be a base", self.service)))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(self.token.secret())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| transport_error(self.service, e))?;
        debug!("{} responded {} for {}", self.service, response.status(), response.url());
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(response_error(self.service, response).await)
        }
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        response.json().await.map_err(|e| transport_error(self.service, e))
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        match self.send(self.request(Method::GET, url)).await {
            Ok(response) => Ok(Some(self.json(response).await?)),
            Err(OrchestratorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBinding {
    role: String,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct WirePolicy {
    #[serde(default)]
    bindings: Vec<WireBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
}

impl From<WirePolicy> for IamPolicy {
    fn from(wire: WirePolicy) -> Self {
        Self {
            bindings: wire
                .bindings
                .into_iter()
                .map(|b| Binding {
                    role: b.role,
                    members: b.members.into_iter().collect(),
                })
                .collect(),
            etag: wire.etag,
        }
    }
}

impl From<&IamPolicy> for WirePolicy {
    fn from(policy: &IamPolicy) -> Self {
        Self {
            bindings: policy
                .bindings
                .iter()
                .map(|b| WireBinding {
                    role: b.role.clone(),
                    members: b.members.iter().cloned().collect(),
                })
                .collect(),
            etag: policy.etag.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProject {
    project_id: String,
    /// `projects/{number}`
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBucket {
    name: String,
    project_number: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDatasetReference {
    project_id: String,
    dataset_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDataset {
    dataset_reference: WireDatasetReference,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    access: Vec<WireAccess>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAccess {
    role: Option<String>,
    group_by_email: Option<String>,
}

/// Resource Manager, Cloud Storage and BigQuery over their JSON APIs.
#[derive(Clone)]
pub struct GcpRestClient {
    resource_manager: JsonApi,
    storage: JsonApi,
    bigquery: JsonApi,
}

impl GcpRestClient {
    pub fn new(token: BearerToken) -> Result<Self> {
        Self::with_endpoints(
            token,
            "https://cloudresourcemanager.googleapis.com/v3/",
            "https://storage.googleapis.com/storage/v1/",
            "https://bigquery.googleapis.com/bigquery/v2/",
        )
    }

    pub fn with_endpoints(token: BearerToken, resource_manager: &str, storage: &str, bigquery: &str) -> Result<Self> {
        Ok(Self {
            resource_manager: JsonApi::new("resource manager", resource_manager, token.clone())?,
            storage: JsonApi::new("cloud storage", storage, token.clone())?,
            bigquery: JsonApi::new("bigquery", bigquery, token)?,
        })
    }
}

#[async_trait]
impl GcpClient for GcpRestClient {
    async fn get_project(&self, project_id: &str) -> Result<Option<GcpProject>> {
        let api = &self.resource_manager;
        let project: Option<WireProject> = api.get_optional(api.url(&["projects", project_id], &[])?).await?;
        Ok(project.map(|p| GcpProject {
            project_id: p.project_id,
            project_number: p.name.trim_start_matches("projects/").to_string(),
        }))
    }

    async fn create_project(&self, project_id: &str) -> Result<()> {
        let api = &self.resource_manager;
        let url = api.url(&["projects"], &[])?;
        api.send(api.request(Method::POST, url).json(&json!({ "projectId": project_id })))
            .await?;
        info!("Requested GCP project {}", project_id);
        Ok(())
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        let api = &self.resource_manager;
        let url = api.url(&["projects", project_id], &[])?;
        api.send(api.request(Method::DELETE, url)).await?;
        info!("Deleted GCP project {}", project_id);
        Ok(())
    }

    async fn get_project_iam_policy(&self, project_id: &str) -> Result<IamPolicy> {
        let api = &self.resource_manager;
        let method = format!("{}:getIamPolicy", project_id);
        let url = api.url(&["projects", method.as_str()], &[])?;
        let response = api.send(api.request(Method::POST, url).json(&json!({}))).await?;
        let policy: WirePolicy = api.json(response).await?;
        Ok(policy.into())
    }

    async fn set_project_iam_policy(&self, project_id: &str, policy: &IamPolicy) -> Result<()> {
        let api = &self.resource_manager;
        let method = format!("{}:setIamPolicy", project_id);
        let url = api.url(&["projects", method.as_str()], &[])?;
        let body = json!({ "policy": WirePolicy::from(policy) });
        api.send(api.request(Method::POST, url).json(&body)).await?;
        Ok(())
    }

    async fn get_bucket(&self, bucket_name: &str) -> Result<Option<GcsBucketInfo>> {
        let api = &self.storage;
        let bucket: Option<WireBucket> = api.get_optional(api.url(&["b", bucket_name], &[])?).await?;
        Ok(bucket.map(|b| GcsBucketInfo {
            name: b.name,
            project_number: b.project_number,
            location: b.location,
        }))
    }

    async fn create_bucket(&self, project_id: &str, bucket_name: &str, location: Option<&str>) -> Result<()> {
        let api = &self.storage;
        let url = api.url(&["b"], &[("project", project_id)])?;
        let mut body = json!({ "name": bucket_name });
        if let Some(location) = location {
            body["location"] = json!(location);
        }
        api.send(api.request(Method::POST, url).json(&body)).await?;
        info!("Created bucket {} in project {}", bucket_name, project_id);
        Ok(())
    }

    async fn delete_bucket(&self, bucket_name: &str) -> Result<()> {
        let api = &self.storage;
        let url = api.url(&["b", bucket_name], &[])?;
        api.send(api.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn get_bucket_iam_policy(&self, bucket_name: &str) -> Result<IamPolicy> {
        let api = &self.storage;
        let url = api.url(&["b", bucket_name, "iam"], &[])?;
        let response = api.send(api.request(Method::GET, url)).await?;
        let policy: WirePolicy = api.json(response).await?;
        Ok(policy.into())
    }

    async fn set_bucket_iam_policy(&self, bucket_name: &str, policy: &IamPolicy) -> Result<()> {
        let api = &self.storage;
        let url = api.url(&["b", bucket_name, "iam"], &[])?;
        api.send(api.request(Method::PUT, url).json(&WirePolicy::from(policy)))
            .await?;
        Ok(())
    }

    async fn get_dataset(&self, project_id: &str, dataset_id: &str) -> Result<Option<BigQueryDatasetInfo>> {
        let api = &self.bigquery;
        let url = api.url(&["projects", project_id, "datasets", dataset_id], &[])?;
        let dataset: Option<WireDataset> = api.get_optional(url).await?;
        Ok(dataset.map(|d| BigQueryDatasetInfo {
            project_id: d.dataset_reference.project_id,
            dataset_id: d.dataset_reference.dataset_id,
            location: d.location,
            access: d
                .access
                .into_iter()
                .filter_map(|a| match (a.role, a.group_by_email) {
                    (Some(role), Some(group_by_email)) => Some(DatasetAccessEntry { role, group_by_email }),
                    _ => None,
                })
                .collect(),
        }))
    }

    async fn create_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        location: Option<&str>,
        access: &[DatasetAccessEntry],
    ) -> Result<()> {
        let api = &self.bigquery;
        let url = api.url(&["projects", project_id, "datasets"], &[])?;
        let mut body = json!({
            "datasetReference": WireDatasetReference {
                project_id: project_id.to_string(),
                dataset_id: dataset_id.to_string(),
            },
            "access": access,
        });
        if let Some(location) = location {
            body["location"] = json!(location);
        }
        api.send(api.request(Method::POST, url).json(&body)).await?;
        info!("Created dataset {}.{}", project_id, dataset_id);
        Ok(())
    }

    async fn delete_dataset(&self, project_id: &str, dataset_id: &str) -> Result<()> {
        let api = &self.bigquery;
        let url = api.url(
            &["projects", project_id, "datasets", dataset_id],
            &[("deleteContents", "true")],
        )?;
        api.send(api.request(Method::DELETE, url)).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDisk {
    name: String,
    location: String,
    properties: WireDiskProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDiskProperties {
    #[serde(rename = "diskSizeGB")]
    disk_size_gb: u32,
}

/// Azure Resource Manager.
#[derive(Clone)]
pub struct AzureRestClient {
    management: JsonApi,
}

impl AzureRestClient {
    pub fn new(token: BearerToken) -> Result<Self> {
        Self::with_endpoint(token, "https://management.azure.com/")
    }

    pub fn with_endpoint(token: BearerToken, management: &str) -> Result<Self> {
        Ok(Self {
            management: JsonApi::new("azure resource manager", management, token)?,
        })
    }

    fn disk_url(&self, context: &AzureCloudContext, disk_name: &str) -> Result<Url> {
        self.management.url(
            &[
                "subscriptions",
                context.subscription_id.as_str(),
                "resourceGroups",
                context.resource_group_id.as_str(),
                "providers",
                "Microsoft.Compute",
                "disks",
                disk_name,
            ],
            &[("api-version", AZURE_DISK_API)],
        )
    }
}

#[async_trait]
impl AzureClient for AzureRestClient {
    async fn resource_group_exists(&self, context: &AzureCloudContext) -> Result<bool> {
        let api = &self.management;
        let url = api.url(
            &[
                "subscriptions",
                context.subscription_id.as_str(),
                "resourcegroups",
                context.resource_group_id.as_str(),
            ],
            &[("api-version", AZURE_RESOURCE_GROUP_API)],
        )?;
        let group: Option<serde_json::Value> = api.get_optional(url).await?;
        Ok(group.is_some())
    }

    async fn get_disk(&self, context: &AzureCloudContext, disk_name: &str) -> Result<Option<AzureDiskInfo>> {
        let disk: Option<WireDisk> = self.management.get_optional(self.disk_url(context, disk_name)?).await?;
        Ok(disk.map(|d| AzureDiskInfo {
            name: d.name,
            size_gb: d.properties.disk_size_gb,
            region: d.location,
        }))
    }

    async fn create_disk(&self, context: &AzureCloudContext, disk_name: &str, size_gb: u32, region: &str) -> Result<()> {
        let body = json!({
            "location": region,
            "properties": {
                "creationData": { "createOption": "Empty" },
                "diskSizeGB": size_gb,
            },
        });
        let api = &self.management;
        api.send(api.request(Method::PUT, self.disk_url(context, disk_name)?).json(&body))
            .await?;
        info!("Created Azure disk {} in {}", disk_name, context.resource_group_id);
        Ok(())
    }

    async fn delete_disk(&self, context: &AzureCloudContext, disk_name: &str) -> Result<()> {
        let api = &self.management;
        api.send(api.request(Method::DELETE, self.disk_url(context, disk_name)?))
            .await?;
        Ok(())
    }
}

/// Stand-in used when no AWS credentials are configured. Every call fails fatally.
#[derive(Debug, Clone, Default)]
pub struct UnavailableAwsClient;

impl UnavailableAwsClient {
    fn unavailable(&self) -> OrchestratorError {
        OrchestratorError::FatalRemote("AWS storage is not configured for this deployment".to_string())
    }
}

#[async_trait]
impl AwsClient for UnavailableAwsClient {
    async fn folder_exists(&self, _context: &AwsCloudContext, _prefix: &str) -> Result<bool> {
        Err(self.unavailable())
    }

    async fn create_folder(&self, _context: &AwsCloudContext, _prefix: &str, _region: &str) -> Result<()> {
        Err(self.unavailable())
    }

    async fn delete_folder(&self, _context: &AwsCloudContext, _prefix: &str) -> Result<()> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_policy_round_trip() {
        let json = r#"{"bindings":[{"role":"roles/viewer","members":["group:b@x","group:a@x"]}],"etag":"BwX"}"#;
        let wire: WirePolicy = serde_json::from_str(json).unwrap();
        let policy = IamPolicy::from(wire);
        assert_eq!(policy.etag.as_deref(), Some("BwX"));
        assert_eq!(policy.members("roles/viewer").len(), 2);

        let back = serde_json::to_value(WirePolicy::from(&policy)).unwrap();
        assert_eq!(back["etag"], "BwX");
        assert_eq!(back["bindings"][0]["members"][0], "group:a@x");
    }

    #[test]
    fn test_disk_url() {
        let client = AzureRestClient::with_endpoint(BearerToken::new("t"), "https://management.example.com/").unwrap();
        let context = AzureCloudContext {
            tenant_id: "tenant".to_string(),
            subscription_id: "sub".to_string(),
            resource_group_id: "rg".to_string(),
        };
        assert_eq!(
            client.disk_url(&context, "disk-1").unwrap().as_str(),
            "https://management.example.com/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/disks/disk-1?api-version=2023-04-02"
        );
    }
}
