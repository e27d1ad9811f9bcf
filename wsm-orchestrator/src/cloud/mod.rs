//! Cloud provider clients.
//!
//! Clients only translate calls and classify HTTP failures. Steps decide which outcomes are
//! idempotent successes: `NotFound` on delete, `DuplicateResource` on create where the object
//! is known to be ours.

#[cfg(any(test, feature = "test-utils"))]
mod fake;
mod iam;
mod rest;

#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeCloud;
pub use iam::{
    bucket_role, dataset_role, group_member, project_role, to_dataset_access, Binding, DatasetAccessEntry,
    IamPolicy,
};
pub use rest::{AzureRestClient, GcpRestClient, UnavailableAwsClient};

use crate::error::{OrchestratorError, Result};
use crate::model::{AwsCloudContext, AzureCloudContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpProject {
    pub project_id: String,
    pub project_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsBucketInfo {
    pub name: String,
    pub project_number: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigQueryDatasetInfo {
    pub project_id: String,
    pub dataset_id: String,
    pub location: Option<String>,
    pub access: Vec<DatasetAccessEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureDiskInfo {
    pub name: String,
    pub size_gb: u32,
    pub region: String,
}

#[async_trait]
pub trait GcpClient: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<GcpProject>>;
    async fn create_project(&self, project_id: &str) -> Result<()>;
    async fn delete_project(&self, project_id: &str) -> Result<()>;
    async fn get_project_iam_policy(&self, project_id: &str) -> Result<IamPolicy>;
    /// Fails with `DuplicateResource` when the policy etag is stale.
    async fn set_project_iam_policy(&self, project_id: &str, policy: &IamPolicy) -> Result<()>;

    async fn get_bucket(&self, bucket_name: &str) -> Result<Option<GcsBucketInfo>>;
    async fn create_bucket(&self, project_id: &str, bucket_name: &str, location: Option<&str>) -> Result<()>;
    async fn delete_bucket(&self, bucket_name: &str) -> Result<()>;
    async fn get_bucket_iam_policy(&self, bucket_name: &str) -> Result<IamPolicy>;
    async fn set_bucket_iam_policy(&self, bucket_name: &str, policy: &IamPolicy) -> Result<()>;

    async fn get_dataset(&self, project_id: &str, dataset_id: &str) -> Result<Option<BigQueryDatasetInfo>>;
    async fn create_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        location: Option<&str>,
        access: &[DatasetAccessEntry],
    ) -> Result<()>;
    async fn delete_dataset(&self, project_id: &str, dataset_id: &str) -> Result<()>;
}

#[async_trait]
pub trait AzureClient: Send + Sync {
    async fn resource_group_exists(&self, context: &AzureCloudContext) -> Result<bool>;
    async fn get_disk(&self, context: &AzureCloudContext, disk_name: &str) -> Result<Option<AzureDiskInfo>>;
    async fn create_disk(&self, context: &AzureCloudContext, disk_name: &str, size_gb: u32, region: &str) -> Result<()>;
    async fn delete_disk(&self, context: &AzureCloudContext, disk_name: &str) -> Result<()>;
}

#[async_trait]
pub trait AwsClient: Send + Sync {
    async fn folder_exists(&self, context: &AwsCloudContext, prefix: &str) -> Result<bool>;
    async fn create_folder(&self, context: &AwsCloudContext, prefix: &str, region: &str) -> Result<()>;
    async fn delete_folder(&self, context: &AwsCloudContext, prefix: &str) -> Result<()>;
}

/// One client per platform.
#[derive(Clone)]
pub struct CloudClients {
    pub gcp: Arc<dyn GcpClient>,
    pub azure: Arc<dyn AzureClient>,
    pub aws: Arc<dyn AwsClient>,
}

/// Treat not-found as success, for deletes.
pub(crate) fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(OrchestratorError::NotFound(_)) => Ok(()),
        other => other,
    }
}
