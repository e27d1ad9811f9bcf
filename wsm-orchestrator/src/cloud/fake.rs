//! In-memory cloud for tests. Failures are injected per operation as HTTP statuses and
//! classified the same way the REST clients classify them.

use super::{
    AwsClient, AzureClient, AzureDiskInfo, BigQueryDatasetInfo, DatasetAccessEntry, GcpClient, GcpProject,
    GcsBucketInfo, IamPolicy,
};
use crate::error::{OrchestratorError, Result};
use crate::model::{AwsCloudContext, AzureCloudContext};
use crate::remote::status_error;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

struct FakeBucket {
    project_number: String,
    location: Option<String>,
    iam: IamPolicy,
}

#[derive(Default)]
struct FakeState {
    projects: BTreeMap<String, (GcpProject, IamPolicy)>,
    buckets: BTreeMap<String, FakeBucket>,
    datasets: BTreeMap<(String, String), BigQueryDatasetInfo>,
    resource_groups: BTreeSet<(String, String)>,
    disks: BTreeMap<(String, String), AzureDiskInfo>,
    folders: BTreeSet<(String, String)>,
    creates: BTreeMap<String, usize>,
    failures: HashMap<String, Vec<u16>>,
    next_project_number: u64,
    etag_counter: u64,
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call to `operation` with `status`.
    pub fn fail_next(&self, operation: &str, status: u16) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push(status);
    }

    /// Number of successful creates of each kind ("project", "bucket", "dataset", "disk", "folder").
    pub fn create_count(&self, kind: &str) -> usize {
        self.lock().creates.get(kind).copied().unwrap_or(0)
    }

    pub fn add_resource_group(&self, subscription_id: &str, resource_group_id: &str) {
        self.lock()
            .resource_groups
            .insert((subscription_id.to_string(), resource_group_id.to_string()));
    }

    /// Create a project outside any flight.
    pub fn add_project(&self, project_id: &str) -> GcpProject {
        let mut state = self.lock();
        Self::insert_project(&mut state, project_id)
    }

    /// Create a bucket outside any flight.
    pub fn add_bucket(&self, project_number: &str, bucket_name: &str) {
        self.lock().buckets.insert(
            bucket_name.to_string(),
            FakeBucket {
                project_number: project_number.to_string(),
                location: None,
                iam: IamPolicy::default(),
            },
        );
    }

    pub fn has_project(&self, project_id: &str) -> bool {
        self.lock().projects.contains_key(project_id)
    }

    pub fn has_bucket(&self, bucket_name: &str) -> bool {
        self.lock().buckets.contains_key(bucket_name)
    }

    pub fn has_dataset(&self, project_id: &str, dataset_id: &str) -> bool {
        self.lock()
            .datasets
            .contains_key(&(project_id.to_string(), dataset_id.to_string()))
    }

    pub fn has_disk(&self, resource_group_id: &str, disk_name: &str) -> bool {
        self.lock()
            .disks
            .contains_key(&(resource_group_id.to_string(), disk_name.to_string()))
    }

    pub fn has_folder(&self, account_id: &str, prefix: &str) -> bool {
        self.lock()
            .folders
            .contains(&(account_id.to_string(), prefix.to_string()))
    }

    pub fn bucket_iam(&self, bucket_name: &str) -> Option<IamPolicy> {
        self.lock().buckets.get(bucket_name).map(|b| b.iam.clone())
    }

    pub fn project_iam(&self, project_id: &str) -> Option<IamPolicy> {
        self.lock().projects.get(project_id).map(|(_, iam)| iam.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(state: &mut FakeState, operation: &str) -> Result<()> {
        let Some(pending) = state.failures.get_mut(operation) else {
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }
        let code = pending.remove(0);
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Err(status_error("fake cloud", status, &format!("injected failure in {}", operation)))
    }

    fn counted(state: &mut FakeState, kind: &str) {
        *state.creates.entry(kind.to_string()).or_default() += 1;
    }

    fn insert_project(state: &mut FakeState, project_id: &str) -> GcpProject {
        state.next_project_number += 1;
        let project = GcpProject {
            project_id: project_id.to_string(),
            project_number: format!("{}", 100_000 + state.next_project_number),
        };
        state
            .projects
            .insert(project_id.to_string(), (project.clone(), IamPolicy::default()));
        project
    }

    fn next_etag(state: &mut FakeState) -> String {
        state.etag_counter += 1;
        format!("etag-{}", state.etag_counter)
    }

    fn not_found(what: String) -> OrchestratorError {
        status_error("fake cloud", StatusCode::NOT_FOUND, &what)
    }

    fn check_etag(current: &IamPolicy, update: &IamPolicy) -> Result<()> {
        if current.etag.is_some() && current.etag != update.etag {
            return Err(status_error("fake cloud", StatusCode::CONFLICT, "etag mismatch"));
        }
        Ok(())
    }
}

#[async_trait]
impl GcpClient for FakeCloud {
    async fn get_project(&self, project_id: &str) -> Result<Option<GcpProject>> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "get_project")?;
        Ok(state.projects.get(project_id).map(|(p, _)| p.clone()))
    }

    async fn create_project(&self, project_id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "create_project")?;
        if state.projects.contains_key(project_id) {
            return Err(status_error("fake cloud", StatusCode::CONFLICT, "project exists"));
        }
        Self::insert_project(&mut state, project_id);
        Self::counted(&mut state, "project");
        Ok(())
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "delete_project")?;
        let Some((project, _)) = state.projects.remove(project_id) else {
            return Err(Self::not_found(format!("project {}", project_id)));
        };
        state.buckets.retain(|_, b| b.project_number != project.project_number);
        state.datasets.retain(|(p, _), _| p != project_id);
        Ok(())
    }

    async fn get_project_iam_policy(&self, project_id: &str) -> Result<IamPolicy> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "get_project_iam_policy")?;
        state
            .projects
            .get(project_id)
            .map(|(_, iam)| iam.clone())
            .ok_or_else(|| Self::not_found(format!("project {}", project_id)))
    }

    async fn set_project_iam_policy(&self, project_id: &str, policy: &IamPolicy) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "set_project_iam_policy")?;
        let etag = Self::next_etag(&mut state);
        let (_, iam) = state
            .projects
            .get_mut(project_id)
            .ok_or_else(|| Self::not_found(format!("project {}", project_id)))?;
        Self::check_etag(iam, policy)?;
        *iam = IamPolicy {
            bindings: policy.bindings.clone(),
            etag: Some(etag),
        };
        Ok(())
    }

    async fn get_bucket(&self, bucket_name: &str) -> Result<Option<GcsBucketInfo>> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "get_bucket")?;
        Ok(state.buckets.get(bucket_name).map(|b| GcsBucketInfo {
            name: bucket_name.to_string(),
            project_number: b.project_number.clone(),
            location: b.location.clone(),
        }))
    }

    async fn create_bucket(&self, project_id: &str, bucket_name: &str, location: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "create_bucket")?;
        if state.buckets.contains_key(bucket_name) {
            return Err(status_error("fake cloud", StatusCode::CONFLICT, "bucket name taken"));
        }
        let project_number = state
            .projects
            .get(project_id)
            .map(|(p, _)| p.project_number.clone())
            .ok_or_else(|| status_error("fake cloud", StatusCode::BAD_REQUEST, "unknown project"))?;
        state.buckets.insert(
            bucket_name.to_string(),
            FakeBucket {
                project_number,
                location: location.map(String::from),
                iam: IamPolicy::default(),
            },
        );
        Self::counted(&mut state, "bucket");
        Ok(())
    }

    async fn delete_bucket(&self, bucket_name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "delete_bucket")?;
        state
            .buckets
            .remove(bucket_name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(format!("bucket {}", bucket_name)))
    }

    async fn get_bucket_iam_policy(&self, bucket_name: &str) -> Result<IamPolicy> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "get_bucket_iam_policy")?;
        state
            .buckets
            .get(bucket_name)
            .map(|b| b.iam.clone())
            .ok_or_else(|| Self::not_found(format!("bucket {}", bucket_name)))
    }

    async fn set_bucket_iam_policy(&self, bucket_name: &str, policy: &IamPolicy) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "set_bucket_iam_policy")?;
        let etag = Self::next_etag(&mut state);
        let bucket = state
            .buckets
            .get_mut(bucket_name)
            .ok_or_else(|| Self::not_found(format!("bucket {}", bucket_name)))?;
        Self::check_etag(&bucket.iam, policy)?;
        bucket.iam = IamPolicy {
            bindings: policy.bindings.clone(),
            etag: Some(etag),
        };
        Ok(())
    }

    async fn get_dataset(&self, project_id: &str, dataset_id: &str) -> Result<Option<BigQueryDatasetInfo>> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "get_dataset")?;
        Ok(state
            .datasets
            .get(&(project_id.to_string(), dataset_id.to_string()))
            .cloned())
    }

    async fn create_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        location: Option<&str>,
        access: &[DatasetAccessEntry],
    ) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "create_dataset")?;
        let key = (project_id.to_string(), dataset_id.to_string());
        if state.datasets.contains_key(&key) {
            return Err(status_error("fake cloud", StatusCode::CONFLICT, "dataset exists"));
        }
        state.datasets.insert(
            key,
            BigQueryDatasetInfo {
                project_id: project_id.to_string(),
                dataset_id: dataset_id.to_string(),
                location: location.map(String::from),
                access: access.to_vec(),
            },
        );
        Self::counted(&mut state, "dataset");
        Ok(())
    }

    async fn delete_dataset(&self, project_id: &str, dataset_id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "delete_dataset")?;
        state
            .datasets
            .remove(&(project_id.to_string(), dataset_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(format!("dataset {}.{}", project_id, dataset_id)))
    }
}

#[async_trait]
impl AzureClient for FakeCloud {
    async fn resource_group_exists(&self, context: &AzureCloudContext) -> Result<bool> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "resource_group_exists")?;
        Ok(state
            .resource_groups
            .contains(&(context.subscription_id.clone(), context.resource_group_id.clone())))
    }

    async fn get_disk(&self, context: &AzureCloudContext, disk_name: &str) -> Result<Option<AzureDiskInfo>> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "get_disk")?;
        Ok(state
            .disks
            .get(&(context.resource_group_id.clone(), disk_name.to_string()))
            .cloned())
    }

    async fn create_disk(&self, context: &AzureCloudContext, disk_name: &str, size_gb: u32, region: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "create_disk")?;
        state.disks.insert(
            (context.resource_group_id.clone(), disk_name.to_string()),
            AzureDiskInfo {
                name: disk_name.to_string(),
                size_gb,
                region: region.to_string(),
            },
        );
        Self::counted(&mut state, "disk");
        Ok(())
    }

    async fn delete_disk(&self, context: &AzureCloudContext, disk_name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "delete_disk")?;
        state
            .disks
            .remove(&(context.resource_group_id.clone(), disk_name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(format!("disk {}", disk_name)))
    }
}

#[async_trait]
impl AwsClient for FakeCloud {
    async fn folder_exists(&self, context: &AwsCloudContext, prefix: &str) -> Result<bool> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "folder_exists")?;
        Ok(state
            .folders
            .contains(&(context.account_id.clone(), prefix.to_string())))
    }

    async fn create_folder(&self, context: &AwsCloudContext, prefix: &str, _region: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "create_folder")?;
        if state
            .folders
            .insert((context.account_id.clone(), prefix.to_string()))
        {
            Self::counted(&mut state, "folder");
        }
        Ok(())
    }

    async fn delete_folder(&self, context: &AwsCloudContext, prefix: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state, "delete_folder")?;
        state
            .folders
            .remove(&(context.account_id.clone(), prefix.to_string()));
        Ok(())
    }
}
