use crate::context::CloudContextServices;
use crate::dao::{ActivityLogDao, CloudContextDao, ResourceDao, WorkspaceDao};
use crate::iam::{IdentityBroker, ServiceIdentity};
use crate::resource::ResourceHandlers;
use std::sync::Arc;

/// Everything a flight factory hands to the steps it builds.
pub(crate) struct FlightDeps {
    pub(crate) workspaces: WorkspaceDao,
    pub(crate) cloud_contexts: CloudContextDao,
    pub(crate) resources: ResourceDao,
    pub(crate) activity: ActivityLogDao,
    pub(crate) broker: Arc<dyn IdentityBroker>,
    pub(crate) service_identity: ServiceIdentity,
    pub(crate) contexts: CloudContextServices,
    pub(crate) handlers: ResourceHandlers,
}
