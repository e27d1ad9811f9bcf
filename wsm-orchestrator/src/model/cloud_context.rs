use super::{read_version, CloudPlatform};
use crate::error::{OrchestratorError, Result};
use crate::state::WsmResourceState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const GCP_V1: u64 = 1;
const GCP_V2: u64 = 2;
const AZURE_VERSION: u64 = 100;
const AWS_VERSION: u64 = 1;

/// Broker groups synced for each workspace role, kept on the GCP context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpPolicyGroups {
    pub owner: String,
    pub writer: String,
    pub reader: String,
    pub application: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpCloudContext {
    pub project_id: String,
    pub default_zone: Option<String>,
    /// `None` for contexts written before groups were recorded.
    pub policy_groups: Option<GcpPolicyGroups>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureCloudContext {
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCloudContext {
    pub organization_id: String,
    pub account_id: String,
    pub tenant_alias: String,
    pub environment_alias: String,
}

/// A workspace's binding to one cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "UPPERCASE")]
pub enum CloudContext {
    Gcp(GcpCloudContext),
    Azure(AzureCloudContext),
    Aws(AwsCloudContext),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpContextV1 {
    version: u64,
    gcp_project_id: String,
    #[serde(default)]
    gcp_default_zone: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpContextV2 {
    version: u64,
    gcp_project_id: String,
    #[serde(default)]
    gcp_default_zone: Option<String>,
    sam_policy_owner: String,
    sam_policy_writer: String,
    sam_policy_reader: String,
    sam_policy_application: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureContextV100 {
    version: u64,
    azure_tenant_id: String,
    azure_subscription_id: String,
    azure_resource_group_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwsContextV1 {
    version: u64,
    organization_id: String,
    account_id: String,
    tenant_alias: String,
    environment_alias: String,
}

fn version_mismatch(platform: CloudPlatform, version: u64) -> OrchestratorError {
    OrchestratorError::InvalidSerializedVersion(format!(
        "{} cloud context version {}",
        platform, version
    ))
}

impl CloudContext {
    pub fn platform(&self) -> CloudPlatform {
        match self {
            Self::Gcp(_) => CloudPlatform::Gcp,
            Self::Azure(_) => CloudPlatform::Azure,
            Self::Aws(_) => CloudPlatform::Aws,
        }
    }

    pub fn as_gcp(&self) -> Option<&GcpCloudContext> {
        match self {
            Self::Gcp(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn as_azure(&self) -> Option<&AzureCloudContext> {
        match self {
            Self::Azure(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn as_aws(&self) -> Option<&AwsCloudContext> {
        match self {
            Self::Aws(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Serialized form stored in `cloud_context.context`.
    pub fn serialize(&self) -> Result<String> {
        let json = match self {
            Self::Gcp(ctx) => match &ctx.policy_groups {
                Some(groups) => serde_json::to_string(&GcpContextV2 {
                    version: GCP_V2,
                    gcp_project_id: ctx.project_id.clone(),
                    gcp_default_zone: ctx.default_zone.clone(),
                    sam_policy_owner: groups.owner.clone(),
                    sam_policy_writer: groups.writer.clone(),
                    sam_policy_reader: groups.reader.clone(),
                    sam_policy_application: groups.application.clone(),
                })?,
                None => serde_json::to_string(&GcpContextV1 {
                    version: GCP_V1,
                    gcp_project_id: ctx.project_id.clone(),
                    gcp_default_zone: ctx.default_zone.clone(),
                })?,
            },
            Self::Azure(ctx) => serde_json::to_string(&AzureContextV100 {
                version: AZURE_VERSION,
                azure_tenant_id: ctx.tenant_id.clone(),
                azure_subscription_id: ctx.subscription_id.clone(),
                azure_resource_group_id: ctx.resource_group_id.clone(),
            })?,
            Self::Aws(ctx) => serde_json::to_string(&AwsContextV1 {
                version: AWS_VERSION,
                organization_id: ctx.organization_id.clone(),
                account_id: ctx.account_id.clone(),
                tenant_alias: ctx.tenant_alias.clone(),
                environment_alias: ctx.environment_alias.clone(),
            })?,
        };
        Ok(json)
    }

    pub fn deserialize(platform: CloudPlatform, json: &str) -> Result<Self> {
        let (version, value) = read_version(json)?;
        match (platform, version) {
            (CloudPlatform::Gcp, GCP_V1) => {
                let v1: GcpContextV1 = serde_json::from_value(value)?;
                Ok(Self::Gcp(GcpCloudContext {
                    project_id: v1.gcp_project_id,
                    default_zone: v1.gcp_default_zone,
                    policy_groups: None,
                }))
            }
            (CloudPlatform::Gcp, GCP_V2) => {
                let v2: GcpContextV2 = serde_json::from_value(value)?;
                Ok(Self::Gcp(GcpCloudContext {
                    project_id: v2.gcp_project_id,
                    default_zone: v2.gcp_default_zone,
                    policy_groups: Some(GcpPolicyGroups {
                        owner: v2.sam_policy_owner,
                        writer: v2.sam_policy_writer,
                        reader: v2.sam_policy_reader,
                        application: v2.sam_policy_application,
                    }),
                }))
            }
            (CloudPlatform::Azure, AZURE_VERSION) => {
                let v: AzureContextV100 = serde_json::from_value(value)?;
                Ok(Self::Azure(AzureCloudContext {
                    tenant_id: v.azure_tenant_id,
                    subscription_id: v.azure_subscription_id,
                    resource_group_id: v.azure_resource_group_id,
                }))
            }
            (CloudPlatform::Aws, AWS_VERSION) => {
                let v: AwsContextV1 = serde_json::from_value(value)?;
                Ok(Self::Aws(AwsCloudContext {
                    organization_id: v.organization_id,
                    account_id: v.account_id,
                    tenant_alias: v.tenant_alias,
                    environment_alias: v.environment_alias,
                }))
            }
            (CloudPlatform::Any, _) => Err(OrchestratorError::InternalLogic(
                "the ANY platform has no cloud context".to_string(),
            )),
            (platform, version) => Err(version_mismatch(platform, version)),
        }
    }
}

/// Row fields shared by every platform's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudContextCommonFields {
    pub spend_profile: Option<String>,
    pub state: WsmResourceState,
    pub flight_id: Option<String>,
    pub error: Option<String>,
}

/// A `cloud_context` row. `context` is empty until the create flight finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudContextRecord {
    pub workspace_id: Uuid,
    pub platform: CloudPlatform,
    pub common: CloudContextCommonFields,
    pub context: Option<CloudContext>,
}
