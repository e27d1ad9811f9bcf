//! Well-known keys of flight inputs and working maps.

use crate::flight::FlightKey;
use crate::iam::{BearerToken, ControlledResourceIamRole};
use crate::model::{
    AzureCloudContext, CloudContext, CloudPlatform, GcpPolicyGroups, Workspace, WsmApplication, WsmResource,
};
use crate::state::StateRule;
use uuid::Uuid;

// Inputs
pub const WORKSPACE_ID: FlightKey<Uuid> = FlightKey::new("workspaceId");
pub const WORKSPACE: FlightKey<Workspace> = FlightKey::new("workspace");
pub const USER_TOKEN: FlightKey<BearerToken> = FlightKey::new("userToken");
pub const PLATFORM: FlightKey<CloudPlatform> = FlightKey::new("cloudPlatform");
pub const SPEND_PROFILE: FlightKey<String> = FlightKey::new("spendProfile");
pub const STATE_RULE: FlightKey<StateRule> = FlightKey::new("stateRule");
pub const AZURE_CONTEXT_REQUEST: FlightKey<AzureCloudContext> = FlightKey::new("azureContextRequest");
pub const RESOURCE: FlightKey<WsmResource> = FlightKey::new("resource");
pub const PRIVATE_ROLE: FlightKey<ControlledResourceIamRole> = FlightKey::new("privateRole");
pub const APPLICATION: FlightKey<WsmApplication> = FlightKey::new("application");

/// Email of the acting user. An input on resource flights, resolved by the create workspace flight.
pub const USER_EMAIL: FlightKey<String> = FlightKey::new("userEmail");

// Working state
pub const CLOUD_CONTEXT: FlightKey<CloudContext> = FlightKey::new("cloudContext");
pub const GCP_PROJECT_ID: FlightKey<String> = FlightKey::new("gcpProjectId");
pub const GCP_POLICY_GROUPS: FlightKey<GcpPolicyGroups> = FlightKey::new("gcpPolicyGroups");

// Results
pub const RESPONSE_WORKSPACE: FlightKey<Workspace> = FlightKey::new("responseWorkspace");
pub const RESPONSE_CLOUD_CONTEXT: FlightKey<CloudContext> = FlightKey::new("responseCloudContext");
pub const RESPONSE_RESOURCE: FlightKey<WsmResource> = FlightKey::new("responseResource");
