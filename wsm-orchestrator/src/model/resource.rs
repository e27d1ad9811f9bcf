use super::{read_version, CloudPlatform};
use crate::error::{OrchestratorError, Result};
use crate::state::{PrivateResourceState, WsmResourceState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ATTRIBUTES_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum StewardshipType {
    Controlled,
    Referenced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessScope {
    Shared,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ManagedBy {
    User,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloningInstructions {
    CopyNothing,
    CopyDefinition,
    CopyResource,
    CopyReference,
    LinkReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    ControlledGcpGcsBucket,
    ControlledGcpBigQueryDataset,
    ControlledAzureDisk,
    ControlledAwsStorageFolder,
    ControlledFlexibleResource,
    ReferencedGcpGcsBucket,
    ReferencedGcpBigQueryDataset,
    ReferencedAnyGitRepo,
}

impl ResourceType {
    pub fn platform(&self) -> CloudPlatform {
        match self {
            Self::ControlledGcpGcsBucket
            | Self::ControlledGcpBigQueryDataset
            | Self::ReferencedGcpGcsBucket
            | Self::ReferencedGcpBigQueryDataset => CloudPlatform::Gcp,
            Self::ControlledAzureDisk => CloudPlatform::Azure,
            Self::ControlledAwsStorageFolder => CloudPlatform::Aws,
            Self::ControlledFlexibleResource | Self::ReferencedAnyGitRepo => CloudPlatform::Any,
        }
    }

    pub fn stewardship(&self) -> StewardshipType {
        match self {
            Self::ReferencedGcpGcsBucket
            | Self::ReferencedGcpBigQueryDataset
            | Self::ReferencedAnyGitRepo => StewardshipType::Referenced,
            _ => StewardshipType::Controlled,
        }
    }
}

/// The {access scope x managed-by} classification that drives policy synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlledResourceCategory {
    UserShared,
    UserPrivate,
    ApplicationShared,
    ApplicationPrivate,
}

impl ControlledResourceCategory {
    pub fn get(access_scope: AccessScope, managed_by: ManagedBy) -> Self {
        match (access_scope, managed_by) {
            (AccessScope::Shared, ManagedBy::User) => Self::UserShared,
            (AccessScope::Private, ManagedBy::User) => Self::UserPrivate,
            (AccessScope::Shared, ManagedBy::Application) => Self::ApplicationShared,
            (AccessScope::Private, ManagedBy::Application) => Self::ApplicationPrivate,
        }
    }
}

/// Type-specific attributes, stored as a versioned JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceAttributes {
    GcsBucket {
        bucket_name: String,
        location: Option<String>,
    },
    BigQueryDataset {
        project_id: String,
        dataset_id: String,
        location: Option<String>,
    },
    AzureDisk {
        disk_name: String,
        size_gb: u32,
        region: String,
    },
    AwsStorageFolder {
        prefix: String,
        region: String,
    },
    Flexible {
        type_namespace: String,
        type_name: String,
        data: Option<String>,
    },
    ReferencedGcsBucket {
        bucket_name: String,
    },
    ReferencedBigQueryDataset {
        project_id: String,
        dataset_id: String,
    },
    ReferencedGitRepo {
        git_repo_url: String,
    },
}

impl ResourceAttributes {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::GcsBucket { .. } => ResourceType::ControlledGcpGcsBucket,
            Self::BigQueryDataset { .. } => ResourceType::ControlledGcpBigQueryDataset,
            Self::AzureDisk { .. } => ResourceType::ControlledAzureDisk,
            Self::AwsStorageFolder { .. } => ResourceType::ControlledAwsStorageFolder,
            Self::Flexible { .. } => ResourceType::ControlledFlexibleResource,
            Self::ReferencedGcsBucket { .. } => ResourceType::ReferencedGcpGcsBucket,
            Self::ReferencedBigQueryDataset { .. } => ResourceType::ReferencedGcpBigQueryDataset,
            Self::ReferencedGitRepo { .. } => ResourceType::ReferencedAnyGitRepo,
        }
    }

    pub fn to_versioned_json(&self) -> Result<String> {
        Ok(serde_json::json!({
            "version": ATTRIBUTES_VERSION,
            "attributes": self,
        })
        .to_string())
    }

    pub fn from_versioned_json(json: &str) -> Result<Self> {
        let (version, mut value) = read_version(json)?;
        if version != ATTRIBUTES_VERSION {
            return Err(OrchestratorError::InvalidSerializedVersion(format!(
                "resource attributes version {} (expected {})",
                version, ATTRIBUTES_VERSION
            )));
        }
        let attributes = value
            .get_mut("attributes")
            .map(serde_json::Value::take)
            .ok_or_else(|| {
                OrchestratorError::InvalidSerializedVersion("resource attributes missing body".to_string())
            })?;
        Ok(serde_json::from_value(attributes)?)
    }
}

/// Fields present only on controlled resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlledFields {
    pub access_scope: AccessScope,
    pub managed_by: ManagedBy,
    pub assigned_user: Option<String>,
    pub private_resource_state: PrivateResourceState,
    pub application_id: Option<String>,
    pub region: Option<String>,
}

impl ControlledFields {
    pub fn category(&self) -> ControlledResourceCategory {
        ControlledResourceCategory::get(self.access_scope, self.managed_by)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsmResource {
    pub workspace_id: Uuid,
    pub resource_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub cloning_instructions: CloningInstructions,
    pub folder_id: Option<Uuid>,
    pub attributes: ResourceAttributes,
    pub controlled: Option<ControlledFields>,
    pub state: WsmResourceState,
    pub flight_id: Option<String>,
    pub error: Option<String>,
    pub created_by_flight: Option<String>,
    pub created_by_email: Option<String>,
    pub created_date: DateTime<Utc>,
}

impl WsmResource {
    pub fn resource_type(&self) -> ResourceType {
        self.attributes.resource_type()
    }

    pub fn platform(&self) -> CloudPlatform {
        self.resource_type().platform()
    }

    pub fn stewardship(&self) -> StewardshipType {
        self.resource_type().stewardship()
    }

    pub fn controlled(&self) -> Result<&ControlledFields> {
        self.controlled.as_ref().ok_or_else(|| {
            OrchestratorError::InternalLogic(format!("resource {} is not controlled", self.resource_id))
        })
    }

    pub fn category(&self) -> Result<ControlledResourceCategory> {
        Ok(self.controlled()?.category())
    }

    pub fn is_private(&self) -> bool {
        self.controlled
            .as_ref()
            .is_some_and(|c| c.access_scope == AccessScope::Private)
    }

    /// Structural invariants checked before a resource enters a flight.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput("resource name must not be empty".to_string()));
        }

        match (self.stewardship(), &self.controlled) {
            (StewardshipType::Referenced, None) => Ok(()),
            (StewardshipType::Referenced, Some(_)) => Err(OrchestratorError::InvalidInput(
                "referenced resources carry no controlled fields".to_string(),
            )),
            (StewardshipType::Controlled, None) => Err(OrchestratorError::InvalidInput(
                "controlled resources require controlled fields".to_string(),
            )),
            (StewardshipType::Controlled, Some(controlled)) => {
                match (controlled.access_scope, &controlled.assigned_user) {
                    (AccessScope::Private, None) if controlled.managed_by == ManagedBy::User => {
                        return Err(OrchestratorError::InvalidInput(
                            "private user resources require an assigned user".to_string(),
                        ));
                    }
                    (AccessScope::Shared, Some(_)) => {
                        return Err(OrchestratorError::InvalidInput(
                            "shared resources must not have an assigned user".to_string(),
                        ));
                    }
                    _ => {}
                }
                if controlled.managed_by == ManagedBy::Application && controlled.application_id.is_none() {
                    return Err(OrchestratorError::InvalidInput(
                        "application managed resources require an application".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(access_scope: AccessScope, assigned_user: Option<&str>) -> WsmResource {
        WsmResource {
            workspace_id: Uuid::new_v4(),
            resource_id: Uuid::new_v4(),
            name: "bucket".to_string(),
            description: None,
            cloning_instructions: CloningInstructions::CopyDefinition,
            folder_id: None,
            attributes: ResourceAttributes::GcsBucket {
                bucket_name: "my-bucket".to_string(),
                location: None,
            },
            controlled: Some(ControlledFields {
                access_scope,
                managed_by: ManagedBy::User,
                assigned_user: assigned_user.map(String::from),
                private_resource_state: PrivateResourceState::NotApplicable,
                application_id: None,
                region: None,
            }),
            state: WsmResourceState::Creating,
            flight_id: None,
            error: None,
            created_by_flight: None,
            created_by_email: None,
            created_date: Utc::now(),
        }
    }

    #[test]
    fn test_category_matrix() {
        use ControlledResourceCategory::*;
        assert_eq!(ControlledResourceCategory::get(AccessScope::Shared, ManagedBy::User), UserShared);
        assert_eq!(ControlledResourceCategory::get(AccessScope::Private, ManagedBy::User), UserPrivate);
        assert_eq!(
            ControlledResourceCategory::get(AccessScope::Shared, ManagedBy::Application),
            ApplicationShared
        );
        assert_eq!(
            ControlledResourceCategory::get(AccessScope::Private, ManagedBy::Application),
            ApplicationPrivate
        );
    }

    #[test]
    fn test_validate_access_scope_invariants() {
        assert!(bucket(AccessScope::Shared, None).validate().is_ok());
        assert!(bucket(AccessScope::Private, Some("alice@example.com")).validate().is_ok());
        assert!(matches!(
            bucket(AccessScope::Private, None).validate(),
            Err(OrchestratorError::InvalidInput(_))
        ));
        assert!(matches!(
            bucket(AccessScope::Shared, Some("alice@example.com")).validate(),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_application_resource_requires_application() {
        let mut resource = bucket(AccessScope::Shared, None);
        if let Some(c) = resource.controlled.as_mut() {
            c.managed_by = ManagedBy::Application;
        }
        assert!(resource.validate().is_err());
        if let Some(c) = resource.controlled.as_mut() {
            c.application_id = Some("leo".to_string());
        }
        assert!(resource.validate().is_ok());
    }

    #[test]
    fn test_attributes_versioned_json() {
        let attributes = ResourceAttributes::BigQueryDataset {
            project_id: "p-1".to_string(),
            dataset_id: "ds".to_string(),
            location: Some("US".to_string()),
        };
        let json = attributes.to_versioned_json().unwrap();
        assert!(json.contains("\"version\":1"));
        assert_eq!(ResourceAttributes::from_versioned_json(&json).unwrap(), attributes);
    }

    #[test]
    fn test_attributes_reject_other_versions() {
        let json = r#"{"version":7,"attributes":{"kind":"REFERENCED_GIT_REPO","git_repo_url":"x"}}"#;
        assert!(matches!(
            ResourceAttributes::from_versioned_json(json),
            Err(OrchestratorError::InvalidSerializedVersion(_))
        ));
        assert!(matches!(
            ResourceAttributes::from_versioned_json(r#"{"attributes":{}}"#),
            Err(OrchestratorError::InvalidSerializedVersion(_))
        ));
    }
}
