use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: Uuid,
    pub user_facing_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub spend_profile: Option<String>,
    pub created_by_email: Option<String>,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub workspace_id: Uuid,
    pub folder_id: Uuid,
    pub display_name: String,
    pub description: Option<String>,
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ApplicationState {
    Operating,
    Deprecated,
    Decommissioned,
}

/// An application that acts on resources through its own service account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsmApplication {
    pub application_id: String,
    pub display_name: String,
    pub service_account: String,
    pub state: ApplicationState,
}
