use serde::{Deserialize, Serialize};

/// Lifecycle of a metadata row backing a resource or cloud context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsmResourceState {
    /// No row. Never stored; used as a transition endpoint.
    NotExists,
    Creating,
    Ready,
    Updating,
    Deleting,
    Broken,
}

impl WsmResourceState {
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        use WsmResourceState::*;
        matches!(
            (from, to),
            (NotExists, Creating)
                | (Creating, Ready)
                | (Creating, Broken)
                | (Creating, NotExists)
                | (Ready, Updating)
                | (Ready, Deleting)
                | (Updating, Ready)
                | (Updating, Broken)
                | (Deleting, NotExists)
                | (Deleting, Ready)
                | (Deleting, Broken)
                | (Broken, Deleting)
        )
    }
}

/// What happens to a row whose create flight fails for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateRule {
    DeleteOnFailure,
    BrokenOnFailure,
}

impl std::str::FromStr for StateRule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DELETE_ON_FAILURE" => Ok(Self::DeleteOnFailure),
            "BROKEN_ON_FAILURE" => Ok(Self::BrokenOnFailure),
            other => Err(format!("unknown state rule {}", other)),
        }
    }
}

/// Sub-state of a PRIVATE controlled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrivateResourceState {
    /// Assigned user's grants not yet confirmed.
    Initializing,
    Active,
    /// Assigned user left the workspace.
    Abandoned,
    /// Shared resources.
    NotApplicable,
}
