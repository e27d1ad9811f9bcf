//! State transitions shared by `resource` and `cloud_context` rows.
//!
//! Every transition names the flight it expects to own the row and the flight that will own it
//! afterwards. A row already in the target state under the target flight is a retry and
//! succeeds without writing.

use crate::error::{OrchestratorError, Result};
use crate::model::CloudPlatform;
use crate::state::WsmResourceState;
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub(crate) enum StateTarget {
    Resource { workspace_id: Uuid, resource_id: Uuid },
    CloudContext { workspace_id: Uuid, platform: CloudPlatform },
}

impl std::fmt::Display for StateTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource {
                workspace_id,
                resource_id,
            } => write!(f, "resource {} in workspace {}", resource_id, workspace_id),
            Self::CloudContext {
                workspace_id,
                platform,
            } => write!(f, "{} cloud context of workspace {}", platform, workspace_id),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct StateRow {
    pub state: WsmResourceState,
    pub flight_id: Option<String>,
}

pub(crate) async fn fetch_state(
    conn: &mut SqliteConnection,
    target: StateTarget,
) -> Result<Option<StateRow>> {
    let row = match target {
        StateTarget::Resource {
            workspace_id,
            resource_id,
        } => {
            sqlx::query_as::<_, StateRow>(
                "SELECT state, flight_id FROM resource WHERE workspace_id = ? AND resource_id = ?",
            )
            .bind(workspace_id.to_string())
            .bind(resource_id.to_string())
            .fetch_optional(&mut *conn)
            .await?
        }
        StateTarget::CloudContext {
            workspace_id,
            platform,
        } => {
            sqlx::query_as::<_, StateRow>(
                "SELECT state, flight_id FROM cloud_context WHERE workspace_id = ? AND cloud_platform = ?",
            )
            .bind(workspace_id.to_string())
            .bind(platform)
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(row)
}

/// True when the row matches `state` under `flight_id`. A missing row matches only
/// NOT_EXISTS with no flight.
pub(crate) fn is_in_state(
    row: Option<&StateRow>,
    state: WsmResourceState,
    flight_id: Option<&str>,
) -> bool {
    match row {
        None => state == WsmResourceState::NotExists && flight_id.is_none(),
        Some(row) => row.state == state && row.flight_id.as_deref() == flight_id,
    }
}

pub(crate) async fn update_state(
    conn: &mut SqliteConnection,
    target: StateTarget,
    expected_flight_id: Option<&str>,
    target_flight_id: Option<&str>,
    target_state: WsmResourceState,
    error: Option<&str>,
) -> Result<()> {
    let row = fetch_state(conn, target).await?;

    if is_in_state(row.as_ref(), target_state, target_flight_id) {
        return Ok(());
    }

    let Some(row) = row else {
        return Err(OrchestratorError::InternalLogic(format!(
            "Unexpected database state: {} not found",
            target
        )));
    };

    if !WsmResourceState::is_valid_transition(row.state, target_state)
        || row.flight_id.as_deref() != expected_flight_id
    {
        info!(
            "State conflict on {}: current {:?} flight {:?}, target {:?} flight {:?}",
            target, row.state, row.flight_id, target_state, target_flight_id
        );
        return Err(OrchestratorError::StaleState(format!(
            "{} is in state {:?} owned by flight {:?}; expected flight {:?}; cannot move to {:?}",
            target, row.state, row.flight_id, expected_flight_id, target_state
        )));
    }

    let result = match target {
        StateTarget::Resource {
            workspace_id,
            resource_id,
        } => {
            sqlx::query(
                "UPDATE resource SET state = ?, flight_id = ?, error = ?
                 WHERE workspace_id = ? AND resource_id = ? AND flight_id IS ?",
            )
            .bind(target_state)
            .bind(target_flight_id)
            .bind(error)
            .bind(workspace_id.to_string())
            .bind(resource_id.to_string())
            .bind(expected_flight_id)
            .execute(&mut *conn)
            .await?
        }
        StateTarget::CloudContext {
            workspace_id,
            platform,
        } => {
            sqlx::query(
                "UPDATE cloud_context SET state = ?, flight_id = ?, error = ?
                 WHERE workspace_id = ? AND cloud_platform = ? AND flight_id IS ?",
            )
            .bind(target_state)
            .bind(target_flight_id)
            .bind(error)
            .bind(workspace_id.to_string())
            .bind(platform)
            .bind(expected_flight_id)
            .execute(&mut *conn)
            .await?
        }
    };

    if result.rows_affected() != 1 {
        return Err(OrchestratorError::InternalLogic(format!(
            "Unexpected database state: no row updated for {}",
            target
        )));
    }

    info!(
        "State change on {}: {:?} -> {:?}, flight {:?}",
        target, row.state, target_state, target_flight_id
    );
    Ok(())
}
