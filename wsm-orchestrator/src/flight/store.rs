use super::{Direction, FlightDebugInfo, FlightMap, FlightState, FlightStatus};
use crate::error::{FlightError, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Persisted position of a flight.
pub(crate) struct FlightRecord {
    pub flight_id: String,
    pub flight_class: String,
    pub inputs: FlightMap,
    pub working: FlightMap,
    pub step_index: usize,
    pub direction: Direction,
    pub error: Option<FlightError>,
    pub debug: FlightDebugInfo,
}

#[derive(Clone)]
pub(crate) struct FlightStore {
    pool: SqlitePool,
}

impl FlightStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        flight_id: &str,
        flight_class: &str,
        inputs: &FlightMap,
        debug: &FlightDebugInfo,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO flight (flight_id, flight_class, status, inputs, working, step_index, direction, debug_info, submitted_at, updated_at)
            VALUES (?, ?, ?, ?, '{}', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(flight_id)
        .bind(flight_class)
        .bind(FlightStatus::Running)
        .bind(inputs.to_json()?)
        .bind(Direction::Do)
        .bind(serde_json::to_string(debug)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                OrchestratorError::DuplicateResource(format!("flight {} already submitted", flight_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Record progress after a step completes in either direction.
    pub async fn save_progress(
        &self,
        flight_id: &str,
        status: FlightStatus,
        step_index: usize,
        direction: Direction,
        working: &FlightMap,
        error: Option<&FlightError>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE flight
             SET status = ?, step_index = ?, direction = ?, working = ?, error = ?, updated_at = ?
             WHERE flight_id = ?",
        )
        .bind(status)
        .bind(step_index as i64)
        .bind(direction)
        .bind(working.to_json()?)
        .bind(error.map(serde_json::to_string).transpose()?)
        .bind(Utc::now().timestamp())
        .bind(flight_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn complete(
        &self,
        flight_id: &str,
        status: FlightStatus,
        working: &FlightMap,
        error: Option<&FlightError>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "UPDATE flight
             SET status = ?, working = ?, error = ?, updated_at = ?, completed_at = ?
             WHERE flight_id = ?",
        )
        .bind(status)
        .bind(working.to_json()?)
        .bind(error.map(serde_json::to_string).transpose()?)
        .bind(now)
        .bind(now)
        .bind(flight_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, flight_id: &str) -> Result<FlightState> {
        let row = sqlx::query_as::<_, FlightRow>("SELECT * FROM flight WHERE flight_id = ?")
            .bind(flight_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("flight {}", flight_id)))?;

        row.try_into()
    }

    /// Flights a restarted process must pick up again.
    pub async fn list_unfinished(&self) -> Result<Vec<FlightRecord>> {
        let rows = sqlx::query_as::<_, FlightRow>(
            "SELECT * FROM flight WHERE status IN (?, ?) ORDER BY submitted_at",
        )
        .bind(FlightStatus::Running)
        .bind(FlightStatus::Ready)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FlightRecord::try_from).collect()
    }

    pub async fn list(&self, status: Option<FlightStatus>) -> Result<Vec<FlightState>> {
        let mut query = "SELECT * FROM flight WHERE 1=1".to_string();
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY submitted_at DESC");

        let mut q = sqlx::query_as::<_, FlightRow>(&query);
        if let Some(status) = status {
            q = q.bind(status);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(FlightState::try_from).collect()
    }

    pub async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM flight WHERE completed_at IS NOT NULL AND completed_at < ? AND status IN (?, ?, ?)",
        )
        .bind(cutoff.timestamp())
        .bind(FlightStatus::Success)
        .bind(FlightStatus::Error)
        .bind(FlightStatus::Fatal)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    flight_id: String,
    flight_class: String,
    status: FlightStatus,
    inputs: String,
    working: String,
    step_index: i64,
    direction: Direction,
    error: Option<String>,
    debug_info: Option<String>,
    submitted_at: i64,
    #[allow(dead_code)]
    updated_at: i64,
    completed_at: Option<i64>,
}

fn parse_error(raw: Option<String>) -> Result<Option<FlightError>> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(Into::into)
}

impl TryFrom<FlightRow> for FlightState {
    type Error = OrchestratorError;

    fn try_from(row: FlightRow) -> Result<Self> {
        Ok(Self {
            submitted_at: DateTime::from_timestamp(row.submitted_at, 0).unwrap_or_default(),
            completed_at: row
                .completed_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            inputs: FlightMap::from_json(&row.inputs)?,
            working: FlightMap::from_json(&row.working)?,
            error: parse_error(row.error)?,
            flight_id: row.flight_id,
            flight_class: row.flight_class,
            status: row.status,
        })
    }
}

impl TryFrom<FlightRow> for FlightRecord {
    type Error = OrchestratorError;

    fn try_from(row: FlightRow) -> Result<Self> {
        let debug = match row.debug_info {
            Some(raw) => serde_json::from_str(&raw)?,
            None => FlightDebugInfo::default(),
        };
        Ok(Self {
            inputs: FlightMap::from_json(&row.inputs)?,
            working: FlightMap::from_json(&row.working)?,
            error: parse_error(row.error)?,
            step_index: usize::try_from(row.step_index).map_err(|_| {
                OrchestratorError::InternalLogic(format!("negative step index on {}", row.flight_id))
            })?,
            flight_id: row.flight_id,
            flight_class: row.flight_class,
            direction: row.direction,
            debug,
        })
    }
}
