use crate::flight::FlightStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("Cloud context required: {0}")]
    CloudContextRequired(String),

    #[error("Retryable remote error: {0}")]
    RetryableRemote(String),

    #[error("Remote error: {0}")]
    FatalRemote(String),

    #[error("Internal logic error: {0}")]
    InternalLogic(String),

    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("Invalid serialized version: {0}")]
    InvalidSerializedVersion(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// A flight ended without success. `error.kind` is the kind of the failure that stopped it.
    #[error("Flight {flight_id} ended {status:?}: {error}")]
    FlightFailed {
        flight_id: String,
        status: FlightStatus,
        error: FlightError,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistable classification of an [`OrchestratorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    DuplicateResource,
    CloudContextRequired,
    RetryableRemote,
    FatalRemote,
    InternalLogic,
    StaleState,
    InvalidSerializedVersion,
    NotFound,
    InvalidInput,
    Interrupted,
    Database,
    Serialization,
    Io,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateResource(_) => ErrorKind::DuplicateResource,
            Self::CloudContextRequired(_) => ErrorKind::CloudContextRequired,
            Self::RetryableRemote(_) => ErrorKind::RetryableRemote,
            Self::FatalRemote(_) => ErrorKind::FatalRemote,
            Self::InternalLogic(_) => ErrorKind::InternalLogic,
            Self::StaleState(_) => ErrorKind::StaleState,
            Self::InvalidSerializedVersion(_) => ErrorKind::InvalidSerializedVersion,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Interrupted(_) => ErrorKind::Interrupted,
            Self::FlightFailed { error, .. } => error.kind,
            Self::Database(_) | Self::Migration(_) => ErrorKind::Database,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether a step hitting this error should be retried under its retry rule.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetryableRemote(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// Error as recorded on a finished flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OrchestratorError> for FlightError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FlightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OrchestratorError::RetryableRemote("503".into()).is_retryable());
        assert!(OrchestratorError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!OrchestratorError::FatalRemote("403".into()).is_retryable());
        assert!(!OrchestratorError::InternalLogic("bug".into()).is_retryable());
        assert!(!OrchestratorError::Database(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn test_flight_error_keeps_kind_distinct() {
        let err = OrchestratorError::InternalLogic("private resource without role".into());
        let recorded = FlightError::from(&err);
        assert_eq!(recorded.kind, ErrorKind::InternalLogic);
        assert_ne!(recorded.kind, ErrorKind::InvalidInput);
        assert!(recorded.message.contains("private resource without role"));

        let json = serde_json::to_string(&recorded).unwrap();
        assert!(json.contains("INTERNAL_LOGIC"));
    }
}
