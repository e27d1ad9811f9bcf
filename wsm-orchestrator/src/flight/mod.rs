//! Saga execution: steps with compensation, run in order by the [`FlightEngine`].
//!
//! A flight is an ordered list of steps, each paired with a [`RetryRule`]. The engine runs
//! `execute` on each step in turn, persisting the working map after every step. When a step
//! fails fatally (or exhausts its retries) the engine runs `compensate` on every step that
//! had succeeded, newest first.

mod engine;
mod map;
mod retry;
mod store;

pub use engine::{FlightEngine, FlightEngineBuilder};
pub use map::{FlightKey, FlightMap};
pub use retry::{RetryRule, RetryState};

use crate::error::{FlightError, OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a step did not succeed.
#[derive(Debug)]
pub enum StepFailure {
    Retryable(OrchestratorError),
    Fatal(OrchestratorError),
}

impl StepFailure {
    pub fn into_error(self) -> OrchestratorError {
        match self {
            Self::Retryable(e) | Self::Fatal(e) => e,
        }
    }

    pub fn error(&self) -> &OrchestratorError {
        match self {
            Self::Retryable(e) | Self::Fatal(e) => e,
        }
    }
}

impl From<OrchestratorError> for StepFailure {
    fn from(err: OrchestratorError) -> Self {
        if err.is_retryable() {
            Self::Retryable(err)
        } else {
            Self::Fatal(err)
        }
    }
}

impl From<sqlx::Error> for StepFailure {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::from(err).into()
    }
}

impl From<serde_json::Error> for StepFailure {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::from(err).into()
    }
}

pub type StepResult = std::result::Result<(), StepFailure>;

/// One unit of a flight.
///
/// `execute` must tolerate being re-run after a crash, and `compensate` must tolerate
/// running when `execute` never ran or only got partway.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    async fn execute(&self, ctx: &mut FlightContext) -> StepResult;

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Do,
    Undo,
}

/// What a running step sees: the flight's inputs and its mutable working map.
pub struct FlightContext {
    flight_id: String,
    flight_class: String,
    inputs: FlightMap,
    working: FlightMap,
    direction: Direction,
    interrupted: Arc<AtomicBool>,
}

impl FlightContext {
    pub fn new(flight_id: impl Into<String>, flight_class: impl Into<String>, inputs: FlightMap) -> Self {
        Self {
            flight_id: flight_id.into(),
            flight_class: flight_class.into(),
            inputs,
            working: FlightMap::new(),
            direction: Direction::Do,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn resume(
        flight_id: String,
        flight_class: String,
        inputs: FlightMap,
        working: FlightMap,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            flight_id,
            flight_class,
            inputs,
            working,
            direction: Direction::Do,
            interrupted,
        }
    }

    pub fn flight_id(&self) -> &str {
        &self.flight_id
    }

    pub fn flight_class(&self) -> &str {
        &self.flight_class
    }

    pub fn inputs(&self) -> &FlightMap {
        &self.inputs
    }

    pub fn working(&self) -> &FlightMap {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut FlightMap {
        &mut self.working
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Look up a key in the working map first, then in the inputs.
    pub fn lookup<T: serde::de::DeserializeOwned>(&self, key: &FlightKey<T>) -> Result<Option<T>> {
        match self.working.get(key)? {
            Some(v) => Ok(Some(v)),
            None => self.inputs.get(key),
        }
    }

    /// Steps call this between remote calls so an interrupt stops the flight promptly.
    pub fn check_interrupted(&self) -> Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Interrupted(format!(
                "flight {} interrupted",
                self.flight_id
            )));
        }
        Ok(())
    }

    /// Handle that flags this context as interrupted.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }
}

pub(crate) struct PlannedStep {
    pub(crate) step: Arc<dyn Step>,
    pub(crate) retry: RetryRule,
}

/// Ordered steps of one flight, assembled by a [`FlightFactory`].
#[derive(Default)]
pub struct FlightPlan {
    steps: Vec<PlannedStep>,
}

impl FlightPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: impl Step + 'static, retry: RetryRule) {
        self.steps.push(PlannedStep {
            step: Arc::new(step),
            retry,
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.step.name()).collect()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&PlannedStep> {
        self.steps.get(index)
    }
}

/// Builds the step list of a flight class from its inputs.
///
/// Must be deterministic: recovery rebuilds the plan of an interrupted flight from the stored
/// inputs and resumes at the stored step index.
pub trait FlightFactory: Send + Sync {
    fn flight_class(&self) -> &'static str;

    fn build(&self, inputs: &FlightMap) -> Result<FlightPlan>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightStatus {
    Running,
    /// Parked after an interrupt; resumed by recovery.
    Ready,
    Success,
    /// Failed and fully compensated.
    Error,
    /// Failed and compensation itself failed; needs an operator.
    Fatal,
}

impl FlightStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Fatal)
    }
}

/// Snapshot of a flight returned by queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightState {
    pub flight_id: String,
    pub flight_class: String,
    pub status: FlightStatus,
    pub inputs: FlightMap,
    pub working: FlightMap,
    pub error: Option<FlightError>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlightState {
    pub fn result<T: serde::de::DeserializeOwned>(&self, key: &FlightKey<T>) -> Result<Option<T>> {
        self.working.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectedFailure {
    Retry,
    Fatal,
}

/// Failure injection for tests, keyed by step name. Each entry fires once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightDebugInfo {
    pub do_failures: HashMap<String, InjectedFailure>,
    pub undo_failures: HashMap<String, InjectedFailure>,
}

impl FlightDebugInfo {
    pub fn fail_do(mut self, step: &str, failure: InjectedFailure) -> Self {
        self.do_failures.insert(step.to_string(), failure);
        self
    }

    pub fn fail_undo(mut self, step: &str, failure: InjectedFailure) -> Self {
        self.undo_failures.insert(step.to_string(), failure);
        self
    }

    pub(crate) fn take(&mut self, direction: Direction, step: &str) -> Option<StepFailure> {
        let failures = match direction {
            Direction::Do => &mut self.do_failures,
            Direction::Undo => &mut self.undo_failures,
        };
        failures.remove(step).map(|kind| {
            let err = format!("injected {:?} failure in {}", kind, step);
            match kind {
                InjectedFailure::Retry => StepFailure::Retryable(OrchestratorError::RetryableRemote(err)),
                InjectedFailure::Fatal => StepFailure::Fatal(OrchestratorError::FatalRemote(err)),
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.do_failures.is_empty() && self.undo_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedStep;

    #[async_trait]
    impl Step for NamedStep {
        async fn execute(&self, _ctx: &mut FlightContext) -> StepResult {
            Ok(())
        }

        async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
            Ok(())
        }
    }

    #[test]
    fn test_step_name_is_short_type_name() {
        assert_eq!(NamedStep.name(), "NamedStep");
        let boxed: Arc<dyn Step> = Arc::new(NamedStep);
        assert_eq!(boxed.name(), "NamedStep");
    }

    #[test]
    fn test_failure_classification_follows_error() {
        let retry: StepFailure = OrchestratorError::RetryableRemote("503".into()).into();
        assert!(matches!(retry, StepFailure::Retryable(_)));

        let fatal: StepFailure = OrchestratorError::DuplicateResource("bucket".into()).into();
        assert!(matches!(fatal, StepFailure::Fatal(_)));
    }

    #[test]
    fn test_debug_info_fires_once() {
        let mut debug = FlightDebugInfo::default().fail_do("NamedStep", InjectedFailure::Fatal);
        assert!(debug.take(Direction::Do, "NamedStep").is_some());
        assert!(debug.take(Direction::Do, "NamedStep").is_none());
        assert!(debug.is_empty());
    }

    #[test]
    fn test_interrupt_flag() {
        let ctx = FlightContext::new("f1", "TestFlight", FlightMap::new());
        assert!(ctx.check_interrupted().is_ok());
        ctx.interrupt_handle().store(true, Ordering::SeqCst);
        assert!(matches!(
            ctx.check_interrupted(),
            Err(OrchestratorError::Interrupted(_))
        ));
    }
}
