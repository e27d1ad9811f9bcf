use super::store::{FlightRecord, FlightStore};
use super::{
    Direction, FlightContext, FlightDebugInfo, FlightFactory, FlightMap, FlightState,
    FlightStatus, PlannedStep, StepFailure,
};
use crate::error::{ErrorKind, FlightError, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs flights on their own tokio tasks and keeps their progress in the `flight` table.
#[derive(Clone)]
pub struct FlightEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: FlightStore,
    factories: HashMap<&'static str, Arc<dyn FlightFactory>>,
    running: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

pub struct FlightEngineBuilder {
    pool: SqlitePool,
    factories: HashMap<&'static str, Arc<dyn FlightFactory>>,
}

impl FlightEngineBuilder {
    pub fn register(mut self, factory: Arc<dyn FlightFactory>) -> Self {
        self.factories.insert(factory.flight_class(), factory);
        self
    }

    pub fn build(self) -> FlightEngine {
        FlightEngine {
            inner: Arc::new(EngineInner {
                store: FlightStore::new(self.pool),
                factories: self.factories,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// How a single pass over a step ended.
enum StepOutcome {
    Success,
    Interrupted,
    Failed(OrchestratorError),
}

impl FlightEngine {
    pub fn builder(pool: SqlitePool) -> FlightEngineBuilder {
        FlightEngineBuilder {
            pool,
            factories: HashMap::new(),
        }
    }

    pub fn registered_classes(&self) -> HashSet<&'static str> {
        self.inner.factories.keys().copied().collect()
    }

    /// Submit a flight under a fresh id.
    pub async fn submit(&self, flight_class: &str, inputs: FlightMap) -> Result<String> {
        let flight_id = Uuid::new_v4().to_string();
        self.submit_with_id(&flight_id, flight_class, inputs, FlightDebugInfo::default())
            .await?;
        Ok(flight_id)
    }

    /// Submit a flight under a caller-chosen id. Resubmitting an id is rejected.
    pub async fn submit_with_id(
        &self,
        flight_id: &str,
        flight_class: &str,
        inputs: FlightMap,
        debug: FlightDebugInfo,
    ) -> Result<()> {
        let factory = self.factory(flight_class)?;
        self.inner
            .store
            .insert(flight_id, factory.flight_class(), &inputs, &debug)
            .await?;

        info!("Submitted flight {} ({})", flight_id, flight_class);

        let record = FlightRecord {
            flight_id: flight_id.to_string(),
            flight_class: factory.flight_class().to_string(),
            inputs,
            working: FlightMap::new(),
            step_index: 0,
            direction: Direction::Do,
            error: None,
            debug,
        };
        self.spawn(factory, record);
        Ok(())
    }

    pub async fn get_flight(&self, flight_id: &str) -> Result<FlightState> {
        self.inner.store.get(flight_id).await
    }

    pub async fn list_flights(&self, status: Option<FlightStatus>) -> Result<Vec<FlightState>> {
        self.inner.store.list(status).await
    }

    /// Poll until the flight reaches a terminal status.
    pub async fn wait_for_flight(&self, flight_id: &str, timeout: Duration) -> Result<FlightState> {
        let wait = async {
            loop {
                let state = self.get_flight(flight_id).await?;
                if state.status.is_terminal() {
                    return Ok(state);
                }
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            OrchestratorError::Interrupted(format!(
                "timed out after {:?} waiting for flight {}",
                timeout, flight_id
            ))
        })?
    }

    /// Ask a running flight to stop at its next interruption check. Returns false when the
    /// flight is not running in this process.
    pub fn interrupt(&self, flight_id: &str) -> bool {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match running.get(flight_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Resume every flight left RUNNING or READY, e.g. after a restart.
    pub async fn recover(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();
        for record in self.inner.store.list_unfinished().await? {
            if self.is_running(&record.flight_id) {
                continue;
            }
            let factory = match self.factory(&record.flight_class) {
                Ok(factory) => factory,
                Err(e) => {
                    error!("Cannot recover flight {}: {}", record.flight_id, e);
                    continue;
                }
            };
            info!(
                "Recovering flight {} ({}) at step {} {:?}",
                record.flight_id, record.flight_class, record.step_index, record.direction
            );
            resumed.push(record.flight_id.clone());
            self.spawn(factory, record);
        }
        Ok(resumed)
    }

    /// Remove terminal flights finished before `cutoff`.
    pub async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.inner.store.delete_completed_before(cutoff).await
    }

    fn factory(&self, flight_class: &str) -> Result<Arc<dyn FlightFactory>> {
        self.inner
            .factories
            .get(flight_class)
            .cloned()
            .ok_or_else(|| OrchestratorError::InvalidInput(format!("unknown flight class {}", flight_class)))
    }

    fn is_running(&self, flight_id: &str) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(flight_id)
    }

    fn spawn(&self, factory: Arc<dyn FlightFactory>, record: FlightRecord) {
        let flag = Arc::new(AtomicBool::new(false));
        self.inner
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.flight_id.clone(), flag.clone());

        let inner = self.inner.clone();
        let span = info_span!(
            "flight",
            flight_id = %record.flight_id,
            flight_class = %record.flight_class
        );
        tokio::spawn(
            async move {
                let flight_id = record.flight_id.clone();
                if let Err(e) = run_flight(&inner, factory, record, flag).await {
                    error!("Flight {} stopped on a persistence error: {}", flight_id, e);
                }
                inner
                    .running
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&flight_id);
            }
            .instrument(span),
        );
    }
}

async fn run_flight(
    inner: &EngineInner,
    factory: Arc<dyn FlightFactory>,
    record: FlightRecord,
    interrupted: Arc<AtomicBool>,
) -> Result<()> {
    let store = &inner.store;
    let flight_id = record.flight_id.clone();

    let plan = match factory.build(&record.inputs) {
        Ok(plan) => plan,
        Err(e) => {
            error!("Failed to assemble flight {}: {}", flight_id, e);
            return store
                .complete(&flight_id, FlightStatus::Error, &record.working, Some(&FlightError::from(&e)))
                .await;
        }
    };

    let mut ctx = FlightContext::resume(
        record.flight_id,
        record.flight_class,
        record.inputs,
        record.working,
        interrupted,
    );
    let mut debug = record.debug;
    let mut step_index = record.step_index;
    let mut direction = record.direction;
    let mut failure = record.error;

    loop {
        ctx.set_direction(direction);
        match direction {
            Direction::Do => {
                let Some(planned) = plan.get(step_index) else {
                    info!("Flight {} succeeded", flight_id);
                    return store
                        .complete(&flight_id, FlightStatus::Success, ctx.working(), None)
                        .await;
                };

                match run_step(planned, &mut ctx, &mut debug, Direction::Do).await {
                    StepOutcome::Success => {
                        step_index += 1;
                        store
                            .save_progress(&flight_id, FlightStatus::Running, step_index, direction, ctx.working(), None)
                            .await?;
                    }
                    StepOutcome::Interrupted => {
                        return park(store, &flight_id, step_index, direction, &ctx, failure.as_ref()).await;
                    }
                    StepOutcome::Failed(e) => {
                        warn!(
                            "Step {} failed, compensating flight {}: {}",
                            planned.step.name(),
                            flight_id,
                            e
                        );
                        let recorded = FlightError::from(&e);
                        direction = Direction::Undo;
                        store
                            .save_progress(&flight_id, FlightStatus::Running, step_index, direction, ctx.working(), Some(&recorded))
                            .await?;
                        failure = Some(recorded);
                    }
                }
            }
            Direction::Undo => {
                if step_index == 0 {
                    info!("Flight {} compensated", flight_id);
                    return store
                        .complete(&flight_id, FlightStatus::Error, ctx.working(), failure.as_ref())
                        .await;
                }

                let index = step_index - 1;
                let Some(planned) = plan.get(index) else {
                    let e = OrchestratorError::InternalLogic(format!(
                        "flight {} has no step {} to compensate",
                        flight_id, index
                    ));
                    return store
                        .complete(&flight_id, FlightStatus::Fatal, ctx.working(), Some(&FlightError::from(&e)))
                        .await;
                };

                match run_step(planned, &mut ctx, &mut debug, Direction::Undo).await {
                    StepOutcome::Success => {
                        step_index = index;
                        store
                            .save_progress(&flight_id, FlightStatus::Running, step_index, direction, ctx.working(), failure.as_ref())
                            .await?;
                    }
                    StepOutcome::Interrupted => {
                        return park(store, &flight_id, step_index, direction, &ctx, failure.as_ref()).await;
                    }
                    StepOutcome::Failed(e) => {
                        error!(
                            "Compensation of step {} failed; flight {} needs manual recovery: {}",
                            planned.step.name(),
                            flight_id,
                            e
                        );
                        let original = failure
                            .map(|f| f.message)
                            .unwrap_or_else(|| "unknown".to_string());
                        let recorded = FlightError {
                            kind: e.kind(),
                            message: format!("{} (while compensating for: {})", e, original),
                        };
                        return store
                            .complete(&flight_id, FlightStatus::Fatal, ctx.working(), Some(&recorded))
                            .await;
                    }
                }
            }
        }
    }
}

async fn park(
    store: &FlightStore,
    flight_id: &str,
    step_index: usize,
    direction: Direction,
    ctx: &FlightContext,
    failure: Option<&FlightError>,
) -> Result<()> {
    info!("Flight {} interrupted at step {}; parked", flight_id, step_index);
    store
        .save_progress(flight_id, FlightStatus::Ready, step_index, direction, ctx.working(), failure)
        .await
}

/// Run one step in one direction, applying its retry rule to retryable failures.
async fn run_step(
    planned: &PlannedStep,
    ctx: &mut FlightContext,
    debug: &mut FlightDebugInfo,
    direction: Direction,
) -> StepOutcome {
    let name = planned.step.name();
    let mut retry = planned.retry.start();

    loop {
        if ctx.check_interrupted().is_err() {
            return StepOutcome::Interrupted;
        }

        let span = info_span!("step", step = name, direction = ?direction);
        let result = match debug.take(direction, name) {
            Some(injected) => Err(injected),
            None => match direction {
                Direction::Do => planned.step.execute(ctx).instrument(span).await,
                Direction::Undo => planned.step.compensate(ctx).instrument(span).await,
            },
        };

        match result {
            Ok(()) => return StepOutcome::Success,
            Err(failure) if failure.error().kind() == ErrorKind::Interrupted => {
                return StepOutcome::Interrupted;
            }
            Err(StepFailure::Fatal(e)) => return StepOutcome::Failed(e),
            Err(StepFailure::Retryable(e)) => match retry.next_delay() {
                Some(delay) => {
                    warn!(
                        "Step {} attempt {} failed, retrying in {:?}: {}",
                        name,
                        retry.attempts(),
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!("Step {} exhausted retries: {}", name, e);
                    return StepOutcome::Failed(e);
                }
            },
        }
    }
}
