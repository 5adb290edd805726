//! The run registry: creates, tracks and cancels pipeline runs.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use super::{RunFilter, RunRecord, RunStore, StepAttempt, StepOutcome};
use crate::cancellation::CancellationToken;
use crate::context::{RunContext, RunJournal};
use crate::core::{JsonMap, RunStatus};
use crate::errors::CastflowError;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::pipelines::Pipeline;
use crate::utils::{readable_id, Clock, SystemClock, Timestamp};

/// Live bookkeeping for one run.
///
/// Doubles as the run's journal so stage and step progress lands directly in
/// the record.
#[derive(Debug)]
struct RunSlot {
    record: Mutex<RunRecord>,
    cancel: Arc<CancellationToken>,
    done: watch::Sender<bool>,
}

impl RunSlot {
    fn new(record: RunRecord) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            record: Mutex::new(record),
            cancel: Arc::new(CancellationToken::new()),
            done,
        }
    }

    fn snapshot(&self) -> RunRecord {
        self.record.lock().clone()
    }

    /// Applies the pipeline result. A cancelled record keeps its status.
    ///
    /// Returns the final record and whether this call set the status.
    fn finish(&self, result: Result<JsonMap, CastflowError>, now: Timestamp) -> (RunRecord, bool) {
        let mut record = self.record.lock();
        if record.status == RunStatus::Cancelled {
            return (record.clone(), false);
        }

        match result {
            Ok(output) => {
                record.status = RunStatus::Completed;
                record.result = Some(output);
            }
            Err(CastflowError::Cancelled(reason)) => {
                record.status = RunStatus::Cancelled;
                record.error = Some(reason);
            }
            Err(e) => {
                record.status = RunStatus::Failed;
                record.error = Some(e.to_string());
            }
        }
        record.completed_at = Some(now);
        (record.clone(), true)
    }
}

impl RunJournal for RunSlot {
    fn stage_entered(&self, stage: &str) {
        self.record.lock().stage_path.push(stage.to_string());
    }

    fn step_attempt(&self, attempt: StepAttempt) {
        self.record.lock().per_stage_log.push(attempt);
    }

    fn step_finished(&self, step_name: &str, outcome: StepOutcome) {
        self.record
            .lock()
            .pipeline_data
            .insert(step_name.to_string(), outcome);
    }
}

/// Creates and tracks logical pipeline executions.
///
/// Each run executes on its own tokio task. Records are written through a
/// [`RunStore`] at creation, cancellation and completion. A run stays in
/// memory until its terminal record is stored; after that lookups go to the
/// store. A run whose terminal record could not be stored is kept in memory.
pub struct RunRegistry {
    runs: Arc<DashMap<String, Arc<RunSlot>>>,
    pipeline: Arc<dyn Pipeline>,
    store: Arc<dyn RunStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("pipeline", &self.pipeline.name())
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl RunRegistry {
    /// Creates a registry executing `pipeline`.
    #[must_use]
    pub fn new(pipeline: Arc<dyn Pipeline>, store: Arc<dyn RunStore>) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            pipeline,
            store,
            events: Arc::new(NoOpEventSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the clock used for record timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts a run and returns its id immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CastflowError::Internal`] when called outside a tokio runtime.
    pub fn create_run(&self, input: JsonMap) -> Result<String, CastflowError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CastflowError::Internal(format!("No tokio runtime for run task: {e}")))?;

        let now = self.clock.now();
        let label = input
            .get("sport")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("run")
            .to_string();
        let run_id = readable_id("", &label, &now);

        let record = RunRecord::new(&run_id, self.pipeline.name(), input.clone(), now);
        save_logged(self.store.as_ref(), &record);
        let slot = Arc::new(RunSlot::new(record));
        self.runs.insert(run_id.clone(), slot.clone());

        self.events
            .try_emit(names::RUN_STARTED, Some(json!({"run_id": run_id, "pipeline": self.pipeline.name()})));
        info!(run_id = %run_id, pipeline = self.pipeline.name(), "Run created");

        let pipeline = self.pipeline.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        let clock = self.clock.clone();
        let runs = self.runs.clone();
        let span = tracing::info_span!("run", run_id = %run_id);
        let ctx = RunContext::new(&run_id, slot.cancel.clone(), slot.clone(), events.clone());

        runtime.spawn(
            async move {
                let result = pipeline.execute(&input, &ctx).await;
                let (record, changed) = slot.finish(result, clock.now());
                if save_logged(store.as_ref(), &record) {
                    runs.remove(&record.run_id);
                }

                if changed {
                    let (event, data) = match record.status {
                        RunStatus::Completed => (names::RUN_COMPLETED, json!({"run_id": record.run_id})),
                        RunStatus::Cancelled => (
                            names::RUN_CANCELLED,
                            json!({"run_id": record.run_id, "reason": record.error}),
                        ),
                        _ => (names::RUN_FAILED, json!({"run_id": record.run_id, "error": record.error})),
                    };
                    events.try_emit(event, Some(data));
                }
                match record.status {
                    RunStatus::Completed => info!("Run completed"),
                    RunStatus::Cancelled => info!("Run cancelled"),
                    _ => warn!(error = record.error.as_deref().unwrap_or(""), "Run failed"),
                }
                slot.done.send_replace(true);
            }
            .instrument(span),
        );

        Ok(run_id)
    }

    /// Returns the record of a run, live or persisted.
    ///
    /// # Errors
    ///
    /// Returns [`CastflowError::RunNotFound`] if no such run exists.
    pub fn get_status(&self, run_id: &str) -> Result<RunRecord, CastflowError> {
        if let Some(slot) = self.runs.get(run_id) {
            return Ok(slot.snapshot());
        }
        match self.store.load(run_id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(CastflowError::RunNotFound(run_id.to_string())),
            Err(e) => {
                warn!(run_id, error = %e, "Failed to load run record");
                Err(CastflowError::RunNotFound(run_id.to_string()))
            }
        }
    }

    /// Lists up to `limit` runs matching `filter`, most recent first.
    ///
    /// Live runs are merged with records persisted by earlier processes.
    #[must_use]
    pub fn list_runs(&self, limit: usize, filter: &RunFilter) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self.runs.iter().map(|slot| slot.snapshot()).collect();
        let live: HashSet<String> = records.iter().map(|r| r.run_id.clone()).collect();

        match self.store.list() {
            Ok(stored) => records.extend(stored.into_iter().filter(|r| !live.contains(&r.run_id))),
            Err(e) => warn!(error = %e, "Failed to list persisted runs"),
        }

        records.retain(|r| filter.matches(r));
        records.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        records.truncate(limit);
        records
    }

    /// Cancels a running run.
    ///
    /// The status changes immediately; the run's task stops at its next
    /// cancellation point and never overwrites the cancelled record.
    ///
    /// # Errors
    ///
    /// Returns [`CastflowError::RunNotFound`] for unknown ids and
    /// [`CastflowError::InvalidRunState`] if the run already finished.
    pub fn cancel(&self, run_id: &str, reason: &str) -> Result<RunRecord, CastflowError> {
        let Some(slot) = self.runs.get(run_id).map(|s| s.clone()) else {
            let record = self.get_status(run_id)?;
            return Err(CastflowError::InvalidRunState {
                run_id: run_id.to_string(),
                status: record.status.to_string(),
            });
        };

        let record = {
            let mut record = slot.record.lock();
            if record.status != RunStatus::Running {
                return Err(CastflowError::InvalidRunState {
                    run_id: run_id.to_string(),
                    status: record.status.to_string(),
                });
            }
            record.status = RunStatus::Cancelled;
            record.completed_at = Some(self.clock.now());
            record.error = Some(reason.to_string());
            record.clone()
        };

        slot.cancel.cancel(reason);
        save_logged(self.store.as_ref(), &record);
        self.events
            .try_emit(names::RUN_CANCELLED, Some(json!({"run_id": run_id, "reason": reason})));
        info!(run_id, reason, "Run cancelled");
        Ok(record)
    }

    /// Waits until the run's task has finished and returns its record.
    ///
    /// # Errors
    ///
    /// Returns [`CastflowError::RunNotFound`] if no such run exists.
    pub async fn wait(&self, run_id: &str) -> Result<RunRecord, CastflowError> {
        let Some(slot) = self.runs.get(run_id).map(|s| s.clone()) else {
            return self.get_status(run_id);
        };

        let mut done = slot.done.subscribe();
        if done.wait_for(|finished| *finished).await.is_err() {
            error!(run_id, "Run task dropped its completion channel");
        }
        Ok(slot.snapshot())
    }

    /// Waits for every run started by this registry.
    pub async fn wait_all(&self) -> Vec<RunRecord> {
        let ids: Vec<String> = self.runs.iter().map(|slot| slot.key().clone()).collect();
        join_all(ids.iter().map(|id| self.wait(id)))
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// Returns the number of runs still executing.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.runs.iter().filter(|slot| !*slot.done.borrow()).count()
    }

    /// Returns the pipeline this registry executes.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }
}

/// Saves `record`, logging a failure. Returns true if it was stored.
fn save_logged(store: &dyn RunStore, record: &RunRecord) -> bool {
    match store.save(record) {
        Ok(()) => true,
        Err(e) => {
            error!(run_id = %record.run_id, error = %e, "Failed to persist run record");
            false
        }
    }
}
