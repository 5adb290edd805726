//! The pending set and its tick loop.

use parking_lot::Mutex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use super::{ScheduleEntry, ScheduleFilter};
use crate::cancellation::CancellationToken;
use crate::core::{JsonMap, ScheduleStatus};
use crate::errors::CastflowError;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::runs::RunRegistry;
use crate::utils::{read_json, readable_id, write_json_atomic, Clock, SystemClock, Timestamp};

/// Shortest interval the tick loop accepts.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Starts runs on behalf of the scheduler.
#[cfg_attr(test, mockall::automock)]
pub trait RunSubmitter: Send + Sync {
    /// Starts a run and returns its id.
    fn submit(&self, params: JsonMap) -> Result<String, CastflowError>;
}

impl RunSubmitter for RunRegistry {
    fn submit(&self, params: JsonMap) -> Result<String, CastflowError> {
        self.create_run(params)
    }
}

/// A schedule entry that fired during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredSchedule {
    /// The entry that fired.
    pub schedule_id: String,
    /// The run it started.
    pub run_id: String,
}

/// Holds future-dated run requests until they are due.
///
/// Mutations rewrite the optional schedule file atomically; write failures
/// are logged and the in-memory list stays authoritative.
pub struct Scheduler {
    pending: Mutex<Vec<ScheduleEntry>>,
    submitter: Arc<dyn RunSubmitter>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending.lock().len())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler that keeps its entries in memory only.
    #[must_use]
    pub fn new(submitter: Arc<dyn RunSubmitter>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            submitter,
            path: None,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Creates a scheduler persisted at `path`, reloading pending entries.
    ///
    /// An unreadable file is logged and the scheduler starts empty.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, submitter: Arc<dyn RunSubmitter>) -> Self {
        let path = path.into();
        let entries = match read_json::<Vec<ScheduleEntry>>(&path) {
            Ok(Some(entries)) => entries
                .into_iter()
                .filter(|e| e.status == ScheduleStatus::Scheduled)
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable schedule file");
                Vec::new()
            }
        };
        debug!(path = %path.display(), pending = entries.len(), "Opened scheduler");
        Self {
            pending: Mutex::new(entries),
            path: Some(path),
            ..Self::new(submitter)
        }
    }

    /// Replaces the clock used for due-time checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the schedule file path, if persisted.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Queues `run_params` to start at `due_at` and returns the schedule id.
    pub fn schedule(&self, run_params: JsonMap, due_at: Timestamp) -> String {
        let now = self.clock.now();
        let label = run_params
            .get("sport")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("run")
            .to_string();
        let schedule_id = readable_id("schedule", &label, &now);

        {
            let mut pending = self.pending.lock();
            pending.push(ScheduleEntry::new(&schedule_id, run_params, due_at, now));
            self.persist(&pending);
        }

        self.events.try_emit(
            names::SCHEDULE_CREATED,
            Some(json!({"schedule_id": schedule_id, "due_at": due_at})),
        );
        info!(schedule_id = %schedule_id, due_at = %due_at, "Run scheduled");
        schedule_id
    }

    /// Lists pending entries matching `filter`, soonest first.
    #[must_use]
    pub fn list_scheduled(&self, filter: &ScheduleFilter) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> = self
            .pending
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.schedule_id.cmp(&b.schedule_id)));
        entries
    }

    /// Cancels a pending entry and returns it marked cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CastflowError::ScheduleNotFound`] if the entry is not
    /// pending, including when it already fired.
    pub fn cancel_scheduled(&self, schedule_id: &str) -> Result<ScheduleEntry, CastflowError> {
        let mut entry = {
            let mut pending = self.pending.lock();
            let index = pending
                .iter()
                .position(|e| e.schedule_id == schedule_id)
                .ok_or_else(|| CastflowError::ScheduleNotFound(schedule_id.to_string()))?;
            let entry = pending.remove(index);
            self.persist(&pending);
            entry
        };
        entry.status = ScheduleStatus::Cancelled;

        self.events
            .try_emit(names::SCHEDULE_CANCELLED, Some(json!({"schedule_id": schedule_id})));
        info!(schedule_id, "Scheduled run cancelled");
        Ok(entry)
    }

    /// Returns the number of pending entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Submits every due entry.
    ///
    /// Due entries are removed from the pending set under the lock before
    /// any of them is submitted. A submission failure is logged and the
    /// entry is not re-queued.
    pub fn tick(&self) -> Vec<FiredSchedule> {
        let now = self.clock.now();
        let due: Vec<ScheduleEntry> = {
            let mut pending = self.pending.lock();
            let (due, waiting): (Vec<_>, Vec<_>) = pending.drain(..).partition(|e| e.is_due(now));
            *pending = waiting;
            if !due.is_empty() {
                self.persist(&pending);
            }
            due
        };

        let mut fired = Vec::with_capacity(due.len());
        for mut entry in due {
            entry.status = ScheduleStatus::Executing;
            match self.submitter.submit(entry.run_params) {
                Ok(run_id) => {
                    self.events.try_emit(
                        names::SCHEDULE_FIRED,
                        Some(json!({"schedule_id": entry.schedule_id, "run_id": run_id})),
                    );
                    info!(schedule_id = %entry.schedule_id, run_id = %run_id, "Scheduled run started");
                    fired.push(FiredSchedule {
                        schedule_id: entry.schedule_id,
                        run_id,
                    });
                }
                Err(e) => {
                    error!(schedule_id = %entry.schedule_id, error = %e, "Failed to start scheduled run");
                }
            }
        }
        fired
    }

    /// Runs [`Scheduler::tick`] every `interval` until `shutdown` is cancelled.
    ///
    /// Intervals below [`MIN_TICK_INTERVAL`] are raised to it.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: Arc<CancellationToken>) -> JoinHandle<()> {
        let interval = interval.max(MIN_TICK_INTERVAL);
        let span = tracing::info_span!("scheduler", interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let fired = self.tick();
                            if !fired.is_empty() {
                                debug!(fired = fired.len(), "Scheduler tick");
                            }
                        }
                    }
                }
                info!("Scheduler stopped");
            }
            .instrument(span),
        )
    }

    fn persist(&self, pending: &[ScheduleEntry]) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_json_atomic(path, pending) {
            warn!(path = %path.display(), error = %e, "Failed to write schedule file");
        }
    }
}
