//! The operational surface: submit, inspect, cancel and schedule runs.
//!
//! [`Orchestrator`] is transport-agnostic; an HTTP or CLI front end maps its
//! requests onto these calls one-to-one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::TtlCache;
use crate::cancellation::CancellationToken;
use crate::config::CastflowConfig;
use crate::core::JsonMap;
use crate::errors::CastflowError;
use crate::events::EventSink;
use crate::pipelines::{Collaborators, ContentPipeline};
use crate::retry::StepExecutor;
use crate::runs::{JsonFileRunStore, RunFilter, RunRecord, RunRegistry};
use crate::scheduler::{ScheduleEntry, ScheduleFilter, Scheduler};
use crate::utils::{parse_timestamp, Timestamp};

fn default_trigger() -> String {
    "manual".to_string()
}

/// A request to generate one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Sport, e.g. `f1` or `motogp`.
    pub sport: String,
    /// What caused the run; `manual` unless an event fired it.
    #[serde(default = "default_trigger")]
    pub trigger: String,
    /// Specific event to cover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Per-step overrides keyed by step name, plus `episode_type`.
    #[serde(default)]
    pub custom_parameters: JsonMap,
}

impl RunRequest {
    /// Creates a manual request for `sport`.
    #[must_use]
    pub fn new(sport: impl Into<String>) -> Self {
        Self {
            sport: sport.into(),
            trigger: default_trigger(),
            event_id: None,
            custom_parameters: JsonMap::new(),
        }
    }

    /// Sets the trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = trigger.into();
        self
    }

    /// Sets the event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Sets one custom parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_parameters.insert(key.into(), value);
        self
    }

    /// Converts into the run parameters stored on the record.
    #[must_use]
    pub fn into_params(self) -> JsonMap {
        let mut params = JsonMap::new();
        params.insert("sport".to_string(), Value::String(self.sport));
        params.insert("trigger".to_string(), Value::String(self.trigger));
        if let Some(event_id) = self.event_id {
            params.insert("event_id".to_string(), Value::String(event_id));
        }
        params.insert("custom_parameters".to_string(), Value::Object(self.custom_parameters));
        params
    }
}

/// Front door to the run registry and the scheduler.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<RunRegistry>,
    scheduler: Arc<Scheduler>,
    cache: Option<Arc<TtlCache>>,
    tick_interval: std::time::Duration,
}

impl Orchestrator {
    /// Wires an orchestrator from existing parts.
    #[must_use]
    pub fn new(registry: Arc<RunRegistry>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            registry,
            scheduler,
            cache: None,
            tick_interval: CastflowConfig::default().tick_interval(),
        }
    }

    /// Builds the content pipeline and its persistence from `config`.
    ///
    /// Research is cached in `data_dir`, runs are stored under
    /// `data_dir/runs` and pending schedules in `data_dir/schedules.json`.
    pub fn from_config(
        config: &CastflowConfig,
        collaborators: Collaborators,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, CastflowError> {
        let cache = Arc::new(TtlCache::open(config.cache_index_path(), config.cache.default_ttl_seconds));
        let validators = config.quality.validators();
        let collaborators = collaborators.with_research_cache(&cache, &validators, &events);
        let executor = Arc::new(StepExecutor::new(config.retry.clone(), validators));
        let pipeline = ContentPipeline::with_options(
            collaborators,
            executor,
            config.triggers.clone(),
            config.executor.max_transitions,
        )?;

        let registry = Arc::new(
            RunRegistry::new(Arc::new(pipeline), Arc::new(JsonFileRunStore::new(config.runs_dir())))
                .with_events(events.clone()),
        );
        let scheduler = match config.schedule_path() {
            Some(path) => Scheduler::open(path, registry.clone()),
            None => Scheduler::new(registry.clone()),
        };

        info!(data_dir = %config.data_dir.display(), "Orchestrator ready");
        Ok(Self {
            registry,
            scheduler: Arc::new(scheduler.with_events(events)),
            cache: Some(cache),
            tick_interval: config.tick_interval(),
        })
    }

    /// Starts a run now.
    pub fn submit_run(&self, request: RunRequest) -> Result<String, CastflowError> {
        self.registry.create_run(request.into_params())
    }

    /// Returns a run record.
    pub fn get_status(&self, run_id: &str) -> Result<RunRecord, CastflowError> {
        self.registry.get_status(run_id)
    }

    /// Lists runs, most recent first.
    #[must_use]
    pub fn list_runs(&self, limit: usize, filter: &RunFilter) -> Vec<RunRecord> {
        self.registry.list_runs(limit, filter)
    }

    /// Cancels a running run.
    pub fn cancel_run(&self, run_id: &str, reason: &str) -> Result<RunRecord, CastflowError> {
        self.registry.cancel(run_id, reason)
    }

    /// Waits for a run to finish.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunRecord, CastflowError> {
        self.registry.wait(run_id).await
    }

    /// Queues a run for `due_at`.
    pub fn schedule_run(&self, request: RunRequest, due_at: Timestamp) -> String {
        self.scheduler.schedule(request.into_params(), due_at)
    }

    /// Queues a run for a caller-supplied due time.
    ///
    /// Accepts RFC 3339, naive ISO 8601 (read as UTC) or Unix seconds.
    pub fn schedule_run_at(&self, request: RunRequest, due_at: &str) -> Result<String, CastflowError> {
        let due_at = parse_timestamp(due_at).map_err(|e| CastflowError::InvalidRequest(e.to_string()))?;
        Ok(self.schedule_run(request, due_at))
    }

    /// Lists pending scheduled runs, soonest first.
    #[must_use]
    pub fn list_scheduled(&self, filter: &ScheduleFilter) -> Vec<ScheduleEntry> {
        self.scheduler.list_scheduled(filter)
    }

    /// Cancels a pending scheduled run.
    pub fn cancel_scheduled(&self, schedule_id: &str) -> Result<ScheduleEntry, CastflowError> {
        self.scheduler.cancel_scheduled(schedule_id)
    }

    /// Spawns the scheduler loop until `shutdown` is cancelled.
    pub fn start_scheduler(&self, shutdown: Arc<CancellationToken>) -> JoinHandle<()> {
        self.scheduler.clone().spawn(self.tick_interval, shutdown)
    }

    /// Returns the run registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Returns the research cache, when built from config.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<TtlCache>> {
        self.cache.as_ref()
    }
}
