//! Event sinks for run, stage, step, schedule and cache lifecycle events.
//!
//! Sinks are injected where they are used; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// Event type names emitted by the engine.
pub mod names {
    /// A run task started.
    pub const RUN_STARTED: &str = "run.started";
    /// A run completed successfully.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A run failed.
    pub const RUN_FAILED: &str = "run.failed";
    /// A run was cancelled.
    pub const RUN_CANCELLED: &str = "run.cancelled";
    /// The executor is about to invoke a stage.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage returned a patch.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A step attempt failed or was rejected by a quality gate.
    pub const STEP_ATTEMPT_FAILED: &str = "step.attempt_failed";
    /// A step produced valid output.
    pub const STEP_SUCCEEDED: &str = "step.succeeded";
    /// A step ran out of attempts.
    pub const STEP_EXHAUSTED: &str = "step.exhausted";
    /// A run was scheduled.
    pub const SCHEDULE_CREATED: &str = "schedule.created";
    /// A scheduled run became due and was submitted.
    pub const SCHEDULE_FIRED: &str = "schedule.fired";
    /// A scheduled run was cancelled.
    pub const SCHEDULE_CANCELLED: &str = "schedule.cancelled";
    /// A cached collaborator result was reused.
    pub const CACHE_HIT: &str = "cache.hit";
    /// A cached collaborator had to call through.
    pub const CACHE_MISS: &str = "cache.miss";
}
