//! # Castflow
//!
//! An orchestration engine for multi-stage content-generation pipelines.
//!
//! A run request flows through named stages (research, planning, scripting,
//! synthesis, production) wired into a graph. Castflow provides:
//!
//! - **Graph execution**: static and conditional edges, shallow-merged state
//!   patches and an `error_info` convention for recoverable failures
//! - **Retries and quality gates**: bounded exponential backoff around every
//!   external call, with validators on the output
//! - **Run tracking**: a registry of concurrent runs with polling,
//!   cancellation and durable records
//! - **Caching and scheduling**: a TTL cache for collaborator results and a
//!   scheduler for future-dated runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use castflow::prelude::*;
//!
//! let orchestrator = Orchestrator::from_config(&config, collaborators, events)?;
//! let run_id = orchestrator.submit_run(RunRequest::new("f1").with_trigger("race"))?;
//! let record = orchestrator.wait_for_run(&run_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod collaborator;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod graph;
pub mod observability;
pub mod pipelines;
pub mod retry;
pub mod runs;
pub mod scheduler;
pub mod service;
pub mod stages;
pub mod testing;
pub mod utils;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CachedCollaborator, TtlCache};
    pub use crate::cancellation::CancellationToken;
    pub use crate::collaborator::{Collaborator, FnCollaborator};
    pub use crate::config::CastflowConfig;
    pub use crate::context::{RunContext, RunJournal};
    pub use crate::core::{JsonMap, Patch, PipelineState, RunStatus, StateKey};
    pub use crate::errors::{CastflowError, GraphValidationError, StepFailed};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{CompiledGraph, ErrorRouter, FnRouter, GraphBuilder, Router, END};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipelines::{Collaborators, ContentPipeline, GraphPipeline, Pipeline};
    pub use crate::retry::{QualityThresholds, RetryConfig, StepExecutor, ValidatorRegistry};
    pub use crate::runs::{RunFilter, RunRecord, RunRegistry};
    pub use crate::scheduler::{ScheduleFilter, Scheduler};
    pub use crate::service::{Orchestrator, RunRequest};
    pub use crate::stages::{FnStage, Stage, StepStage};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
