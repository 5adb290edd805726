//! Pipelines: what a run executes.

mod content;
mod graph_pipeline;

pub use content::{
    fields, steps, Collaborators, ContentPipeline, TriggerEvent, TriggerTable, DEFAULT_EPISODE_TYPE,
};
pub use graph_pipeline::{GraphPipeline, INITIAL_REQUEST};

use async_trait::async_trait;
use std::fmt::Debug;

use crate::context::RunContext;
use crate::core::JsonMap;
use crate::errors::CastflowError;

/// A runnable pipeline type.
///
/// Built once and shared by every run of that type.
#[async_trait]
pub trait Pipeline: Send + Sync + Debug {
    /// Returns the pipeline name recorded on each run.
    fn name(&self) -> &str;

    /// Executes one run with the submitted parameters.
    async fn execute(&self, input: &JsonMap, ctx: &RunContext) -> Result<JsonMap, CastflowError>;
}
