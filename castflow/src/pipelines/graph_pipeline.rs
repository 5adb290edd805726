//! A pipeline that runs a compiled graph.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use super::Pipeline;
use crate::context::RunContext;
use crate::core::{JsonMap, PipelineState};
use crate::errors::CastflowError;
use crate::graph::CompiledGraph;

/// State field holding the submitted run parameters.
pub const INITIAL_REQUEST: &str = "initial_request";

type Summarize = Arc<dyn Fn(&PipelineState) -> JsonMap + Send + Sync>;

/// Runs a [`CompiledGraph`] seeded with the run input.
///
/// The initial state is `{"initial_request": input}`. A final state that
/// still carries `error_info` fails the run.
#[derive(Clone)]
pub struct GraphPipeline {
    graph: Arc<CompiledGraph>,
    summarize: Option<Summarize>,
}

impl GraphPipeline {
    /// Wraps a compiled graph; the result is the whole final state.
    #[must_use]
    pub fn new(graph: CompiledGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            summarize: None,
        }
    }

    /// Sets how the final state is turned into the run result.
    #[must_use]
    pub fn with_summary<F>(mut self, summarize: F) -> Self
    where
        F: Fn(&PipelineState) -> JsonMap + Send + Sync + 'static,
    {
        self.summarize = Some(Arc::new(summarize));
        self
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Runs the graph and returns the final state, errors included.
    ///
    /// # Errors
    ///
    /// Returns the executor's error if the run aborts.
    pub async fn run_state(&self, input: &JsonMap, ctx: &RunContext) -> Result<PipelineState, CastflowError> {
        let initial = PipelineState::new().with_field(INITIAL_REQUEST, Value::Object(input.clone()));
        self.graph.run_with_context(initial, ctx).await
    }
}

impl Debug for GraphPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphPipeline")
            .field("graph", &self.graph.name())
            .field("summarize", &self.summarize.is_some())
            .finish()
    }
}

#[async_trait]
impl Pipeline for GraphPipeline {
    fn name(&self) -> &str {
        self.graph.name()
    }

    async fn execute(&self, input: &JsonMap, ctx: &RunContext) -> Result<JsonMap, CastflowError> {
        let state = self.run_state(input, ctx).await?;
        if let Some(message) = state.error_info() {
            return Err(CastflowError::Pipeline(message.to_string()));
        }
        Ok(match &self.summarize {
            Some(summarize) => summarize(&state),
            None => state.into_map(),
        })
    }
}
