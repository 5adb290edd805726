//! The compiled graph and its sequential executor.

use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

use super::{Router, END};
use crate::context::RunContext;
use crate::core::PipelineState;
use crate::errors::CastflowError;
use crate::events::names;
use crate::stages::Stage;

/// The outgoing edge of one stage.
#[derive(Debug, Clone)]
pub enum Edge {
    /// Always continue to the named stage (or [`END`]).
    Static(String),
    /// Ask the router, then look its outcome up in `targets`.
    Conditional {
        /// Picks the outcome.
        router: Arc<dyn Router>,
        /// Outcome label to next stage (or [`END`]).
        targets: BTreeMap<String, String>,
    },
}

/// An immutable, validated pipeline graph.
///
/// Produced by [`super::GraphBuilder::compile`]; shareable across runs.
#[derive(Debug)]
pub struct CompiledGraph {
    name: String,
    stages: HashMap<String, Arc<dyn Stage>>,
    stage_order: Vec<String>,
    entry: String,
    edges: HashMap<String, Edge>,
    max_transitions: usize,
}

impl CompiledGraph {
    pub(super) fn new(
        name: String,
        stages: HashMap<String, Arc<dyn Stage>>,
        stage_order: Vec<String>,
        entry: String,
        edges: HashMap<String, Edge>,
        max_transitions: usize,
    ) -> Self {
        Self {
            name,
            stages,
            stage_order,
            entry,
            edges,
            max_transitions,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entry stage.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Returns the stage names in insertion order.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.stage_order
    }

    /// Returns the transition bound.
    #[must_use]
    pub fn max_transitions(&self) -> usize {
        self.max_transitions
    }

    /// Runs the graph outside any registry.
    ///
    /// # Errors
    ///
    /// See [`CompiledGraph::run_with_context`].
    pub async fn run(&self, initial: PipelineState) -> Result<PipelineState, CastflowError> {
        self.run_with_context(initial, &RunContext::detached()).await
    }

    /// Walks the graph from the entry stage until [`END`].
    ///
    /// Stages run one at a time; each patch is merged before the next stage
    /// is chosen. A state carrying `error_info` is not a reason to stop.
    ///
    /// # Errors
    ///
    /// Returns the error of a stage that aborts the run, a routing error for
    /// an unmapped outcome, [`CastflowError::TransitionLimit`] when the run
    /// loops past the bound, or [`CastflowError::Cancelled`] when the run is
    /// cancelled between stages.
    pub async fn run_with_context(
        &self,
        initial: PipelineState,
        ctx: &RunContext,
    ) -> Result<PipelineState, CastflowError> {
        let mut state = initial;
        let mut current = self.entry.clone();
        let mut transitions = 0usize;

        while current != END {
            if transitions >= self.max_transitions {
                return Err(CastflowError::TransitionLimit {
                    limit: self.max_transitions,
                    stage: current,
                });
            }
            transitions += 1;

            if ctx.is_cancelled() {
                let reason = ctx.cancellation().reason().unwrap_or_else(|| "cancelled".to_string());
                debug!(run_id = ctx.run_id(), stage = %current, "Run cancelled before stage");
                return Err(CastflowError::Cancelled(reason));
            }

            let stage = self
                .stages
                .get(&current)
                .ok_or_else(|| CastflowError::Internal(format!("Stage '{current}' vanished from graph")))?;

            ctx.journal().stage_entered(&current);
            ctx.emit(names::STAGE_STARTED, json!({"stage": current}));

            let span = info_span!("stage", run_id = ctx.run_id(), stage = %current);
            let patch = stage
                .run(&state, ctx)
                .instrument(span)
                .await
                .map_err(|e| e.in_stage(&current))?;

            let sets_error = patch.sets_error();
            state.merge(patch);
            ctx.emit(names::STAGE_COMPLETED, json!({"stage": current, "error": sets_error}));
            debug!(run_id = ctx.run_id(), stage = %current, error = sets_error, "Stage completed");

            current = self.next_stage(&current, &state)?;
        }

        Ok(state)
    }

    fn next_stage(&self, current: &str, state: &PipelineState) -> Result<String, CastflowError> {
        match self.edges.get(current) {
            Some(Edge::Static(to)) => Ok(to.clone()),
            Some(Edge::Conditional { router, targets }) => {
                let outcome = router.route(state);
                targets.get(&outcome).cloned().ok_or_else(|| CastflowError::Routing {
                    stage: current.to_string(),
                    outcome,
                })
            }
            None => Err(CastflowError::Internal(format!("Stage '{current}' has no outgoing edge"))),
        }
    }
}
