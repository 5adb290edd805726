//! Stages that call a collaborator through the retry wrapper.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

use super::{Stage, StageResult};
use crate::collaborator::Collaborator;
use crate::context::RunContext;
use crate::core::{JsonMap, Patch, PipelineState};
use crate::errors::CastflowError;
use crate::retry::StepExecutor;

/// Builds a step's collaborator input from the current state.
///
/// Returning `Err` means a prerequisite is missing; the stage then reports
/// it as an `error_info` patch without calling the collaborator.
pub type StepInputFn = Arc<dyn Fn(&PipelineState) -> Result<JsonMap, String> + Send + Sync>;

/// What a step stage does once its step has exhausted every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepFailurePolicy {
    /// Abort the run with `StepFailed`.
    #[default]
    Fatal,
    /// Record the failure as `error_info` and let routing decide.
    RecordError,
}

/// A stage that runs one named step of a content pipeline.
///
/// The collaborator output is stored under `output_field`. A fallback step
/// runs even when `error_info` is set and clears it on success.
#[derive(Clone)]
pub struct StepStage {
    step_name: String,
    output_field: String,
    collaborator: Arc<dyn Collaborator>,
    executor: Arc<StepExecutor>,
    input: StepInputFn,
    on_failure: StepFailurePolicy,
    fallback: bool,
}

/// Marker field set once a fallback step has run.
pub const FALLBACK_ATTEMPTED: &str = "fallback_attempted";

impl StepStage {
    /// Creates a step stage whose input is the whole state.
    #[must_use]
    pub fn new(
        step_name: impl Into<String>,
        output_field: impl Into<String>,
        collaborator: Arc<dyn Collaborator>,
        executor: Arc<StepExecutor>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            output_field: output_field.into(),
            collaborator,
            executor,
            input: Arc::new(|state: &PipelineState| Ok(state.as_map().clone())),
            on_failure: StepFailurePolicy::Fatal,
            fallback: false,
        }
    }

    /// Sets how the collaborator input is prepared.
    #[must_use]
    pub fn with_input<F>(mut self, input: F) -> Self
    where
        F: Fn(&PipelineState) -> Result<JsonMap, String> + Send + Sync + 'static,
    {
        self.input = Arc::new(input);
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn on_failure(mut self, policy: StepFailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Marks the stage as a fallback.
    #[must_use]
    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    /// Returns the step name used for retries, validators and logs.
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }
}

impl Debug for StepStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepStage")
            .field("step_name", &self.step_name)
            .field("output_field", &self.output_field)
            .field("collaborator", &self.collaborator)
            .field("on_failure", &self.on_failure)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for StepStage {
    fn name(&self) -> &str {
        &self.step_name
    }

    async fn run(&self, state: &PipelineState, ctx: &RunContext) -> StageResult {
        if state.has_error() && !self.fallback {
            return Ok(Patch::empty());
        }

        let input = match (self.input)(state) {
            Ok(input) => input,
            Err(message) => {
                return Ok(Patch::error(format!("{} failed: {message}", self.step_name)));
            }
        };

        let result = self
            .executor
            .execute(&self.step_name, self.collaborator.as_ref(), input, ctx)
            .await;

        let patch = match result {
            Ok(output) => {
                let patch = Patch::empty().set(&self.output_field, Value::Object(output));
                if self.fallback {
                    patch.clear_error()
                } else {
                    patch
                }
            }
            Err(CastflowError::StepFailed(failed))
                if self.on_failure == StepFailurePolicy::RecordError =>
            {
                warn!(run_id = ctx.run_id(), step = %self.step_name, "Recording step failure as error_info");
                Patch::error(failed.to_string())
            }
            Err(e) => return Err(e),
        };

        Ok(if self.fallback {
            patch.set(FALLBACK_ATTEMPTED, Value::Bool(true))
        } else {
            patch
        })
    }
}
