//! Mock collaborators and stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;

use crate::collaborator::Collaborator;
use crate::context::RunContext;
use crate::core::{JsonMap, Patch, PipelineState};
use crate::errors::CastflowError;
use crate::stages::{Stage, StageResult};

/// One scripted collaborator reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Return this output.
    Ok(JsonMap),
    /// Fail with this error.
    Fail(String),
    /// Return `{"error": message}`.
    ErrorField(String),
}

/// A collaborator that plays back a fixed script of replies.
///
/// The last reply repeats once the script runs out.
#[derive(Debug)]
pub struct ScriptedCollaborator {
    name: String,
    replies: Vec<Reply>,
    inputs: Mutex<Vec<JsonMap>>,
}

impl ScriptedCollaborator {
    /// Creates a collaborator from an explicit script.
    #[must_use]
    pub fn new(name: impl Into<String>, replies: Vec<Reply>) -> Self {
        Self {
            name: name.into(),
            replies,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Always returns `output`.
    #[must_use]
    pub fn succeeding(name: impl Into<String>, output: JsonMap) -> Self {
        Self::new(name, vec![Reply::Ok(output)])
    }

    /// Fails `failures` times, then returns `output`.
    #[must_use]
    pub fn failing_then(name: impl Into<String>, failures: usize, output: JsonMap) -> Self {
        let name = name.into();
        let mut replies: Vec<Reply> = (1..=failures)
            .map(|n| Reply::Fail(format!("{name} unavailable (call {n})")))
            .collect();
        replies.push(Reply::Ok(output));
        Self::new(name, replies)
    }

    /// Always fails with `error`.
    #[must_use]
    pub fn always_failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(name, vec![Reply::Fail(error.into())])
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns the inputs of every call so far.
    #[must_use]
    pub fn inputs(&self) -> Vec<JsonMap> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn run(&self, input: JsonMap) -> anyhow::Result<JsonMap> {
        let call = {
            let mut inputs = self.inputs.lock();
            inputs.push(input);
            inputs.len() - 1
        };

        let reply = self
            .replies
            .get(call)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_else(|| Reply::Ok(JsonMap::new()));

        match reply {
            Reply::Ok(output) => Ok(output),
            Reply::Fail(message) => Err(anyhow::anyhow!(message)),
            Reply::ErrorField(message) => {
                let mut output = JsonMap::new();
                output.insert("error".to_string(), Value::String(message));
                Ok(output)
            }
        }
    }
}

/// A stage that records the states it sees and returns a fixed patch.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    patch: Patch,
    conforming: bool,
    seen: Mutex<Vec<PipelineState>>,
}

impl RecordingStage {
    /// Creates a stage that always runs and returns `patch`.
    #[must_use]
    pub fn new(name: impl Into<String>, patch: Patch) -> Self {
        Self {
            name: name.into(),
            patch,
            conforming: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Creates a stage that returns an empty patch while `error_info` is set.
    #[must_use]
    pub fn conforming(name: impl Into<String>, patch: Patch) -> Self {
        Self {
            conforming: true,
            ..Self::new(name, patch)
        }
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns the state passed to each invocation.
    #[must_use]
    pub fn seen(&self) -> Vec<PipelineState> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &PipelineState, _ctx: &RunContext) -> StageResult {
        self.seen.lock().push(state.clone());
        if self.conforming && state.has_error() {
            return Ok(Patch::empty());
        }
        Ok(self.patch.clone())
    }
}

/// A stage that aborts the run with an unrecoverable error.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: &PipelineState, _ctx: &RunContext) -> StageResult {
        Err(CastflowError::Stage {
            stage: self.name.clone(),
            message: self.error.clone(),
        })
    }
}

/// A stage that takes time to execute.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: &PipelineState, _ctx: &RunContext) -> StageResult {
        tokio::time::sleep(self.delay).await;
        Ok(Patch::empty())
    }
}
