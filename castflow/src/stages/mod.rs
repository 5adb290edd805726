//! Stage trait and implementations.
//!
//! Stages are the units of work in a castflow graph. A stage reads the
//! accumulated [`PipelineState`] and returns a [`Patch`]; it never mutates the
//! state itself. Returning `Err` aborts the run, while a recoverable problem
//! is reported with an `error_info` patch that downstream stages see.

mod step;

pub use step::{StepFailurePolicy, StepInputFn, StepStage, FALLBACK_ATTEMPTED};

use crate::context::RunContext;
use crate::core::{Patch, PipelineState};
use crate::errors::CastflowError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// The result of invoking a stage.
pub type StageResult = Result<Patch, CastflowError>;

/// Trait for pipeline stages.
///
/// A conforming stage checks [`PipelineState::error_info`] first and returns
/// an empty patch when it is set, unless it is an explicit fallback.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Runs the stage against the current state.
    async fn run(&self, state: &PipelineState, ctx: &RunContext) -> StageResult;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&PipelineState) -> Patch + Send + Sync,
{
    name: String,
    func: F,
    skip_on_error: bool,
}

impl<F> FnStage<F>
where
    F: Fn(&PipelineState) -> Patch + Send + Sync,
{
    /// Creates a stage that always invokes `func`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            skip_on_error: false,
        }
    }

    /// Creates a stage that returns an empty patch while `error_info` is set.
    pub fn conforming(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            skip_on_error: true,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&PipelineState) -> Patch + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("skip_on_error", &self.skip_on_error)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&PipelineState) -> Patch + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &PipelineState, _ctx: &RunContext) -> StageResult {
        if self.skip_on_error && state.has_error() {
            return Ok(Patch::empty());
        }
        Ok((self.func)(state))
    }
}

/// An async function-based stage.
///
/// The function receives an owned copy of the state so the returned future
/// does not borrow from the executor.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    name: String,
    func: F,
    skip_on_error: bool,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    /// Creates a stage that always invokes `func`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            skip_on_error: false,
            _future: PhantomData,
        }
    }

    /// Creates a stage that returns an empty patch while `error_info` is set.
    pub fn conforming(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            skip_on_error: true,
            _future: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage")
            .field("name", &self.name)
            .field("skip_on_error", &self.skip_on_error)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(PipelineState) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &PipelineState, _ctx: &RunContext) -> StageResult {
        if self.skip_on_error && state.has_error() {
            return Ok(Patch::empty());
        }
        (self.func)(state.clone()).await
    }
}

/// A no-op stage, useful as a join point or placeholder.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _state: &PipelineState, _ctx: &RunContext) -> StageResult {
        Ok(Patch::empty())
    }
}
