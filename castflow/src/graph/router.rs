//! Routers pick the next stage on a conditional edge.

use std::fmt::Debug;

use crate::core::PipelineState;

/// Chooses an outcome label from the current state.
///
/// The label is looked up in the conditional edge's outcome map. Routers
/// that can enumerate their labels return them from [`Router::outcomes`] so
/// `compile()` can reject edges that leave one unmapped.
pub trait Router: Send + Sync + Debug {
    /// Returns the outcome label for `state`.
    fn route(&self, state: &PipelineState) -> String;

    /// Returns every label [`Router::route`] can produce, if known.
    fn outcomes(&self) -> Option<Vec<String>> {
        None
    }
}

/// A router backed by a closure.
pub struct FnRouter<F>
where
    F: Fn(&PipelineState) -> String + Send + Sync,
{
    outcomes: Option<Vec<String>>,
    func: F,
}

impl<F> FnRouter<F>
where
    F: Fn(&PipelineState) -> String + Send + Sync,
{
    /// Creates a router that declares its possible outcomes.
    pub fn new<I, S>(outcomes: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outcomes: Some(outcomes.into_iter().map(Into::into).collect()),
            func,
        }
    }

    /// Creates a router whose outcomes are not statically known.
    pub fn open(func: F) -> Self {
        Self {
            outcomes: None,
            func,
        }
    }
}

impl<F> Debug for FnRouter<F>
where
    F: Fn(&PipelineState) -> String + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRouter")
            .field("outcomes", &self.outcomes)
            .finish_non_exhaustive()
    }
}

impl<F> Router for FnRouter<F>
where
    F: Fn(&PipelineState) -> String + Send + Sync,
{
    fn route(&self, state: &PipelineState) -> String {
        (self.func)(state)
    }

    fn outcomes(&self) -> Option<Vec<String>> {
        self.outcomes.clone()
    }
}

/// Routes on whether `error_info` is set.
///
/// Returns [`ErrorRouter::ERROR`] while an error is recorded and
/// [`ErrorRouter::OK`] otherwise. A guard field, once present in the state,
/// forces [`ErrorRouter::OK`] so a fallback is only tried once.
#[derive(Debug, Clone, Default)]
pub struct ErrorRouter {
    guard: Option<String>,
}

impl ErrorRouter {
    /// Outcome when no error is recorded.
    pub const OK: &'static str = "ok";
    /// Outcome when `error_info` is set.
    pub const ERROR: &'static str = "error";

    /// Creates the router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes to [`ErrorRouter::OK`] once `field` is present.
    #[must_use]
    pub fn unless(mut self, field: impl Into<String>) -> Self {
        self.guard = Some(field.into());
        self
    }
}

impl Router for ErrorRouter {
    fn route(&self, state: &PipelineState) -> String {
        let guarded = self.guard.as_deref().is_some_and(|g| state.contains(g));
        if state.has_error() && !guarded {
            Self::ERROR.to_string()
        } else {
            Self::OK.to_string()
        }
    }

    fn outcomes(&self) -> Option<Vec<String>> {
        Some(vec![Self::OK.to_string(), Self::ERROR.to_string()])
    }
}
