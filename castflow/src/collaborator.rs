//! The contract for external collaborators.
//!
//! Search APIs, language models, speech engines and audio encoders all sit
//! behind [`Collaborator`]. The engine never looks inside one; it only sees
//! a JSON object going in and a JSON object (or an error) coming out.

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

use crate::core::JsonMap;

/// An opaque unit of external work.
///
/// A collaborator fails either by returning `Err` or by returning an output
/// that carries an `error` field; the retry wrapper treats both alike.
#[async_trait]
pub trait Collaborator: Send + Sync + Debug {
    /// Runs the collaborator on `input`.
    async fn run(&self, input: JsonMap) -> anyhow::Result<JsonMap>;
}

/// A collaborator backed by an async closure.
pub struct FnCollaborator<F, Fut>
where
    F: Fn(JsonMap) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<JsonMap>> + Send,
{
    name: String,
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnCollaborator<F, Fut>
where
    F: Fn(JsonMap) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<JsonMap>> + Send,
{
    /// Wraps `func` under a display name.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _future: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnCollaborator<F, Fut>
where
    F: Fn(JsonMap) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<JsonMap>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCollaborator").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Collaborator for FnCollaborator<F, Fut>
where
    F: Fn(JsonMap) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<JsonMap>> + Send,
{
    async fn run(&self, input: JsonMap) -> anyhow::Result<JsonMap> {
        (self.func)(input).await
    }
}
