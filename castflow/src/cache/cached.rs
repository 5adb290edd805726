//! Collaborators that consult the TTL cache first.

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use super::TtlCache;
use crate::collaborator::Collaborator;
use crate::core::JsonMap;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::retry::ValidatorRegistry;

/// Input field that bypasses the cache when `true`.
pub const FORCE_REFRESH: &str = "force_refresh";

/// Derives the cache key for one step invocation.
///
/// The key is `{step}:{sha256 of the input JSON}`; the `force_refresh` flag
/// is left out so a forced call refreshes the same entry.
#[must_use]
pub fn cache_key(step_name: &str, input: &JsonMap) -> String {
    let mut canonical = input.clone();
    canonical.remove(FORCE_REFRESH);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(step_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(&bytes);
    format!("{step_name}:{}", hex::encode(hasher.finalize()))
}

/// Wraps a collaborator with the TTL cache.
///
/// Only outputs that carry no `error` field and pass the step's validators
/// are stored. A cached entry the validators now reject is dropped and the
/// collaborator is called again.
#[derive(Debug, Clone)]
pub struct CachedCollaborator {
    step_name: String,
    inner: Arc<dyn Collaborator>,
    cache: Arc<TtlCache>,
    ttl: Option<u64>,
    validators: ValidatorRegistry,
    events: Arc<dyn EventSink>,
}

impl CachedCollaborator {
    /// Creates the wrapper using the cache's default TTL.
    #[must_use]
    pub fn new(step_name: impl Into<String>, inner: Arc<dyn Collaborator>, cache: Arc<TtlCache>) -> Self {
        Self {
            step_name: step_name.into(),
            inner,
            cache,
            ttl: None,
            validators: ValidatorRegistry::new(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the quality gates an output must pass before it is stored.
    #[must_use]
    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    /// Sets a TTL for this step's entries.
    #[must_use]
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl = Some(ttl_seconds);
        self
    }

    /// Sets the sink for `cache.hit` and `cache.miss` events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

#[async_trait]
impl Collaborator for CachedCollaborator {
    async fn run(&self, input: JsonMap) -> anyhow::Result<JsonMap> {
        let key = cache_key(&self.step_name, &input);
        let force = input.get(FORCE_REFRESH).and_then(Value::as_bool).unwrap_or(false);

        if !force {
            if let Some(Value::Object(hit)) = self.cache.get(&key) {
                if self.is_storable(&hit) {
                    debug!(step = %self.step_name, "Cache hit");
                    self.events
                        .try_emit(names::CACHE_HIT, Some(json!({"step": self.step_name, "key": key})));
                    return Ok(hit);
                }
                debug!(step = %self.step_name, "Dropping cached output that fails validation");
                self.cache.invalidate(&key);
            }
        }

        self.events.try_emit(
            names::CACHE_MISS,
            Some(json!({"step": self.step_name, "key": key, "forced": force})),
        );
        let output = self.inner.run(input).await?;
        if self.is_storable(&output) {
            self.cache.set(key, Value::Object(output.clone()), self.ttl);
        }
        Ok(output)
    }
}

impl CachedCollaborator {
    fn is_storable(&self, output: &JsonMap) -> bool {
        !output.contains_key("error") && self.validators.check(&self.step_name, output).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::retry::MinItems;
    use crate::testing::{json_map, Reply, ScriptedCollaborator};

    fn setup(inner: ScriptedCollaborator) -> (CachedCollaborator, Arc<ScriptedCollaborator>, Arc<CollectingEventSink>) {
        let inner = Arc::new(inner);
        let events = Arc::new(CollectingEventSink::new());
        let cached = CachedCollaborator::new("research", inner.clone(), Arc::new(TtlCache::in_memory(60)))
            .with_events(events.clone());
        (cached, inner, events)
    }

    #[test]
    fn test_cache_key_ignores_force_refresh() {
        let plain = json_map(json!({"sport": "f1", "event_type": "race"}));
        let forced = json_map(json!({"sport": "f1", "event_type": "race", "force_refresh": true}));
        let other = json_map(json!({"sport": "motogp", "event_type": "race"}));

        assert_eq!(cache_key("research", &plain), cache_key("research", &forced));
        assert_ne!(cache_key("research", &plain), cache_key("research", &other));
        assert_ne!(cache_key("research", &plain), cache_key("planning", &plain));
        assert!(cache_key("research", &plain).starts_with("research:"));
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let (cached, inner, events) =
            setup(ScriptedCollaborator::succeeding("research", json_map(json!({"articles": [1]}))));
        let input = json_map(json!({"sport": "f1"}));

        cached.run(input.clone()).await.unwrap();
        let out = cached.run(input).await.unwrap();

        assert_eq!(out["articles"], json!([1]));
        assert_eq!(inner.calls(), 1);
        assert_eq!(
            events.event_types(),
            vec![names::CACHE_MISS.to_string(), names::CACHE_HIT.to_string()]
        );
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let (cached, inner, _) =
            setup(ScriptedCollaborator::succeeding("research", json_map(json!({"articles": [1]}))));

        cached.run(json_map(json!({"sport": "f1"}))).await.unwrap();
        cached
            .run(json_map(json!({"sport": "f1", "force_refresh": true})))
            .await
            .unwrap();

        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_error_output_not_cached() {
        let (cached, inner, _) = setup(ScriptedCollaborator::new(
            "research",
            vec![Reply::ErrorField("quota".to_string()), Reply::Ok(JsonMap::new())],
        ));
        let input = json_map(json!({"sport": "f1"}));

        let first = cached.run(input.clone()).await.unwrap();
        assert!(first.contains_key("error"));
        cached.run(input).await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_output_failing_validation_not_cached() {
        let (cached, inner, _) = setup(ScriptedCollaborator::new(
            "research",
            vec![
                Reply::Ok(json_map(json!({"articles": ["a"]}))),
                Reply::Ok(json_map(json!({"articles": ["a", "b"]}))),
            ],
        ));
        let cached = cached.with_validators(
            ValidatorRegistry::new().with("research", MinItems::new("articles", 2, "research sources")),
        );
        let input = json_map(json!({"sport": "f1"}));

        let thin = cached.run(input.clone()).await.unwrap();
        assert_eq!(thin["articles"], json!(["a"]));
        let full = cached.run(input.clone()).await.unwrap();
        assert_eq!(full["articles"], json!(["a", "b"]));
        let again = cached.run(input).await.unwrap();

        assert_eq!(again["articles"], json!(["a", "b"]));
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_failing_validation_is_refetched() {
        let cache = Arc::new(TtlCache::in_memory(60));
        let input = json_map(json!({"sport": "f1"}));
        cache.set(cache_key("research", &input), json!({"articles": ["a"]}), None);

        let inner = Arc::new(ScriptedCollaborator::succeeding(
            "research",
            json_map(json!({"articles": ["a", "b"]})),
        ));
        let cached = CachedCollaborator::new("research", inner.clone(), cache.clone()).with_validators(
            ValidatorRegistry::new().with("research", MinItems::new("articles", 2, "research sources")),
        );

        let out = cached.run(input.clone()).await.unwrap();
        assert_eq!(out["articles"], json!(["a", "b"]));
        assert_eq!(inner.calls(), 1);
        assert_eq!(cache.get(&cache_key("research", &input)), Some(json!({"articles": ["a", "b"]})));
    }
}
