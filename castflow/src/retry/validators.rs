//! Post-condition validators (quality gates) for step output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::JsonMap;

/// A quality gate run on a step's successful output.
///
/// Returning `Err` rejects the output; the retry wrapper then treats the
/// attempt exactly like a collaborator failure.
pub trait Validator: Send + Sync + Debug {
    /// Checks `output`, returning a message describing why it is rejected.
    fn validate(&self, output: &JsonMap) -> Result<(), String>;
}

/// Requires an array field to hold at least `min` items.
///
/// A missing or non-array field counts as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinItems {
    field: String,
    min: usize,
    label: String,
}

impl MinItems {
    /// Creates the gate; `label` names the items in the rejection message.
    #[must_use]
    pub fn new(field: impl Into<String>, min: usize, label: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            min,
            label: label.into(),
        }
    }
}

impl Validator for MinItems {
    fn validate(&self, output: &JsonMap) -> Result<(), String> {
        let count = output
            .get(&self.field)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if count < self.min {
            return Err(format!("Insufficient {}: {count} < {}", self.label, self.min));
        }
        Ok(())
    }
}

/// Requires a minimum word count.
///
/// Reads the numeric `count_field` when present, otherwise counts the words
/// of `text_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinWordCount {
    count_field: String,
    text_field: Option<String>,
    min: u64,
}

impl MinWordCount {
    /// Gates on the numeric `word_count` field.
    #[must_use]
    pub fn new(min: u64) -> Self {
        Self {
            count_field: "word_count".to_string(),
            text_field: None,
            min,
        }
    }

    /// Falls back to counting the words of `field` when no count is reported.
    #[must_use]
    pub fn counting_text(mut self, field: impl Into<String>) -> Self {
        self.text_field = Some(field.into());
        self
    }

    fn word_count(&self, output: &JsonMap) -> u64 {
        if let Some(n) = output.get(&self.count_field).and_then(Value::as_u64) {
            return n;
        }
        self.text_field
            .as_ref()
            .and_then(|f| output.get(f))
            .and_then(Value::as_str)
            .map_or(0, |text| text.split_whitespace().count() as u64)
    }
}

impl Validator for MinWordCount {
    fn validate(&self, output: &JsonMap) -> Result<(), String> {
        let words = self.word_count(output);
        if words < self.min {
            return Err(format!("Script too short: {words} < {}", self.min));
        }
        Ok(())
    }
}

/// A validator backed by a closure.
pub struct FnValidator<F>
where
    F: Fn(&JsonMap) -> Result<(), String> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&JsonMap) -> Result<(), String> + Send + Sync,
{
    /// Wraps `func`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnValidator<F>
where
    F: Fn(&JsonMap) -> Result<(), String> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnValidator").field("name", &self.name).finish()
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&JsonMap) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, output: &JsonMap) -> Result<(), String> {
        (self.func)(output)
    }
}

/// Validators keyed by step name.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    by_step: HashMap<String, Vec<Arc<dyn Validator>>>,
}

impl ValidatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a validator for `step_name`.
    pub fn register(&mut self, step_name: impl Into<String>, validator: Arc<dyn Validator>) {
        self.by_step.entry(step_name.into()).or_default().push(validator);
    }

    /// Builder-style [`ValidatorRegistry::register`].
    #[must_use]
    pub fn with(mut self, step_name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        self.register(step_name, Arc::new(validator));
        self
    }

    /// Runs every validator for `step_name`, stopping at the first rejection.
    ///
    /// # Errors
    ///
    /// Returns the rejection message of the first failing validator.
    pub fn check(&self, step_name: &str, output: &JsonMap) -> Result<(), String> {
        self.by_step
            .get(step_name)
            .into_iter()
            .flatten()
            .try_for_each(|v| v.validate(output))
    }

    /// Returns true if no validator is registered for `step_name`.
    #[must_use]
    pub fn is_empty_for(&self, step_name: &str) -> bool {
        self.by_step.get(step_name).map_or(true, Vec::is_empty)
    }
}

/// Minimum quality bar for generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Research must return at least this many articles.
    pub min_research_sources: usize,
    /// Scripts must be at least this many words long.
    pub min_script_word_count: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_research_sources: 5,
            min_script_word_count: 1500,
        }
    }
}

impl QualityThresholds {
    /// Builds the default gates for the content pipeline steps.
    #[must_use]
    pub fn validators(&self) -> ValidatorRegistry {
        ValidatorRegistry::new()
            .with(
                "research",
                MinItems::new("articles", self.min_research_sources, "research sources"),
            )
            .with(
                "script_generation",
                MinWordCount::new(self.min_script_word_count).counting_text("script"),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_min_items() {
        let gate = MinItems::new("articles", 2, "research sources");
        assert!(gate.validate(&map(json!({"articles": [1, 2]}))).is_ok());

        let err = gate.validate(&map(json!({"articles": [1]}))).unwrap_err();
        assert_eq!(err, "Insufficient research sources: 1 < 2");

        assert!(gate.validate(&map(json!({}))).is_err());
    }

    #[test]
    fn test_min_word_count() {
        let gate = MinWordCount::new(3).counting_text("script");
        assert!(gate.validate(&map(json!({"word_count": 3}))).is_ok());
        assert!(gate.validate(&map(json!({"script": "one two three"}))).is_ok());

        let err = gate.validate(&map(json!({"script": "too short"}))).unwrap_err();
        assert_eq!(err, "Script too short: 2 < 3");
    }

    #[test]
    fn test_registry_runs_only_registered_step() {
        let registry = ValidatorRegistry::new()
            .with("research", MinItems::new("articles", 1, "research sources"));

        assert!(registry.check("research", &map(json!({}))).is_err());
        assert!(registry.check("voice_synthesis", &map(json!({}))).is_ok());
        assert!(registry.is_empty_for("voice_synthesis"));
    }

    #[test]
    fn test_fn_validator() {
        let registry = ValidatorRegistry::new().with(
            "plan",
            FnValidator::new("has_segments", |out: &JsonMap| {
                if out.contains_key("segments") {
                    Ok(())
                } else {
                    Err("plan has no segments".to_string())
                }
            }),
        );
        assert_eq!(
            registry.check("plan", &map(json!({}))),
            Err("plan has no segments".to_string())
        );
    }

    #[test]
    fn test_quality_threshold_defaults() {
        let registry = QualityThresholds::default().validators();

        let four = map(json!({"articles": [1, 2, 3, 4]}));
        let five = map(json!({"articles": [1, 2, 3, 4, 5]}));
        assert!(registry.check("research", &four).is_err());
        assert!(registry.check("research", &five).is_ok());

        assert!(registry.check("script_generation", &map(json!({"word_count": 1499}))).is_err());
        assert!(registry.check("script_generation", &map(json!({"word_count": 1500}))).is_ok());
    }
}
