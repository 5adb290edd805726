//! Pipeline state and the patches stages use to update it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// A JSON object, the exchange format with collaborators.
pub type JsonMap = serde_json::Map<String, Value>;

/// Reserved state field carrying a stage error message.
pub const ERROR_INFO: &str = "error_info";

/// A typed accessor for one state field.
///
/// Keys are declared once as constants so every stage reading or writing a
/// field agrees on its name and shape.
pub struct StateKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    /// Declares a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Returns the field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

/// The accumulated state of one run.
///
/// Owned by the executor; stages only see it by shared reference and
/// contribute through [`Patch`] values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineState {
    fields: JsonMap,
}

impl PipelineState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state from an existing JSON object.
    #[must_use]
    pub fn from_map(fields: JsonMap) -> Self {
        Self { fields }
    }

    /// Creates a state with a single field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Returns a raw field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a field decoded through its typed key.
    ///
    /// A field that is absent, `null` or of the wrong shape reads as `None`.
    #[must_use]
    pub fn get_typed<T: DeserializeOwned>(&self, key: &StateKey<T>) -> Option<T> {
        self.fields
            .get(key.name())
            .filter(|v| !v.is_null())
            .and_then(|v| T::deserialize(v).ok())
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Returns the current stage error, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<&str> {
        self.fields.get(ERROR_INFO).and_then(Value::as_str)
    }

    /// Returns true if a stage error is recorded.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error_info().is_some()
    }

    /// Applies a patch with shallow-merge semantics.
    pub fn merge(&mut self, patch: Patch) {
        for (key, op) in patch.ops {
            match op {
                Some(value) => {
                    self.fields.insert(key, value);
                }
                None => {
                    self.fields.remove(&key);
                }
            }
        }
    }

    /// Returns the field names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrows the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &JsonMap {
        &self.fields
    }

    /// Consumes the state into its map.
    #[must_use]
    pub fn into_map(self) -> JsonMap {
        self.fields
    }
}

/// A partial state update returned by a stage.
///
/// Each entry either sets a field or removes it; fields not named are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: BTreeMap<String, Option<Value>>,
}

impl Patch {
    /// Creates an empty patch.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an error sentinel patch.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::empty().set(ERROR_INFO, Value::String(message.into()))
    }

    /// Sets a field.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ops.insert(key.into(), Some(value));
        self
    }

    /// Sets a field through its typed key.
    ///
    /// Values that fail to serialize are stored as `null`.
    #[must_use]
    pub fn set_typed<T: Serialize>(self, key: &StateKey<T>, value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.set(key.name(), value)
    }

    /// Removes a field.
    #[must_use]
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.ops.insert(key.into(), None);
        self
    }

    /// Clears a previously recorded stage error.
    #[must_use]
    pub fn clear_error(self) -> Self {
        self.remove(ERROR_INFO)
    }

    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns true if the patch sets `error_info`.
    #[must_use]
    pub fn sets_error(&self) -> bool {
        matches!(self.ops.get(ERROR_INFO), Some(Some(_)))
    }

    /// Returns the names of the fields this patch touches.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.ops.keys()
    }
}

impl From<JsonMap> for Patch {
    fn from(map: JsonMap) -> Self {
        Self {
            ops: map.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ITEMS: StateKey<Vec<String>> = StateKey::new("items");

    #[test]
    fn test_merge_is_shallow() {
        let mut state = PipelineState::new()
            .with_field("a", json!({"x": 1, "y": 2}))
            .with_field("b", json!(true));

        state.merge(Patch::empty().set("a", json!({"x": 3})));

        assert_eq!(state.get("a"), Some(&json!({"x": 3})));
        assert_eq!(state.get("b"), Some(&json!(true)));
    }

    #[test]
    fn test_error_patch_and_clear() {
        let mut state = PipelineState::new();
        let patch = Patch::error("Research failed: no sources");
        assert!(patch.sets_error());

        state.merge(patch);
        assert_eq!(state.error_info(), Some("Research failed: no sources"));

        state.merge(Patch::empty().clear_error());
        assert!(!state.has_error());
        assert!(!state.contains(ERROR_INFO));
    }

    #[test]
    fn test_typed_access() {
        let mut state = PipelineState::new();
        assert_eq!(state.get_typed(&ITEMS), None);

        state.merge(Patch::empty().set_typed(&ITEMS, &vec!["x".to_string()]));
        assert_eq!(state.get_typed(&ITEMS), Some(vec!["x".to_string()]));

        state.merge(Patch::empty().set("items", json!(42)));
        assert_eq!(state.get_typed(&ITEMS), None);
    }

    #[test]
    fn test_state_serializes_as_plain_object() {
        let state = PipelineState::new().with_field("sport", json!("f1"));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, json!({"sport": "f1"}));
    }

    #[test]
    fn test_patch_from_map() {
        let mut map = JsonMap::new();
        map.insert("k".to_string(), json!(1));
        let patch = Patch::from(map);
        assert_eq!(patch.keys().collect::<Vec<_>>(), vec!["k"]);
        assert!(!patch.sets_error());
    }
}
