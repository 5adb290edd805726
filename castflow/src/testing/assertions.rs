//! Test assertions for pipeline state.

use serde_json::Value;

use crate::core::PipelineState;

/// Asserts that no stage error is recorded.
pub fn assert_no_error(state: &PipelineState) {
    assert!(
        !state.has_error(),
        "Expected no error_info, got: {:?}",
        state.error_info()
    );
}

/// Asserts that `error_info` is set and contains `needle`.
pub fn assert_error_contains(state: &PipelineState, needle: &str) {
    match state.error_info() {
        Some(message) => assert!(
            message.contains(needle),
            "Expected error_info to contain '{needle}', got '{message}'"
        ),
        None => panic!("Expected error_info containing '{needle}', but none is set"),
    }
}

/// Asserts that a state field equals `expected`.
pub fn assert_field(state: &PipelineState, key: &str, expected: &Value) {
    let actual = state.get(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected value {expected:?} for key '{key}', got {actual:?}"
    );
}

/// Asserts that a state field is absent.
pub fn assert_missing(state: &PipelineState, key: &str) {
    assert!(
        !state.contains(key),
        "Expected key '{key}' to be absent. Keys: {:?}",
        state.keys().collect::<Vec<_>>()
    );
}

/// Builds a `JsonMap` from a `json!` object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
#[must_use]
pub fn json_map(value: Value) -> crate::core::JsonMap {
    match value {
        Value::Object(map) => map,
        other => panic!("Expected a JSON object, got {other}"),
    }
}
