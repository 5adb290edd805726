//! Scheduled run entries and listing filters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::{JsonMap, ScheduleStatus};
use crate::utils::Timestamp;

/// A run request waiting for its due time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Unique schedule identifier.
    pub schedule_id: String,
    /// Parameters handed to the registry when the entry fires.
    pub run_params: JsonMap,
    /// When the entry becomes due.
    pub due_at: Timestamp,
    /// Lifecycle status.
    #[serde(default)]
    pub status: ScheduleStatus,
    /// When the entry was created.
    pub created_at: Timestamp,
}

impl ScheduleEntry {
    /// Creates a pending entry.
    #[must_use]
    pub fn new(schedule_id: impl Into<String>, run_params: JsonMap, due_at: Timestamp, created_at: Timestamp) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            run_params,
            due_at,
            status: ScheduleStatus::Scheduled,
            created_at,
        }
    }

    /// Returns true once `now` has reached the due time.
    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.due_at <= now
    }
}

/// Criteria for listing pending entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFilter {
    /// Only entries whose params have these exact field values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params_equal: BTreeMap<String, Value>,
    /// Only entries due at or before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_before: Option<Timestamp>,
}

impl ScheduleFilter {
    /// Creates a filter matching every entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters on the `sport` parameter.
    #[must_use]
    pub fn sport(sport: impl Into<String>) -> Self {
        Self::new().with_param("sport", Value::String(sport.into()))
    }

    /// Requires a parameter to equal `value`.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params_equal.insert(key.into(), value);
        self
    }

    /// Requires the entry to be due by `at`.
    #[must_use]
    pub fn due_before(mut self, at: Timestamp) -> Self {
        self.due_before = Some(at);
        self
    }

    /// Returns true if the entry satisfies every criterion.
    #[must_use]
    pub fn matches(&self, entry: &ScheduleEntry) -> bool {
        if self.due_before.is_some_and(|at| entry.due_at > at) {
            return false;
        }
        self.params_equal
            .iter()
            .all(|(key, expected)| entry.run_params.get(key) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn entry(sport: &str, due_in_hours: i64) -> ScheduleEntry {
        let now = Utc.with_ymd_and_hms(2024, 5, 26, 12, 0, 0).unwrap();
        let params = json!({"sport": sport}).as_object().cloned().unwrap();
        ScheduleEntry::new("s1", params, now + Duration::hours(due_in_hours), now)
    }

    #[test]
    fn test_is_due() {
        let e = entry("f1", 2);
        assert!(!e.is_due(e.created_at));
        assert!(e.is_due(e.due_at));
        assert!(e.is_due(e.due_at + Duration::seconds(1)));
    }

    #[test]
    fn test_filter() {
        let e = entry("f1", 2);
        assert!(ScheduleFilter::new().matches(&e));
        assert!(ScheduleFilter::sport("f1").matches(&e));
        assert!(!ScheduleFilter::sport("motogp").matches(&e));
        assert!(!ScheduleFilter::new().due_before(e.created_at).matches(&e));
        assert!(ScheduleFilter::new().due_before(e.due_at).matches(&e));
    }

    #[test]
    fn test_status_defaults_when_missing() {
        let raw = json!({
            "schedule_id": "s1",
            "run_params": {"sport": "f1"},
            "due_at": "2024-05-26T18:00:00Z",
            "created_at": "2024-05-26T12:00:00Z"
        });
        let e: ScheduleEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(e.status, ScheduleStatus::Scheduled);
    }
}
