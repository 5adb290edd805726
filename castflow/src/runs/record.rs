//! Run records and their per-step log entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::{JsonMap, RunStatus, StepStatus};
use crate::utils::Timestamp;

/// One attempt of a retried step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttempt {
    /// The step name.
    pub step_name: String,
    /// 1-based attempt number.
    pub attempt: usize,
    /// The attempt outcome.
    pub status: StepStatus,
    /// When the attempt finished.
    pub timestamp: Timestamp,
    /// Why the attempt failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Delay slept after this attempt before the next one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Final outcome of a step, keyed by step name in `pipeline_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// `Completed` or `Failed`.
    pub status: StepStatus,
    /// When the step finished.
    pub timestamp: Timestamp,
    /// The last error for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The tracked state of one logical pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier.
    pub run_id: String,
    /// Name of the pipeline that executed the run.
    #[serde(default)]
    pub pipeline: String,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Submission time.
    pub started_at: Timestamp,
    /// Set once the run reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// The submitted run parameters.
    pub input: JsonMap,
    /// One entry per step attempt, in order.
    #[serde(default)]
    pub per_stage_log: Vec<StepAttempt>,
    /// Final outcome per step.
    #[serde(default)]
    pub pipeline_data: BTreeMap<String, StepOutcome>,
    /// Stages visited by the executor, in order.
    #[serde(default)]
    pub stage_path: Vec<String>,
    /// Pipeline result for completed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonMap>,
    /// Error message for failed or cancelled runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// Creates a new running record.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        pipeline: impl Into<String>,
        input: JsonMap,
        started_at: Timestamp,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline: pipeline.into(),
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            input,
            per_stage_log: Vec::new(),
            pipeline_data: BTreeMap::new(),
            stage_path: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Returns the attempts logged for one step.
    #[must_use]
    pub fn attempts_for(&self, step_name: &str) -> Vec<&StepAttempt> {
        self.per_stage_log
            .iter()
            .filter(|a| a.step_name == step_name)
            .collect()
    }

    /// Returns true once the record can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns a string input field, e.g. `sport`.
    #[must_use]
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }
}

/// Criteria for listing runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    /// Only runs in this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// Only runs whose input has these exact field values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_equals: BTreeMap<String, Value>,
}

impl RunFilter {
    /// Creates an empty filter matching every run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters on the `sport` input field.
    #[must_use]
    pub fn sport(sport: impl Into<String>) -> Self {
        Self::new().with_input("sport", Value::String(sport.into()))
    }

    /// Requires an input field to equal `value`.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input_equals.insert(key.into(), value);
        self
    }

    /// Requires a status.
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns true if the record satisfies every criterion.
    #[must_use]
    pub fn matches(&self, record: &RunRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        self.input_equals
            .iter()
            .all(|(key, expected)| record.input.get(key) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn input(sport: &str) -> JsonMap {
        json!({"sport": sport, "trigger": "manual"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_new_record_is_running() {
        let record = RunRecord::new("r1", "content", input("f1"), Utc::now());
        assert_eq!(record.status, RunStatus::Running);
        assert!(!record.is_terminal());
        assert_eq!(record.input_str("sport"), Some("f1"));
    }

    #[test]
    fn test_filter_matches() {
        let mut record = RunRecord::new("r1", "content", input("f1"), Utc::now());
        assert!(RunFilter::new().matches(&record));
        assert!(RunFilter::sport("f1").matches(&record));
        assert!(!RunFilter::sport("motogp").matches(&record));

        record.status = RunStatus::Failed;
        assert!(RunFilter::sport("f1").with_status(RunStatus::Failed).matches(&record));
        assert!(!RunFilter::new().with_status(RunStatus::Completed).matches(&record));
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = RunRecord::new("r1", "content", input("f1"), Utc::now());
        record.pipeline_data.insert(
            "research".to_string(),
            StepOutcome {
                status: StepStatus::Completed,
                timestamp: Utc::now(),
                error: None,
            },
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], json!("running"));
        assert_eq!(json["pipeline_data"]["research"]["status"], json!("completed"));
        assert!(json.get("completed_at").is_none());
        assert!(json["started_at"].as_str().unwrap().contains('T'));

        let back: RunRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
