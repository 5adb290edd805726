//! Error types for the castflow orchestration engine.
//!
//! The taxonomy follows the life of a run: graph construction errors are
//! raised by `compile()`, step failures by the retry wrapper, and storage
//! errors by the persistence layers (which log them rather than abort).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for castflow operations.
#[derive(Debug, Error)]
pub enum CastflowError {
    /// The pipeline graph is malformed.
    #[error("{0}")]
    Graph(#[from] GraphValidationError),

    /// A retried step exhausted its attempts.
    #[error("{0}")]
    StepFailed(#[from] StepFailed),

    /// A router produced an outcome that has no target.
    #[error("Router on stage '{stage}' returned unmapped outcome '{outcome}'")]
    Routing {
        /// The stage owning the conditional edge.
        stage: String,
        /// The outcome the router returned.
        outcome: String,
    },

    /// A stage returned an unrecoverable error.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// The failing stage.
        stage: String,
        /// The error message.
        message: String,
    },

    /// The run finished with `error_info` set.
    #[error("{0}")]
    Pipeline(String),

    /// The executor exceeded its transition budget.
    #[error("Pipeline exceeded {limit} stage transitions (last stage '{stage}')")]
    TransitionLimit {
        /// The configured limit.
        limit: usize,
        /// The stage that would have run next.
        stage: String,
    },

    /// The run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// No run exists with the given id.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// The run is not in a state that allows the operation.
    #[error("Run '{run_id}' is {status}, expected running")]
    InvalidRunState {
        /// The run id.
        run_id: String,
        /// The current status.
        status: String,
    },

    /// No scheduled entry exists with the given id.
    #[error("Scheduled run not found: {0}")]
    ScheduleNotFound(String),

    /// A persistence backend failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A caller-supplied value could not be used.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CastflowError {
    /// Attaches the failing stage to an error that does not name one.
    ///
    /// Step failures, routing errors, cancellation and errors that already
    /// carry a stage pass through unchanged.
    #[must_use]
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            Self::Pipeline(message) | Self::InvalidRequest(message) | Self::Internal(message) => Self::Stage {
                stage: stage.to_string(),
                message,
            },
            Self::Store(e) => Self::Stage {
                stage: stage.to_string(),
                message: e.to_string(),
            },
            other => other,
        }
    }
}

/// Metadata about a graph construction error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct GraphErrorInfo {
    /// Error code (e.g., "GRAPH-UNKNOWN_STAGE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl GraphErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline graph fails validation at compile time.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Structured diagnostics.
    pub error_info: Option<GraphErrorInfo>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the structured diagnostics.
    #[must_use]
    pub fn with_error_info(mut self, info: GraphErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Terminal failure of a retried step.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Step {step_name} failed after {attempts} attempts: {last_error}")]
pub struct StepFailed {
    /// The step that failed.
    pub step_name: String,
    /// How many attempts were made.
    pub attempts: usize,
    /// The error from the final attempt.
    pub last_error: String,
}

impl StepFailed {
    /// Creates a new step failure.
    #[must_use]
    pub fn new(step_name: impl Into<String>, attempts: usize, last_error: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            attempts,
            last_error: last_error.into(),
        }
    }
}

/// Errors from the persistence backends (cache index, run files, schedules).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The stored document could not be (de)serialized.
    #[error("Serialization error on {path}: {source}")]
    Serialization {
        /// The path being accessed.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The id cannot be used as a file name.
    #[error("Unsafe record id '{0}'")]
    InvalidId(String),
}

impl StoreError {
    /// Wraps an IO error with the path it concerns.
    #[must_use]
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Wraps a serde error with the path it concerns.
    #[must_use]
    pub fn serialization(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Read {
        /// The config path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the schema.
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// The config path.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// An environment override could not be parsed.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv {
        /// The environment variable.
        key: String,
        /// The raw value.
        value: String,
    },
}
