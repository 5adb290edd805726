//! Journals receive progress records while a run executes.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::runs::{StepAttempt, StepOutcome};

/// Sink for the progress of one run.
///
/// The registry's implementation writes into the owning `RunRecord`;
/// detached executions use [`NoopJournal`] or [`MemoryJournal`].
pub trait RunJournal: Send + Sync + Debug {
    /// The executor is about to invoke `stage`.
    fn stage_entered(&self, stage: &str);

    /// A step attempt finished.
    fn step_attempt(&self, attempt: StepAttempt);

    /// A step reached its final outcome.
    fn step_finished(&self, step_name: &str, outcome: StepOutcome);
}

/// A journal that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopJournal;

impl RunJournal for NoopJournal {
    fn stage_entered(&self, _stage: &str) {}
    fn step_attempt(&self, _attempt: StepAttempt) {}
    fn step_finished(&self, _step_name: &str, _outcome: StepOutcome) {}
}

/// A journal that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    stages: Mutex<Vec<String>>,
    attempts: Mutex<Vec<StepAttempt>>,
    outcomes: Mutex<BTreeMap<String, StepOutcome>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages entered so far.
    #[must_use]
    pub fn stages(&self) -> Vec<String> {
        self.stages.lock().clone()
    }

    /// Step attempts recorded so far.
    #[must_use]
    pub fn attempts(&self) -> Vec<StepAttempt> {
        self.attempts.lock().clone()
    }

    /// Final step outcomes recorded so far.
    #[must_use]
    pub fn outcomes(&self) -> BTreeMap<String, StepOutcome> {
        self.outcomes.lock().clone()
    }
}

impl RunJournal for MemoryJournal {
    fn stage_entered(&self, stage: &str) {
        self.stages.lock().push(stage.to_string());
    }

    fn step_attempt(&self, attempt: StepAttempt) {
        self.attempts.lock().push(attempt);
    }

    fn step_finished(&self, step_name: &str, outcome: StepOutcome) {
        self.outcomes.lock().insert(step_name.to_string(), outcome);
    }
}
