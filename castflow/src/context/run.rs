//! The context of one run.

use std::sync::Arc;

use super::{NoopJournal, RunJournal};
use crate::cancellation::CancellationToken;
use crate::events::{EventSink, NoOpEventSink};
use crate::utils::generate_uuid;

/// Everything a stage may need about the run it is part of.
///
/// Cheap to clone; all parts are shared.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    cancel: Arc<CancellationToken>,
    journal: Arc<dyn RunJournal>,
    events: Arc<dyn EventSink>,
}

impl RunContext {
    /// Creates a context for a registered run.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        cancel: Arc<CancellationToken>,
        journal: Arc<dyn RunJournal>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            cancel,
            journal,
            events,
        }
    }

    /// Creates a context that is not tracked by any registry.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(
            format!("detached-{}", generate_uuid().simple()),
            Arc::new(CancellationToken::new()),
            Arc::new(NoopJournal),
            Arc::new(NoOpEventSink),
        )
    }

    /// Replaces the journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn RunJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns true if the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the journal.
    #[must_use]
    pub fn journal(&self) -> &dyn RunJournal {
        self.journal.as_ref()
    }

    /// Emits an event tagged with the run id.
    pub fn emit(&self, event_type: &str, mut data: serde_json::Value) {
        if let Some(obj) = data.as_object_mut() {
            obj.insert(
                "run_id".to_string(),
                serde_json::Value::String(self.run_id.clone()),
            );
        }
        self.events.try_emit(event_type, Some(data));
    }
}
