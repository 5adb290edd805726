//! Where engine lifecycle events go.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::Level;

/// Receives the lifecycle events of runs, stages, steps, schedules and the cache.
///
/// Payloads are JSON objects whose well-known keys (`run_id`, `stage`,
/// `step`, `attempt`, `schedule_id`, `error`) sinks may pick out.
#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Records an event from async code.
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }

    /// Records an event without awaiting. Must never block on I/O.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing` with their identifying fields broken out.
///
/// Failures (`*.failed`, `step.attempt_failed`, `step.exhausted`) log at
/// WARN, run and schedule transitions at INFO, and stage and cache chatter
/// at DEBUG.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    /// Creates the sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn level_for(event_type: &str) -> Level {
        if event_type.ends_with(".failed") || event_type.ends_with("_failed") || event_type == "step.exhausted" {
            Level::WARN
        } else if event_type.starts_with("run.") || event_type.starts_with("schedule.") {
            Level::INFO
        } else {
            Level::DEBUG
        }
    }
}

macro_rules! log_event {
    ($macro:ident, $event_type:expr, $data:expr) => {
        tracing::$macro!(
            event_type = $event_type,
            run_id = str_field($data, "run_id"),
            stage = str_field($data, "stage"),
            step = str_field($data, "step"),
            attempt = $data.and_then(|d| d.get("attempt")).and_then(serde_json::Value::as_u64),
            schedule_id = str_field($data, "schedule_id"),
            error = str_field($data, "error"),
            "castflow event"
        )
    };
}

fn str_field<'a>(data: Option<&'a Value>, key: &str) -> Option<&'a str> {
    data.and_then(|d| d.get(key)).and_then(Value::as_str)
}

#[async_trait]
impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        let data = data.as_ref();
        match Self::level_for(event_type) {
            Level::WARN => log_event!(warn, event_type, data),
            Level::INFO => log_event!(info, event_type, data),
            _ => log_event!(debug, event_type, data),
        }
    }
}

/// One event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Event type, e.g. `step.attempt_failed`.
    pub event_type: String,
    /// Payload, if any.
    pub data: Option<Value>,
}

impl RecordedEvent {
    /// Returns one payload field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}

/// Keeps every event in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Returns the event types in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns events tagged with `run_id`.
    #[must_use]
    pub fn for_run(&self, run_id: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.field("run_id").and_then(Value::as_str) == Some(run_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
        });
    }
}
