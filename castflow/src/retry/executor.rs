//! The retry/validate wrapper around collaborator calls.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{RetryConfig, RetryDecision, ValidatorRegistry};
use crate::collaborator::Collaborator;
use crate::context::RunContext;
use crate::core::{JsonMap, StepStatus};
use crate::errors::{CastflowError, StepFailed};
use crate::events::names;
use crate::runs::{StepAttempt, StepOutcome};
use crate::utils::{Clock, SystemClock};

/// Runs steps with bounded retries, backoff and quality gates.
///
/// Built once per pipeline type and shared by every step stage.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    config: RetryConfig,
    validators: ValidatorRegistry,
    clock: Arc<dyn Clock>,
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default(), ValidatorRegistry::new())
    }
}

impl StepExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(config: RetryConfig, validators: ValidatorRegistry) -> Self {
        Self {
            config,
            validators,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used to timestamp attempts.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the validators.
    #[must_use]
    pub fn validators(&self) -> &ValidatorRegistry {
        &self.validators
    }

    /// Calls `collaborator` until it yields valid output or attempts run out.
    ///
    /// Every attempt is recorded in the run journal. Backoff delays are
    /// cancelled early when the run is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CastflowError::StepFailed`] once every attempt has failed,
    /// or [`CastflowError::Cancelled`] if the run is cancelled first.
    pub async fn execute(
        &self,
        step_name: &str,
        collaborator: &dyn Collaborator,
        input: JsonMap,
        ctx: &RunContext,
    ) -> Result<JsonMap, CastflowError> {
        let attempts = self.config.attempts();

        for attempt in 0..attempts {
            if ctx.is_cancelled() {
                return Err(cancelled(ctx));
            }

            debug!(run_id = ctx.run_id(), step = step_name, attempt = attempt + 1, "Running step");
            let (status, error) = match collaborator.run(input.clone()).await {
                Ok(output) => match output_error(&output) {
                    Some(message) => (StepStatus::Failed, message),
                    None => match self.validators.check(step_name, &output) {
                        Ok(()) => {
                            self.record_success(step_name, attempt, ctx);
                            return Ok(output);
                        }
                        Err(message) => {
                            (StepStatus::Invalid, format!("Validation failed: {message}"))
                        }
                    },
                },
                Err(e) => (StepStatus::Failed, format!("{e:#}")),
            };

            let decision = self.config.decide(attempt);
            let backoff = match decision {
                RetryDecision::Retry(delay) => Some(delay),
                RetryDecision::GiveUp => None,
            };

            ctx.journal().step_attempt(StepAttempt {
                step_name: step_name.to_string(),
                attempt: attempt + 1,
                status,
                timestamp: self.clock.now(),
                error: Some(error.clone()),
                backoff_ms: backoff.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            });
            ctx.emit(
                names::STEP_ATTEMPT_FAILED,
                json!({"step": step_name, "attempt": attempt + 1, "status": status, "error": error}),
            );

            let Some(delay) = backoff else {
                return Err(self.exhausted(step_name, attempt + 1, error, ctx));
            };

            warn!(
                run_id = ctx.run_id(),
                step = step_name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Step attempt failed, retrying"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancellation().cancelled() => return Err(cancelled(ctx)),
            }
        }

        // Unreachable: the final iteration always returns via `decide`.
        Err(self.exhausted(step_name, attempts, "no attempts made".to_string(), ctx))
    }

    fn record_success(&self, step_name: &str, attempt: usize, ctx: &RunContext) {
        let now = self.clock.now();
        ctx.journal().step_attempt(StepAttempt {
            step_name: step_name.to_string(),
            attempt: attempt + 1,
            status: StepStatus::Completed,
            timestamp: now,
            error: None,
            backoff_ms: None,
        });
        ctx.journal().step_finished(
            step_name,
            StepOutcome {
                status: StepStatus::Completed,
                timestamp: now,
                error: None,
            },
        );
        ctx.emit(names::STEP_SUCCEEDED, json!({"step": step_name, "attempt": attempt + 1}));
        info!(run_id = ctx.run_id(), step = step_name, attempt = attempt + 1, "Step completed");
    }

    fn exhausted(
        &self,
        step_name: &str,
        attempts: usize,
        last_error: String,
        ctx: &RunContext,
    ) -> CastflowError {
        ctx.journal().step_finished(
            step_name,
            StepOutcome {
                status: StepStatus::Failed,
                timestamp: self.clock.now(),
                error: Some(last_error.clone()),
            },
        );
        ctx.emit(
            names::STEP_EXHAUSTED,
            json!({"step": step_name, "attempts": attempts, "error": last_error}),
        );
        warn!(run_id = ctx.run_id(), step = step_name, attempts, error = %last_error, "Step exhausted its attempts");
        StepFailed::new(step_name, attempts, last_error).into()
    }
}

/// Returns the message of an `error` field in collaborator output.
fn output_error(output: &JsonMap) -> Option<String> {
    match output.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn cancelled(ctx: &RunContext) -> CastflowError {
    CastflowError::Cancelled(
        ctx.cancellation()
            .reason()
            .unwrap_or_else(|| "cancelled".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryJournal;
    use crate::events::CollectingEventSink;
    use crate::retry::MinItems;
    use crate::testing::{json_map, Reply, ScriptedCollaborator};
    use std::time::Duration;
    use tokio::time::Instant;

    fn context() -> (RunContext, Arc<MemoryJournal>, Arc<CollectingEventSink>) {
        let journal = Arc::new(MemoryJournal::new());
        let events = Arc::new(CollectingEventSink::new());
        let ctx = RunContext::detached()
            .with_journal(journal.clone())
            .with_events(events.clone());
        (ctx, journal, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_try() {
        let (ctx, journal, events) = context();
        let collab = ScriptedCollaborator::succeeding("plan", json_map(json!({"segments": 3})));

        let out = StepExecutor::default()
            .execute("content_planning", &collab, JsonMap::new(), &ctx)
            .await
            .unwrap();

        assert_eq!(out["segments"], json!(3));
        assert_eq!(collab.calls(), 1);
        assert_eq!(journal.attempts().len(), 1);
        assert_eq!(journal.outcomes()["content_planning"].status, StepStatus::Completed);
        assert_eq!(events.event_types(), vec![names::STEP_SUCCEEDED.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_makes_exactly_max_attempts() {
        let (ctx, journal, _) = context();
        let collab = ScriptedCollaborator::always_failing("research", "search API down");
        let executor = StepExecutor::new(RetryConfig::new().with_max_attempts(4), ValidatorRegistry::new());

        let err = executor
            .execute("research", &collab, JsonMap::new(), &ctx)
            .await
            .unwrap_err();

        assert_eq!(collab.calls(), 4);
        match err {
            CastflowError::StepFailed(failed) => {
                assert_eq!(failed.step_name, "research");
                assert_eq!(failed.attempts, 4);
                assert_eq!(failed.last_error, "search API down");
            }
            other => panic!("unexpected error: {other}"),
        }

        let attempts = journal.attempts();
        assert_eq!(attempts.len(), 4);
        assert_eq!(
            attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(attempts[3].backoff_ms, None);
        assert_eq!(journal.outcomes()["research"].status, StepStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows() {
        let (ctx, journal, _) = context();
        let collab = ScriptedCollaborator::failing_then("research", 3, JsonMap::new());
        let executor = StepExecutor::new(RetryConfig::new().with_max_attempts(4), ValidatorRegistry::new());

        let start = Instant::now();
        executor
            .execute("research", &collab, JsonMap::new(), &ctx)
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2 + 4 + 8));
        let delays: Vec<u64> = journal.attempts().iter().filter_map(|a| a.backoff_ms).collect();
        assert_eq!(delays, vec![2000, 4000, 8000]);
        for (attempt, delay) in delays.iter().enumerate() {
            assert!(*delay >= 1000 * 2u64.pow(attempt as u32));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_field_counts_as_failure() {
        let (ctx, journal, _) = context();
        let collab = ScriptedCollaborator::new(
            "tts",
            vec![
                Reply::ErrorField("voice not found".to_string()),
                Reply::Ok(json_map(json!({"audio_file": "a.mp3"}))),
            ],
        );

        let out = StepExecutor::default()
            .execute("voice_synthesis", &collab, JsonMap::new(), &ctx)
            .await
            .unwrap();

        assert_eq!(out["audio_file"], json!("a.mp3"));
        let attempts = journal.attempts();
        assert_eq!(attempts[0].status, StepStatus::Failed);
        assert_eq!(attempts[0].error.as_deref(), Some("voice not found"));
        assert_eq!(attempts[1].status, StepStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_is_retried() {
        let (ctx, journal, _) = context();
        let collab = ScriptedCollaborator::new(
            "research",
            vec![
                Reply::Ok(json_map(json!({"articles": [1]}))),
                Reply::Ok(json_map(json!({"articles": [1, 2]}))),
            ],
        );
        let validators =
            ValidatorRegistry::new().with("research", MinItems::new("articles", 2, "research sources"));
        let executor = StepExecutor::new(RetryConfig::default(), validators);

        executor
            .execute("research", &collab, JsonMap::new(), &ctx)
            .await
            .unwrap();

        let attempts = journal.attempts();
        assert_eq!(attempts[0].status, StepStatus::Invalid);
        assert_eq!(
            attempts[0].error.as_deref(),
            Some("Validation failed: Insufficient research sources: 1 < 2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let (ctx, journal, _) = context();
        let collab = ScriptedCollaborator::always_failing("research", "down");
        let executor = StepExecutor::default();

        let canceller = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                ctx.cancellation().cancel("user request");
            })
        };

        let start = Instant::now();
        let err = executor
            .execute("research", &collab, JsonMap::new(), &ctx)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, CastflowError::Cancelled(ref reason) if reason == "user request"));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(collab.calls(), 1);
        assert_eq!(journal.attempts().len(), 1);
    }
}
