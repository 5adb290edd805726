//! The standard content-generation pipeline.
//!
//! research -> content_planning -> script_generation -> voice_synthesis ->
//! audio_production, each step calling an injected [`Collaborator`] through
//! the shared [`StepExecutor`]. When a research fallback is configured, a
//! failed research step is recorded as `error_info` and routed to it once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{GraphPipeline, Pipeline, INITIAL_REQUEST};
use crate::cache::{CachedCollaborator, TtlCache};
use crate::collaborator::Collaborator;
use crate::context::RunContext;
use crate::core::{JsonMap, PipelineState};
use crate::errors::{CastflowError, GraphValidationError};
use crate::events::EventSink;
use crate::graph::{ErrorRouter, GraphBuilder, DEFAULT_MAX_TRANSITIONS, END};
use crate::retry::{StepExecutor, ValidatorRegistry};
use crate::stages::{StepFailurePolicy, StepStage, FALLBACK_ATTEMPTED};

/// Step names, in pipeline order.
pub mod steps {
    /// Gathers source articles.
    pub const RESEARCH: &str = "research";
    /// Secondary research source.
    pub const RESEARCH_FALLBACK: &str = "research_fallback";
    /// Builds the episode outline.
    pub const CONTENT_PLANNING: &str = "content_planning";
    /// Writes the script.
    pub const SCRIPT_GENERATION: &str = "script_generation";
    /// Renders speech.
    pub const VOICE_SYNTHESIS: &str = "voice_synthesis";
    /// Mixes and encodes the final audio.
    pub const AUDIO_PRODUCTION: &str = "audio_production";
}

/// State fields written by each step.
pub mod fields {
    /// Output of research (or its fallback).
    pub const RESEARCH_RESULTS: &str = "research_results";
    /// Output of content planning.
    pub const CONTENT_PLAN: &str = "content_plan";
    /// Output of script generation.
    pub const SCRIPT_DATA: &str = "script_data";
    /// Output of voice synthesis.
    pub const VOICE_OUTPUT: &str = "voice_synthesis_output";
    /// Output of audio production.
    pub const FINAL_PODCAST: &str = "final_podcast_info";
}

/// Episode type used when neither the trigger nor the request names one.
pub const DEFAULT_EPISODE_TYPE: &str = "race_review";

/// What a `{sport}_{trigger}` event produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// When the episode is normally produced, e.g. `sunday+6h`.
    pub schedule: String,
    /// The episode type to generate.
    pub episode_type: String,
}

impl TriggerEvent {
    fn new(schedule: &str, episode_type: &str) -> Self {
        Self {
            schedule: schedule.to_string(),
            episode_type: episode_type.to_string(),
        }
    }
}

/// Trigger events keyed by `{sport}_{trigger}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerTable(BTreeMap<String, TriggerEvent>);

impl Default for TriggerTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert("f1_race".to_string(), TriggerEvent::new("sunday+6h", "race_review"));
        table.insert("motogp_race".to_string(), TriggerEvent::new("sunday+6h", "race_review"));
        table.insert(
            "f1_qualifying".to_string(),
            TriggerEvent::new("saturday+4h", "qualifying_analysis"),
        );
        table.insert("weekly_news".to_string(), TriggerEvent::new("thursday", "news_update"));
        Self(table)
    }
}

impl TriggerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds or replaces an event.
    #[must_use]
    pub fn with_event(mut self, key: impl Into<String>, event: TriggerEvent) -> Self {
        self.0.insert(key.into(), event);
        self
    }

    /// Looks up `{sport}_{trigger}`.
    #[must_use]
    pub fn get(&self, sport: &str, trigger: &str) -> Option<&TriggerEvent> {
        self.0.get(&format!("{sport}_{trigger}"))
    }

    /// Resolves the episode type for a run request.
    ///
    /// Non-manual triggers use the table; otherwise (or when the trigger is
    /// unknown) `custom_parameters.episode_type` applies, then the default.
    #[must_use]
    pub fn episode_type(&self, request: &JsonMap) -> String {
        let sport = str_field(request, "sport").unwrap_or("f1");
        let trigger = str_field(request, "trigger").unwrap_or("manual");

        if trigger != "manual" {
            if let Some(event) = self.get(sport, trigger) {
                return event.episode_type.clone();
            }
        }

        request
            .get("custom_parameters")
            .and_then(|c| c.get("episode_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_EPISODE_TYPE)
            .to_string()
    }
}

/// The external collaborators of the content pipeline.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Primary research source.
    pub research: Arc<dyn Collaborator>,
    /// Tried once when research fails.
    pub research_fallback: Option<Arc<dyn Collaborator>>,
    /// Episode planner.
    pub content_planning: Arc<dyn Collaborator>,
    /// Script writer.
    pub script_generation: Arc<dyn Collaborator>,
    /// Speech synthesizer.
    pub voice_synthesis: Arc<dyn Collaborator>,
    /// Audio producer.
    pub audio_production: Arc<dyn Collaborator>,
}

impl Collaborators {
    /// Sets the research fallback.
    #[must_use]
    pub fn with_research_fallback(mut self, fallback: Arc<dyn Collaborator>) -> Self {
        self.research_fallback = Some(fallback);
        self
    }

    /// Puts research (and its fallback) behind the TTL cache.
    ///
    /// Outputs are cached only once they pass `validators`, so a thin
    /// result is fetched again on retry.
    #[must_use]
    pub fn with_research_cache(
        mut self,
        cache: &Arc<TtlCache>,
        validators: &ValidatorRegistry,
        events: &Arc<dyn EventSink>,
    ) -> Self {
        let cached = |step: &str, inner: Arc<dyn Collaborator>| -> Arc<dyn Collaborator> {
            Arc::new(
                CachedCollaborator::new(step, inner, cache.clone())
                    .with_validators(validators.clone())
                    .with_events(events.clone()),
            )
        };
        self.research = cached(steps::RESEARCH, self.research);
        self.research_fallback = self
            .research_fallback
            .map(|fallback| cached(steps::RESEARCH_FALLBACK, fallback));
        self
    }
}

/// The content-generation pipeline.
#[derive(Debug, Clone)]
pub struct ContentPipeline {
    inner: GraphPipeline,
    triggers: Arc<TriggerTable>,
}

impl ContentPipeline {
    /// Builds the pipeline with the default trigger table.
    ///
    /// # Errors
    ///
    /// Returns a graph error if the wiring fails to compile.
    pub fn new(collaborators: Collaborators, executor: Arc<StepExecutor>) -> Result<Self, GraphValidationError> {
        Self::with_options(collaborators, executor, TriggerTable::default(), DEFAULT_MAX_TRANSITIONS)
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a graph error if the wiring fails to compile.
    pub fn with_options(
        collaborators: Collaborators,
        executor: Arc<StepExecutor>,
        triggers: TriggerTable,
        max_transitions: usize,
    ) -> Result<Self, GraphValidationError> {
        let triggers = Arc::new(triggers);
        let custom = |step: &'static str| {
            move |request: &JsonMap| -> Value {
                request
                    .get("custom_parameters")
                    .and_then(|c| c.get(step))
                    .cloned()
                    .unwrap_or_else(|| json!({}))
            }
        };

        let research_input = {
            let triggers = triggers.clone();
            move |state: &PipelineState| -> Result<JsonMap, String> {
                let request = initial_request(state);
                let episode_type = triggers.episode_type(&request);
                let event_type = episode_type.replace("_review", "").replace("_analysis", "");
                let force_refresh = request
                    .get("custom_parameters")
                    .and_then(|c| c.get(steps::RESEARCH))
                    .and_then(|r| r.get("force_refresh"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(object(json!({
                    "sport": str_field(&request, "sport").unwrap_or("f1"),
                    "event_type": event_type,
                    "event_id": request.get("event_id").cloned().unwrap_or(Value::Null),
                    "force_refresh": force_refresh,
                })))
            }
        };

        let planning_input = {
            let triggers = triggers.clone();
            let params = custom(steps::CONTENT_PLANNING);
            move |state: &PipelineState| -> Result<JsonMap, String> {
                let research = require(state, fields::RESEARCH_RESULTS, "Research results")?;
                let request = initial_request(state);
                Ok(object(json!({
                    "research_data": research,
                    "episode_type": triggers.episode_type(&request),
                    "custom_parameters": params(&request),
                })))
            }
        };

        let script_input = {
            let params = custom(steps::SCRIPT_GENERATION);
            move |state: &PipelineState| -> Result<JsonMap, String> {
                let plan = require(state, fields::CONTENT_PLAN, "Content plan")?;
                Ok(object(json!({
                    "content_outline": plan,
                    "custom_parameters": params(&initial_request(state)),
                })))
            }
        };

        let voice_input = {
            let params = custom(steps::VOICE_SYNTHESIS);
            move |state: &PipelineState| -> Result<JsonMap, String> {
                let script = require(state, fields::SCRIPT_DATA, "Script data")?;
                Ok(object(json!({
                    "script": script,
                    "custom_parameters": params(&initial_request(state)),
                })))
            }
        };

        let audio_input = {
            let params = custom(steps::AUDIO_PRODUCTION);
            move |state: &PipelineState| -> Result<JsonMap, String> {
                let voice = require(state, fields::VOICE_OUTPUT, "Voice synthesis output")?;
                let script = require(state, fields::SCRIPT_DATA, "Script data")?;
                Ok(object(json!({
                    "audio_metadata": voice,
                    "script": script,
                    "custom_parameters": params(&initial_request(state)),
                })))
            }
        };

        let step = |name: &str, field: &str, collaborator: &Arc<dyn Collaborator>| {
            StepStage::new(name, field, collaborator.clone(), executor.clone())
        };

        let research_policy = if collaborators.research_fallback.is_some() {
            StepFailurePolicy::RecordError
        } else {
            StepFailurePolicy::Fatal
        };

        let mut builder = GraphBuilder::new("content")
            .with_max_transitions(max_transitions)
            .add_stage(
                steps::RESEARCH,
                Arc::new(
                    step(steps::RESEARCH, fields::RESEARCH_RESULTS, &collaborators.research)
                        .with_input(research_input.clone())
                        .on_failure(research_policy),
                ),
            )
            .add_stage(
                steps::CONTENT_PLANNING,
                Arc::new(
                    step(steps::CONTENT_PLANNING, fields::CONTENT_PLAN, &collaborators.content_planning)
                        .with_input(planning_input),
                ),
            )
            .add_stage(
                steps::SCRIPT_GENERATION,
                Arc::new(
                    step(steps::SCRIPT_GENERATION, fields::SCRIPT_DATA, &collaborators.script_generation)
                        .with_input(script_input),
                ),
            )
            .add_stage(
                steps::VOICE_SYNTHESIS,
                Arc::new(
                    step(steps::VOICE_SYNTHESIS, fields::VOICE_OUTPUT, &collaborators.voice_synthesis)
                        .with_input(voice_input),
                ),
            )
            .add_stage(
                steps::AUDIO_PRODUCTION,
                Arc::new(
                    step(steps::AUDIO_PRODUCTION, fields::FINAL_PODCAST, &collaborators.audio_production)
                        .with_input(audio_input),
                ),
            )
            .set_entry(steps::RESEARCH)
            .add_sequence(&[
                steps::CONTENT_PLANNING,
                steps::SCRIPT_GENERATION,
                steps::VOICE_SYNTHESIS,
                steps::AUDIO_PRODUCTION,
            ])
            .add_edge(steps::AUDIO_PRODUCTION, END);

        builder = match &collaborators.research_fallback {
            Some(fallback) => builder
                .add_stage(
                    steps::RESEARCH_FALLBACK,
                    Arc::new(
                        step(steps::RESEARCH_FALLBACK, fields::RESEARCH_RESULTS, fallback)
                            .with_input(research_input)
                            .on_failure(StepFailurePolicy::RecordError)
                            .as_fallback(),
                    ),
                )
                .add_conditional_edge(
                    steps::RESEARCH,
                    Arc::new(ErrorRouter::new().unless(FALLBACK_ATTEMPTED)),
                    [
                        (ErrorRouter::OK, steps::CONTENT_PLANNING),
                        (ErrorRouter::ERROR, steps::RESEARCH_FALLBACK),
                    ],
                )
                .add_edge(steps::RESEARCH_FALLBACK, steps::CONTENT_PLANNING),
            None => builder.add_edge(steps::RESEARCH, steps::CONTENT_PLANNING),
        };

        let inner = GraphPipeline::new(builder.compile()?).with_summary(summarize);
        Ok(Self { inner, triggers })
    }

    /// Returns the trigger table.
    #[must_use]
    pub fn triggers(&self) -> &TriggerTable {
        &self.triggers
    }

    /// Returns the underlying graph pipeline.
    #[must_use]
    pub fn graph_pipeline(&self) -> &GraphPipeline {
        &self.inner
    }
}

#[async_trait]
impl Pipeline for ContentPipeline {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute(&self, input: &JsonMap, ctx: &RunContext) -> Result<JsonMap, CastflowError> {
        self.inner.execute(input, ctx).await
    }
}

/// Builds the run result from the final state.
fn summarize(state: &PipelineState) -> JsonMap {
    let script = state.get(fields::SCRIPT_DATA);
    let audio = state.get(fields::FINAL_PODCAST);
    let request = initial_request(state);

    let mut step_outputs = JsonMap::new();
    for (step, field) in [
        (steps::RESEARCH, fields::RESEARCH_RESULTS),
        (steps::CONTENT_PLANNING, fields::CONTENT_PLAN),
        (steps::SCRIPT_GENERATION, fields::SCRIPT_DATA),
        (steps::VOICE_SYNTHESIS, fields::VOICE_OUTPUT),
        (steps::AUDIO_PRODUCTION, fields::FINAL_PODCAST),
    ] {
        if let Some(value) = state.get(field) {
            step_outputs.insert(step.to_string(), value.clone());
        }
    }

    object(json!({
        "sport": request.get("sport").cloned().unwrap_or(Value::Null),
        "title": script.and_then(|s| s.get("title")).cloned().unwrap_or_else(|| json!("Untitled Episode")),
        "description": script.and_then(|s| s.get("description")).cloned().unwrap_or_else(|| json!("")),
        "audio_files": audio.and_then(|a| a.get("output_files")).cloned().unwrap_or_else(|| json!([])),
        "duration": audio.and_then(|a| a.get("duration")).cloned().unwrap_or_else(|| json!(0)),
        "used_fallback": state.contains(FALLBACK_ATTEMPTED),
        "pipeline_data": step_outputs,
    }))
}

fn initial_request(state: &PipelineState) -> JsonMap {
    state
        .get(INITIAL_REQUEST)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn require(state: &PipelineState, field: &str, what: &str) -> Result<Value, String> {
    match state.get(field) {
        Some(Value::Null) | None => Err(format!("{what} not found in state.")),
        Some(value) => Ok(value.clone()),
    }
}

fn str_field<'a>(map: &'a JsonMap, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}
