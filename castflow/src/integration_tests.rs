//! Cross-module behaviour: registry, executor, retry wrapper, cache and
//! scheduler working together.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CachedCollaborator, TtlCache};
use crate::collaborator::Collaborator;
use crate::context::RunContext;
use crate::core::{Patch, PipelineState, RunStatus, StepStatus};
use crate::errors::CastflowError;
use crate::graph::{FnRouter, GraphBuilder, END};
use crate::pipelines::{Collaborators, ContentPipeline, GraphPipeline, INITIAL_REQUEST};
use crate::retry::{QualityThresholds, RetryConfig, StepExecutor, ValidatorRegistry};
use crate::runs::{InMemoryRunStore, RunFilter, RunRegistry};
use crate::scheduler::Scheduler;
use crate::stages::FnStage;
use crate::testing::{assert_error_contains, assert_missing, json_map, RecordingStage, ScriptedCollaborator};
use crate::utils::{Clock, ManualClock};

fn content_collaborators(research: Arc<ScriptedCollaborator>) -> Collaborators {
    let ok = |name: &str, out: Value| Arc::new(ScriptedCollaborator::succeeding(name, json_map(out)));
    Collaborators {
        research,
        research_fallback: None,
        content_planning: ok("planner", json!({"segments": ["intro", "recap"]})),
        script_generation: ok("writer", json!({"title": "Sprint Recap", "word_count": 1800})),
        voice_synthesis: ok("tts", json!({"segments": 2})),
        audio_production: ok("mixer", json!({"output_files": ["recap.mp3"], "duration": 1500})),
    }
}

#[tokio::test]
async fn cache_entries_expire_after_ttl() {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = Arc::new(TtlCache::in_memory(3600).with_clock(clock.clone()));
    let inner = Arc::new(ScriptedCollaborator::succeeding("search", json_map(json!({"articles": ["a"]}))));
    let cached = CachedCollaborator::new("research", inner.clone(), cache.clone()).with_ttl(10);
    let input = json_map(json!({"sport": "f1"}));

    cached.run(input.clone()).await.unwrap();
    clock.advance_secs(9);
    cached.run(input.clone()).await.unwrap();
    assert_eq!(inner.calls(), 1);

    clock.advance_secs(1);
    cached.run(input).await.unwrap();
    assert_eq!(inner.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_makes_exactly_max_attempts_calls() {
    for n in 1..=4 {
        let collaborator = ScriptedCollaborator::always_failing("search", "timeout");
        let executor = StepExecutor::new(RetryConfig::new().with_max_attempts(n), ValidatorRegistry::new());

        let err = executor
            .execute("research", &collaborator, json_map(json!({})), &RunContext::detached())
            .await
            .unwrap_err();

        assert_eq!(collaborator.calls(), n);
        match err {
            CastflowError::StepFailed(failed) => {
                assert_eq!(failed.attempts, n);
                assert_eq!(failed.last_error, "timeout");
            }
            other => panic!("expected StepFailed, got {other}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_at_least_exponentially() {
    let journal = Arc::new(crate::context::MemoryJournal::new());
    let ctx = RunContext::detached().with_journal(journal.clone());
    let collaborator = ScriptedCollaborator::always_failing("search", "rate limited");
    let executor = StepExecutor::new(RetryConfig::new().with_max_attempts(5), ValidatorRegistry::new());

    let started = tokio::time::Instant::now();
    let _ = executor.execute("research", &collaborator, crate::core::JsonMap::new(), &ctx).await;
    let elapsed = started.elapsed();

    let delays: Vec<u64> = journal.attempts().iter().filter_map(|a| a.backoff_ms).collect();
    assert_eq!(delays.len(), 4);
    for (i, delay) in delays.iter().enumerate() {
        assert!(*delay >= 1000 * 2u64.pow(u32::try_from(i).unwrap() + 1), "delay {i} was {delay} ms");
    }
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(elapsed >= Duration::from_millis(delays.iter().sum()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ticks_start_each_entry_once() {
    let pipeline = GraphPipeline::new(
        GraphBuilder::new("echo")
            .add_stage("echo", Arc::new(RecordingStage::new("echo", Patch::empty())))
            .set_entry("echo")
            .add_edge("echo", END)
            .compile()
            .unwrap(),
    );
    let registry = Arc::new(RunRegistry::new(Arc::new(pipeline), Arc::new(InMemoryRunStore::new())));
    let clock = Arc::new(ManualClock::starting_now());
    let scheduler = Arc::new(Scheduler::new(registry.clone()).with_clock(clock.clone()));

    for i in 0..40 {
        scheduler.schedule(json_map(json!({"sport": "f1", "slot": i})), clock.now());
    }

    let ticks: Vec<_> = (0..6)
        .map(|_| {
            let scheduler = scheduler.clone();
            tokio::task::spawn_blocking(move || scheduler.tick().len())
        })
        .collect();
    let mut fired = 0;
    for tick in ticks {
        fired += tick.await.unwrap();
    }

    assert_eq!(fired, 40);
    let records = registry.wait_all().await;
    assert_eq!(records.len(), 40);
    assert!(records.iter().all(|r| r.status == RunStatus::Completed));
    assert_eq!(scheduler.pending_count(), 0);
}

#[tokio::test]
async fn downstream_stages_skip_after_error() {
    let a = Arc::new(FnStage::new("a", |_: &PipelineState| Patch::error("a failed: no data")));
    let b = Arc::new(RecordingStage::conforming("b", Patch::empty().set("b_out", json!(1))));
    let c = Arc::new(RecordingStage::conforming("c", Patch::empty().set("c_out", json!(1))));

    let graph = GraphBuilder::new("skip")
        .add_stage("a", a)
        .add_stage("b", b.clone())
        .add_stage("c", c.clone())
        .set_entry("a")
        .add_sequence(&["a", "b", "c"])
        .add_edge("c", END)
        .compile()
        .unwrap();

    let state = graph.run(PipelineState::new()).await.unwrap();

    assert_error_contains(&state, "a failed");
    assert_eq!(b.call_count(), 1);
    assert_eq!(c.call_count(), 1);
    assert_missing(&state, "b_out");
    assert_missing(&state, "c_out");
}

#[tokio::test]
async fn router_picks_fallback_for_empty_items() {
    let build = |items: Value| {
        let fallback = Arc::new(RecordingStage::new("fallback", Patch::empty().set("items", json!(["y"]))));
        let process = Arc::new(RecordingStage::new("process", Patch::empty().set("processed", json!(true))));
        let router = FnRouter::new(["empty", "found"], |state: &PipelineState| {
            let empty = state
                .get("items")
                .and_then(Value::as_array)
                .map_or(true, Vec::is_empty);
            (if empty { "empty" } else { "found" }).to_string()
        });
        let graph = GraphBuilder::new("route")
            .add_stage(
                "fetch",
                Arc::new(FnStage::new("fetch", move |_: &PipelineState| {
                    Patch::empty().set("items", items.clone())
                })),
            )
            .add_stage("fallback", fallback.clone())
            .add_stage("process", process.clone())
            .set_entry("fetch")
            .add_conditional_edge("fetch", Arc::new(router), [("empty", "fallback"), ("found", "process")])
            .add_edge("fallback", "process")
            .add_edge("process", END)
            .compile()
            .unwrap();
        (graph, fallback, process)
    };

    let (graph, fallback, process) = build(json!([]));
    let state = graph.run(PipelineState::new()).await.unwrap();
    assert_eq!(fallback.call_count(), 1);
    assert_eq!(process.call_count(), 1);
    assert_eq!(state.get("items"), Some(&json!(["y"])));

    let (graph, fallback, process) = build(json!(["x"]));
    let state = graph.run(PipelineState::new()).await.unwrap();
    assert_eq!(fallback.call_count(), 0);
    assert_eq!(process.call_count(), 1);
    assert_eq!(state.get("items"), Some(&json!(["x"])));
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_do_not_share_state() {
    let graph = GraphBuilder::new("isolated")
        .add_stage(
            "tag",
            Arc::new(FnStage::new("tag", |state: &PipelineState| {
                let sport = state
                    .get(INITIAL_REQUEST)
                    .and_then(|r| r.get("sport"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Patch::empty().set("tagged", sport)
            })),
        )
        .add_stage("wait", Arc::new(crate::testing::SlowStage::new("wait", Duration::from_millis(50))))
        .set_entry("tag")
        .add_sequence(&["tag", "wait"])
        .add_edge("wait", END)
        .compile()
        .unwrap();
    let registry = RunRegistry::new(Arc::new(GraphPipeline::new(graph)), Arc::new(InMemoryRunStore::new()));

    let f1 = registry.create_run(json_map(json!({"sport": "f1"}))).unwrap();
    let motogp = registry.create_run(json_map(json!({"sport": "motogp"}))).unwrap();
    registry.wait_all().await;

    let f1 = registry.get_status(&f1).unwrap();
    let motogp = registry.get_status(&motogp).unwrap();
    assert_ne!(f1.run_id, motogp.run_id);
    assert_eq!(f1.input, json_map(json!({"sport": "f1"})));
    assert_eq!(motogp.input, json_map(json!({"sport": "motogp"})));
    assert_eq!(f1.result.unwrap()["tagged"], json!("f1"));
    assert_eq!(motogp.result.unwrap()["tagged"], json!("motogp"));
    assert_eq!(f1.stage_path, vec!["tag".to_string(), "wait".to_string()]);
    assert_eq!(registry.list_runs(10, &RunFilter::sport("motogp")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn research_recovers_after_two_failures() {
    let research = Arc::new(ScriptedCollaborator::failing_then(
        "search",
        2,
        json_map(json!({"articles": ["a", "b", "c", "d", "e"]})),
    ));
    let executor = Arc::new(StepExecutor::new(
        RetryConfig::new().with_max_attempts(3),
        QualityThresholds::default().validators(),
    ));
    let pipeline = ContentPipeline::new(content_collaborators(research.clone()), executor).unwrap();
    let registry = RunRegistry::new(Arc::new(pipeline), Arc::new(InMemoryRunStore::new()));

    let started = tokio::time::Instant::now();
    let run_id = registry.create_run(json_map(json!({"sport": "f1"}))).unwrap();
    let record = registry.wait(&run_id).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed, "error: {:?}", record.error);
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert_eq!(research.calls(), 3);

    let attempts = record.attempts_for("research");
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|a| a.status).collect::<Vec<_>>(),
        vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Completed]
    );
    assert_eq!(record.pipeline_data["research"].status, StepStatus::Completed);
    assert_eq!(record.result.unwrap()["title"], json!("Sprint Recap"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_step_fails_the_run() {
    let research = Arc::new(ScriptedCollaborator::always_failing("search", "search API down"));
    let executor = Arc::new(StepExecutor::new(RetryConfig::new().with_max_attempts(2), ValidatorRegistry::new()));
    let pipeline = ContentPipeline::new(content_collaborators(research), executor).unwrap();
    let registry = RunRegistry::new(Arc::new(pipeline), Arc::new(InMemoryRunStore::new()));

    let run_id = registry.create_run(json_map(json!({"sport": "motogp"}))).unwrap();
    let record = registry.wait(&run_id).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(
        record.error.as_deref(),
        Some("Step research failed after 2 attempts: search API down")
    );
    assert_eq!(record.pipeline_data["research"].status, StepStatus::Failed);
    assert_eq!(record.stage_path, vec!["research".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_backoff_stops_the_run() {
    let research = Arc::new(ScriptedCollaborator::always_failing("search", "timeout"));
    let executor = Arc::new(StepExecutor::new(RetryConfig::new().with_max_attempts(3), ValidatorRegistry::new()));
    let pipeline = ContentPipeline::new(content_collaborators(research.clone()), executor).unwrap();
    let registry = RunRegistry::new(Arc::new(pipeline), Arc::new(InMemoryRunStore::new()));

    let run_id = registry.create_run(json_map(json!({"sport": "f1"}))).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    registry.cancel(&run_id, "Cancelled by user").unwrap();

    let record = registry.wait(&run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(research.calls(), 1);
}
