//! Benchmarks for graph execution overhead.

use castflow::core::{Patch, PipelineState};
use castflow::graph::{CompiledGraph, GraphBuilder, END};
use castflow::stages::{FnStage, NoOpStage};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;

fn chain(len: usize) -> CompiledGraph {
    let names: Vec<String> = (0..len).map(|i| format!("stage_{i}")).collect();
    let mut builder = GraphBuilder::new("bench");
    for name in &names {
        builder = builder.add_stage(name.as_str(), Arc::new(NoOpStage::new(name.as_str())));
    }
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    builder
        .set_entry(refs[0])
        .add_sequence(&refs)
        .add_edge(refs[len - 1], END)
        .compile()
        .expect("bench graph compiles")
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    let noop = chain(5);
    c.bench_function("noop_chain_5", |b| {
        b.iter(|| runtime.block_on(noop.run(black_box(PipelineState::new()))))
    });

    let merging = GraphBuilder::new("merge")
        .add_stage(
            "write",
            Arc::new(FnStage::new("write", |_: &PipelineState| {
                Patch::empty().set("articles", json!(["a", "b", "c"]))
            })),
        )
        .set_entry("write")
        .add_edge("write", END)
        .compile()
        .expect("bench graph compiles");
    c.bench_function("single_patch_merge", |b| {
        b.iter(|| runtime.block_on(merging.run(black_box(PipelineState::new()))))
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
