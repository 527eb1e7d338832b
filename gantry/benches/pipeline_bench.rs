//! Benchmarks for graph building and scheduling.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gantry::artifacts::InMemoryArtifactStore;
use gantry::cancellation::CancellationToken;
use gantry::core::JobDefinition;
use gantry::executor::{Scheduler, SchedulerOptions};
use gantry::graph::GraphBuilder;
use gantry::testing::{independent_jobs, ScriptedRunner};
use std::sync::Arc;

/// A layered graph: every job in a layer needs every job in the layer below.
fn layered_jobs(layers: usize, width: usize) -> Vec<JobDefinition> {
    let mut jobs = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for i in 0..width {
            let mut job = JobDefinition::shell(format!("l{layer}-{i}"), "true", Vec::<String>::new());
            if layer > 0 {
                for dep in 0..width {
                    job = job.needs(format!("l{}-{dep}", layer - 1));
                }
            }
            jobs.push(job);
        }
    }
    jobs
}

fn graph_benchmark(c: &mut Criterion) {
    let jobs = layered_jobs(10, 10);
    c.bench_function("graph_build_100_layered", |b| {
        b.iter(|| {
            let graph = GraphBuilder::new("bench").jobs(black_box(jobs.clone())).build();
            black_box(graph)
        });
    });
}

fn scheduler_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let graph = Arc::new(GraphBuilder::new("bench").jobs(independent_jobs(64)).build().expect("graph"));
    let layered = Arc::new(GraphBuilder::new("bench").jobs(layered_jobs(8, 8)).build().expect("graph"));

    for (name, graph) in [("schedule_64_independent", graph), ("schedule_64_layered", layered)] {
        c.bench_function(name, |b| {
            b.iter(|| {
                rt.block_on(async {
                    let scheduler = Scheduler::new(
                        Arc::clone(&graph),
                        Arc::new(ScriptedRunner::new()),
                        Arc::new(InMemoryArtifactStore::new()),
                    )
                    .with_options(SchedulerOptions::default().with_concurrency(8));
                    let mut run = scheduler.new_run("bench", "main");
                    scheduler
                        .execute(&mut run, Arc::new(CancellationToken::new()))
                        .await
                        .expect("run");
                    black_box(run)
                })
            });
        });
    }
}

criterion_group!(benches, graph_benchmark, scheduler_benchmark);
criterion_main!(benches);
