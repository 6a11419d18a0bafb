use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use edaflow::flowgraph::{FlowGraph, Stage};
use edaflow::schema::Schema;

/// stage0 -> stage1 -> stage2 -> ...
/// Deepest possible graph for a given size
fn linear_pipeline(count: usize) -> Vec<Stage> {
    (0..count)
        .map(|i| {
            let inputs = if i == 0 {
                vec![]
            } else {
                vec![format!("stage{}", i - 1)]
            };
            let mut stage = Stage::new(format!("stage{}", i), inputs);
            stage.tool = Some("sh".to_string());
            stage
        })
        .collect()
}

/// Repeated fan-out/fan-in: one stage feeding four replicas of work that
/// merge back into a single stage
fn diamond_layers(layers: usize) -> Vec<Stage> {
    let mut stages = vec![Stage::new("stage0", vec![])];
    let mut join = "stage0".to_string();
    let mut counter = 1;

    for _ in 0..layers {
        let branches: Vec<String> = (0..4)
            .map(|_| {
                let name = format!("stage{}", counter);
                counter += 1;
                stages.push(Stage::new(name.clone(), vec![join.clone()]));
                name
            })
            .collect();
        join = format!("stage{}", counter);
        counter += 1;
        stages.push(Stage::new(join.clone(), branches));
    }
    stages
}

fn bench_getsteps(c: &mut Criterion) {
    let mut group = c.benchmark_group("getsteps");

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("linear", size), size, |b, &size| {
            let graph = FlowGraph::from_stages(linear_pipeline(size));
            b.iter(|| black_box(graph.getsteps()));
        });
        group.bench_with_input(BenchmarkId::new("diamond", size), size, |b, &size| {
            let graph = FlowGraph::from_stages(diamond_layers(size / 5));
            b.iter(|| black_box(graph.getsteps()));
        });
    }

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let graph = FlowGraph::from_stages(diamond_layers(size / 5));
            b.iter(|| black_box(graph.validate().is_ok()));
        });
    }

    group.finish();
}

fn bench_from_schema(c: &mut Criterion) {
    let mut group = c.benchmark_group("from_schema");

    for size in [10, 50].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut schema = Schema::new("top");
            for stage in linear_pipeline(size) {
                schema.set(["flowgraph", stage.name.as_str(), "tool"], "sh");
                for input in &stage.inputs {
                    schema.add(["flowgraph", stage.name.as_str(), "input"], input.as_str());
                }
            }
            b.iter(|| black_box(FlowGraph::from_schema(&schema).len()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_getsteps, bench_validate, bench_from_schema);
criterion_main!(benches);
