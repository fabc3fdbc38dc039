//! Simulation benchmarks for warband_core.
//!
//! Run with: `cargo bench -p warband_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use warband_core::prelude::*;
use warband_core::spatial::{Snapshot, SpatialIndex};
use warband_test_utils::fixtures::{skirmish, Autopilot};

const POPULATIONS: [u32; 3] = [64, 256, 1024];

/// Spatial index rebuild over a dense army.
pub fn index_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_rebuild");
    for per_side in POPULATIONS {
        let sim = skirmish(SimulationConfig::default(), per_side);
        let snapshot = Snapshot::from_agents(sim.agents().iter().map(|a| a.snapshot()));
        let mut index = SpatialIndex::new(sim.config().cell_size, sim.config().query_capacity);

        group.bench_with_input(
            BenchmarkId::from_parameter(per_side * 2),
            &snapshot,
            |b, snapshot| {
                b.iter(|| {
                    index.rebuild(black_box(snapshot));
                    black_box(index.len())
                });
            },
        );
    }
    group.finish();
}

/// Full tick, after the armies have closed and are fighting.
pub fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for per_side in POPULATIONS {
        for parallel in [false, true] {
            let mut sim = skirmish(SimulationConfig::default().with_parallel(parallel), per_side);
            let mut pilot = Autopilot::new();
            pilot.run(&mut sim, 100);

            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_function(BenchmarkId::new(label, per_side * 2), |b| {
                b.iter_batched(
                    || (sim.clone(), pilot.clone()),
                    |(mut sim, mut pilot)| black_box(pilot.step(&mut sim)),
                    BatchSize::SmallInput,
                );
            });
        }
    }
    group.finish();
}

criterion_group!(benches, index_benchmark, tick_benchmark);
criterion_main!(benches);
