// Benchmarks for the collapse loop and room graph upkeep.
//
// `collapse_box` times a full collapse of a box of the demo catalog on a
// fresh map; `world_box` does the same through `World`, so the difference is
// the cost of spawn events and room graph synchronization.

use std::hint::black_box;
use std::sync::Arc;

use blockweave_gen::catalog::demo_catalog;
use blockweave_gen::config::GenerationConfig;
use blockweave_gen::map::{CollapseMap, CollapseOptions};
use blockweave_gen::types::Coord;
use blockweave_gen::world::World;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

fn bench_collapse(c: &mut Criterion) {
    let catalog = Arc::new(demo_catalog().unwrap());
    let config = GenerationConfig::default();
    let mut group = c.benchmark_group("collapse_box");
    for edge in [8, 16] {
        let size = Coord::new(edge, 6, edge);
        group.bench_with_input(BenchmarkId::from_parameter(edge), &size, |b, &size| {
            b.iter(|| {
                let mut map = CollapseMap::new(catalog.clone(), &config).unwrap();
                let report = map
                    .collapse_box(Coord::ZERO, size, &mut CollapseOptions::default())
                    .unwrap();
                black_box(report)
            });
        });
    }
    group.finish();
}

fn bench_world(c: &mut Criterion) {
    let catalog = Arc::new(demo_catalog().unwrap());
    c.bench_function("world_box_12", |b| {
        b.iter(|| {
            let mut world = World::new(catalog.clone(), GenerationConfig::default()).unwrap();
            world
                .collapse_box(
                    Coord::ZERO,
                    Coord::new(12, 6, 12),
                    &mut CollapseOptions::default(),
                )
                .unwrap();
            black_box(world.rooms().rooms().count())
        });
    });
}

criterion_group!(benches, bench_collapse, bench_world);
criterion_main!(benches);
