//! Scalability benchmarks for the driving simulator
//!
//! Synthetic multi-lane scenes at various car counts.
//!
//! Run with: cargo bench --bench scalability

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use drive_sim::config::SimConfig;
use drive_sim::sim::action::{ActionBatch, ActionMode, Control};
use drive_sim::sim::constants::planner::TRAJECTORY_PARAMS;
use drive_sim::sim::entity::EntityKind;
use drive_sim::sim::map::{MapBuilder, MapData, VehicleSpec};
use drive_sim::sim::spatial::{GridParams, RoadIndex};
use drive_sim::sim::Simulation;
use drive_sim::util::vec2::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LANE_SPACING: f32 = 8.0;
const ROAD_LENGTH: f32 = 400.0;

/// Parallel lanes bounded by edges, `cars` vehicles spread over them
fn create_scene(cars: usize) -> MapData {
    let mut rng = StdRng::seed_from_u64(7);
    let lanes = cars.div_ceil(8).max(1);
    let mut builder = MapBuilder::default();

    for lane in 0..lanes {
        let y = lane as f32 * LANE_SPACING;
        let points: Vec<Vec2> = (0..=80).map(|i| Vec2::new(i as f32 * 5.0, y)).collect();
        builder = builder.road(EntityKind::RoadLane, &points);
        let line: Vec<Vec2> = points.iter().map(|p| Vec2::new(p.x, p.y + LANE_SPACING * 0.5)).collect();
        builder = builder.road(EntityKind::RoadLine, &line);
    }
    let bottom = [Vec2::new(0.0, -4.0), Vec2::new(ROAD_LENGTH, -4.0)];
    let top_y = lanes as f32 * LANE_SPACING - 4.0;
    let top = [Vec2::new(0.0, top_y), Vec2::new(ROAD_LENGTH, top_y)];
    builder = builder.road(EntityKind::RoadEdge, &bottom).road(EntityKind::RoadEdge, &top);

    for i in 0..cars {
        let y = (i % lanes) as f32 * LANE_SPACING;
        let x = (i / lanes) as f32 * 30.0 + rng.gen_range(0.0..5.0);
        let speed = rng.gen_range(5.0..12.0);
        builder = builder.vehicle(VehicleSpec::new(Vec2::new(x, y), 0.0, Vec2::new(x + 80.0, y)).with_speed(speed));
    }
    builder.build()
}

fn simulation(cars: usize, mode: ActionMode) -> Simulation {
    let config = SimConfig {
        action_mode: mode,
        ..SimConfig::default()
    };
    Simulation::from_map(config, create_scene(cars)).expect("scene has agents")
}

/// Benchmark road grid and neighbor cache construction
fn bench_road_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("road_index");
    group.sample_size(50);

    for cars in [8, 32, 64] {
        let entities = create_scene(cars).entities;
        let params = GridParams {
            cell_size: 5.0,
            max_segments_per_cell: 10,
            vision_range: 21,
            collision_window: 5,
        };

        group.bench_with_input(BenchmarkId::new("build", cars), &cars, |b, _| {
            b.iter(|| black_box(RoadIndex::build(&entities, &params)))
        });
    }
    group.finish();
}

/// Benchmark cached neighbor queries against a window scan
fn bench_neighbor_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("neighbor_query");
    let sim = simulation(64, ActionMode::Discrete);
    let roads = sim.roads();
    let mut rng = StdRng::seed_from_u64(11);
    let positions: Vec<Vec2> = (0..1000)
        .map(|_| Vec2::new(rng.gen_range(-200.0..200.0), rng.gen_range(-30.0..30.0)))
        .collect();

    group.throughput(Throughput::Elements(positions.len() as u64));
    group.bench_function("cache", |b| {
        b.iter(|| {
            for &p in &positions {
                black_box(roads.observe(p, 200));
            }
        })
    });
    group.bench_function("window_scan", |b| {
        b.iter(|| {
            for &p in &positions {
                black_box(roads.grid.window_scan(p, roads.vision.offsets(), 200));
            }
        })
    });
    group.finish();
}

/// Benchmark a full scheduler tick at various car counts
fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.sample_size(50);

    for cars in [8, 32, 64] {
        let mut sim = simulation(cars, ActionMode::Continuous);
        let agents = sim.agent_count();
        let controls = vec![Control::new(0.5, 0.05); agents];

        group.throughput(Throughput::Elements(agents as u64));
        group.bench_with_input(BenchmarkId::new("step", cars), &cars, |b, _| {
            b.iter(|| black_box(sim.step_controls(&controls).expect("control count")))
        });
    }
    group.finish();
}

/// Benchmark a dream rollout (horizon ticks plus one committed tick)
fn bench_dream(c: &mut Criterion) {
    let mut group = c.benchmark_group("dream");
    group.sample_size(30);

    for cars in [8, 32, 64] {
        let mut sim = simulation(cars, ActionMode::Trajectory);
        let agents = sim.agent_count();
        let mut params = [0.0f32; TRAJECTORY_PARAMS];
        params[2] = 0.3;
        params[8] = 0.1;
        let batch = ActionBatch::Trajectory(vec![params; agents]);

        group.throughput(Throughput::Elements(agents as u64));
        group.bench_with_input(BenchmarkId::new("rollout", cars), &cars, |b, _| {
            b.iter(|| black_box(sim.step(&batch).expect("trajectory batch")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_road_index, bench_neighbor_query, bench_tick, bench_dream,);

criterion_main!(benches);
