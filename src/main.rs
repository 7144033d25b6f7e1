use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drive_sim::config::SimConfig;
use drive_sim::sim::constants::planner::TRAJECTORY_PARAMS;
use drive_sim::sim::throughput::ThroughputMeter;
use drive_sim::sim::{ActionBatch, ActionMode, Simulation};

/// Steps between throughput samples
const BATCH_STEPS: u64 = 100;

fn random_actions(rng: &mut StdRng, config: &SimConfig, agents: usize) -> ActionBatch {
    match config.action_mode {
        ActionMode::Discrete => {
            let accels = config.action_tables.accelerations.len();
            let steers = config.action_tables.steerings.len();
            ActionBatch::Discrete(
                (0..agents)
                    .map(|_| [rng.gen_range(0..accels), rng.gen_range(0..steers)])
                    .collect(),
            )
        }
        ActionMode::Continuous => ActionBatch::Continuous(
            (0..agents)
                .map(|_| [rng.gen_range(-1.0f32..=1.0), rng.gen_range(-1.0f32..=1.0)])
                .collect(),
        ),
        ActionMode::Trajectory => ActionBatch::Trajectory(
            (0..agents)
                .map(|_| {
                    let mut params = [0.0f32; TRAJECTORY_PARAMS];
                    for p in params.iter_mut() {
                        *p = rng.gen_range(-1.0..=1.0);
                    }
                    params
                })
                .collect(),
        ),
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("drive-sim v{}", env!("CARGO_PKG_VERSION"));

    let config = SimConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: map={}, mode={}, episode_length={}",
        config.map_path.display(),
        config.action_mode,
        config.episode_length
    );

    let run_for = Duration::from_secs_f64(config.runner.run_seconds);
    let seed = config.runner.seed;

    let mut sim = Simulation::new(config.clone())?;
    let agents = sim.agent_count() as u64;
    info!("Running {} agents for {:.1}s (seed {})", agents, run_for.as_secs_f64(), seed);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut meter = ThroughputMeter::new(50);
    let start = Instant::now();
    let mut last_report = start;

    while start.elapsed() < run_for {
        meter.batch_start();
        for _ in 0..BATCH_STEPS {
            let actions = random_actions(&mut rng, &config, sim.agent_count());
            sim.step(&actions)?;
        }
        meter.batch_end(BATCH_STEPS * agents);

        if last_report.elapsed() >= Duration::from_secs(1) {
            info!("{:.0} agent-steps/s", meter.recent_rate());
            last_report = Instant::now();
        }
    }

    info!(
        "Done: {} agent-steps, {:.0} agent-steps/s overall",
        meter.total_steps(),
        meter.overall_rate()
    );
    let log = sim.take_log().averaged();
    println!("{}", serde_json::to_string_pretty(&log)?);
    Ok(())
}
