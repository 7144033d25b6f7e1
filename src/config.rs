use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sim::action::{ActionMode, ActionTables};
use crate::sim::constants::{capacity, clock, collision, dream, grid, planner, reward, vehicle};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown action mode '{0}' (expected discrete, continuous or trajectory)")]
    UnknownActionMode(String),
    #[error("{field} must be {requirement}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
    },
}

/// Reward shaping coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Penalty for a non-suppressed vehicle collision
    pub vehicle_collision: f32,
    /// Penalty for leaving the road
    pub offroad: f32,
    /// Penalty for a vehicle collision after the agent has respawned once
    pub vehicle_collision_post_respawn: f32,
    /// Reward for reaching the goal on the first life
    pub goal: f32,
    /// Reward for reaching the goal after a respawn
    pub goal_post_respawn: f32,
    /// Reward whenever distance to goal shrank since the previous tick
    pub progression: f32,
    /// Reward while farther than `expert_distance_threshold` from the reference path
    pub expert_distance: f32,
    pub expert_distance_threshold: f32,
    /// Coefficient on the running average displacement error
    pub ade: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            vehicle_collision: reward::VEHICLE_COLLISION,
            offroad: reward::OFFROAD,
            vehicle_collision_post_respawn: reward::VEHICLE_COLLISION_POST_RESPAWN,
            goal: reward::GOAL,
            goal_post_respawn: reward::GOAL_POST_RESPAWN,
            progression: reward::PROGRESSION,
            expert_distance: reward::EXPERT_DISTANCE,
            expert_distance_threshold: reward::EXPERT_DISTANCE_THRESHOLD,
            ade: reward::ADE,
        }
    }
}

/// Tracking controller gains and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub kp_speed: f32,
    pub kp_steer: f32,
    pub max_accel: f32,
    pub max_steer: f32,
    /// Acceleration emitted when the tracked waypoint lies behind the vehicle
    pub brake_accel: f32,
    /// Waypoints to look ahead of the current one
    pub look_ahead: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kp_speed: planner::KP_SPEED,
            kp_steer: planner::KP_STEERING,
            max_accel: planner::MAX_ACCEL,
            max_steer: planner::MAX_STEERING,
            brake_accel: planner::BRAKE_ACCEL,
            look_ahead: planner::LOOK_AHEAD,
        }
    }
}

/// Headless runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Wall-clock budget in seconds
    pub run_seconds: f64,
    /// Seed of the random action stream
    pub seed: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            run_seconds: 10.0,
            seed: 42,
        }
    }
}

/// Simulation configuration
///
/// Every table and scale factor the simulator consults lives here so that
/// independent instances never share mutable globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Binary map to load
    pub map_path: PathBuf,
    /// Which action channel the policy drives
    pub action_mode: ActionMode,
    /// Cap on policy-controlled agents (0 = `max_cars`)
    pub num_agents: usize,
    /// Cap on tracked cars (active + static)
    pub max_cars: usize,
    /// Road segments encoded per observation
    pub max_road_observations: usize,
    /// Ticks per episode
    pub episode_length: u32,
    /// Seconds per tick
    pub dt: f32,
    pub max_speed: f32,
    /// Road grid cell side (metres)
    pub cell_size: f32,
    /// Segment slots per grid cell
    pub max_segments_per_cell: usize,
    /// Observation window side in cells (odd)
    pub vision_range: usize,
    /// Collision/lane window side in cells (odd)
    pub collision_window: usize,
    pub spawn_immunity_ticks: u32,
    /// Speculative horizon of a dream call
    pub dreaming_steps: usize,
    /// Real steps committed after each dream
    pub committed_steps: usize,
    pub dream_respawn_bonus: f32,
    pub vehicle_box_scale: f32,
    pub min_goal_distance: f32,
    pub goal_radius: f32,
    pub rewards: RewardConfig,
    pub action_tables: ActionTables,
    pub trajectory_scaling: [f32; planner::TRAJECTORY_PARAMS],
    pub controller: ControllerConfig,
    pub runner: RunnerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            map_path: PathBuf::from("resources/drive/binaries/map_000.bin"),
            action_mode: ActionMode::Discrete,
            num_agents: 0,
            max_cars: capacity::MAX_CARS,
            max_road_observations: capacity::MAX_ROAD_SEGMENT_OBSERVATIONS,
            episode_length: clock::EPISODE_LENGTH,
            dt: clock::DT,
            max_speed: vehicle::MAX_SPEED,
            cell_size: grid::CELL_SIZE,
            max_segments_per_cell: grid::MAX_SEGMENTS_PER_CELL,
            vision_range: grid::VISION_RANGE,
            collision_window: grid::COLLISION_WINDOW,
            spawn_immunity_ticks: collision::SPAWN_IMMUNITY_TICKS,
            dreaming_steps: dream::DREAMING_STEPS,
            committed_steps: dream::COMMITTED_STEPS,
            dream_respawn_bonus: dream::RESPAWN_BONUS,
            vehicle_box_scale: vehicle::BOX_SCALE,
            min_goal_distance: vehicle::MIN_GOAL_DISTANCE,
            goal_radius: vehicle::GOAL_RADIUS,
            rewards: RewardConfig::default(),
            action_tables: ActionTables::default(),
            trajectory_scaling: planner::SCALING_FACTORS,
            controller: ControllerConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

/// Parse an environment variable, warning and returning None on bad input
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl SimConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DRIVE_MAP_PATH") {
            config.map_path = PathBuf::from(path);
        }

        if let Ok(mode) = std::env::var("DRIVE_ACTION_MODE") {
            match mode.parse::<ActionMode>() {
                Ok(parsed) => config.action_mode = parsed,
                Err(e) => tracing::warn!("{}, using default", e),
            }
        }

        if let Some(num_agents) = env_parse::<usize>("DRIVE_NUM_AGENTS") {
            if num_agents <= config.max_cars {
                config.num_agents = num_agents;
            } else {
                tracing::warn!("DRIVE_NUM_AGENTS must be 0-{}, using default", config.max_cars);
            }
        }

        if let Some(length) = env_parse::<u32>("DRIVE_EPISODE_LENGTH") {
            if length >= 2 {
                config.episode_length = length;
            } else {
                tracing::warn!("DRIVE_EPISODE_LENGTH must be >= 2, using default");
            }
        }

        if let Some(steps) = env_parse::<usize>("DRIVE_DREAMING_STEPS") {
            if steps > 0 {
                config.dreaming_steps = steps;
            } else {
                tracing::warn!("DRIVE_DREAMING_STEPS must be > 0, using default");
            }
        }

        if let Some(steps) = env_parse::<usize>("DRIVE_COMMITTED_STEPS") {
            if steps > 0 && steps <= config.dreaming_steps {
                config.committed_steps = steps;
            } else {
                tracing::warn!(
                    "DRIVE_COMMITTED_STEPS must be 1-{}, using default",
                    config.dreaming_steps
                );
            }
        }

        if let Some(ticks) = env_parse::<u32>("DRIVE_SPAWN_IMMUNITY") {
            config.spawn_immunity_ticks = ticks;
        }

        if let Some(value) = env_parse::<f32>("DRIVE_REWARD_VEHICLE_COLLISION") {
            config.rewards.vehicle_collision = value;
        }
        if let Some(value) = env_parse::<f32>("DRIVE_REWARD_OFFROAD") {
            config.rewards.offroad = value;
        }
        if let Some(value) = env_parse::<f32>("DRIVE_REWARD_VEHICLE_COLLISION_POST_RESPAWN") {
            config.rewards.vehicle_collision_post_respawn = value;
        }
        if let Some(value) = env_parse::<f32>("DRIVE_REWARD_GOAL_POST_RESPAWN") {
            config.rewards.goal_post_respawn = value;
        }
        if let Some(value) = env_parse::<f32>("DRIVE_REWARD_ADE") {
            config.rewards.ade = value;
        }

        if let Some(seconds) = env_parse::<f64>("DRIVE_RUN_SECONDS") {
            if seconds.is_finite() && seconds > 0.0 {
                config.runner.run_seconds = seconds;
            } else {
                tracing::warn!("DRIVE_RUN_SECONDS must be positive, using default");
            }
        }
        if let Some(seed) = env_parse::<u64>("DRIVE_SEED") {
            config.runner.seed = seed;
        }

        config
    }

    /// Active-agent cap after resolving the 0 = unlimited convention
    pub fn agent_cap(&self) -> usize {
        if self.num_agents == 0 {
            self.max_cars
        } else {
            self.num_agents.min(self.max_cars)
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, field: &'static str, requirement: &'static str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange { field, requirement })
            }
        }

        check(
            (1..=capacity::MAX_CARS).contains(&self.max_cars),
            "max_cars",
            "between 1 and 64",
        )?;
        check(
            self.max_road_observations <= capacity::MAX_ROAD_SEGMENT_OBSERVATIONS,
            "max_road_observations",
            "at most 200",
        )?;
        check(self.num_agents <= self.max_cars, "num_agents", "at most max_cars")?;
        check(self.episode_length >= 2, "episode_length", "at least 2")?;
        check(self.dt > 0.0, "dt", "positive")?;
        check(self.max_speed > 0.0, "max_speed", "positive")?;
        check(self.cell_size > 0.0, "cell_size", "positive")?;
        check(self.max_segments_per_cell >= 1, "max_segments_per_cell", "at least 1")?;
        check(
            self.vision_range % 2 == 1,
            "vision_range",
            "an odd number of cells",
        )?;
        check(
            self.collision_window % 2 == 1,
            "collision_window",
            "an odd number of cells",
        )?;
        check(self.dreaming_steps >= 1, "dreaming_steps", "at least 1")?;
        check(
            (1..=self.dreaming_steps).contains(&self.committed_steps),
            "committed_steps",
            "between 1 and dreaming_steps",
        )?;
        check(self.vehicle_box_scale > 0.0, "vehicle_box_scale", "positive")?;
        check(
            !self.action_tables.accelerations.is_empty() && !self.action_tables.steerings.is_empty(),
            "action_tables",
            "non-empty",
        )?;
        check(
            self.controller.max_accel > 0.0 && self.controller.max_steer > 0.0,
            "controller limits",
            "positive",
        )?;
        check(
            self.runner.run_seconds.is_finite() && self.runner.run_seconds > 0.0,
            "runner.run_seconds",
            "positive",
        )?;
        Ok(())
    }
}
