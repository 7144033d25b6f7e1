//! Simulation world: entity store, partition and episode buffers
//!
//! `Simulation` owns everything mutable. The road index, roster and config
//! are built once at load and shared behind `Arc`s, so cloning a simulation
//! only copies live state and the per-agent buffers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConfigError, SimConfig};
use crate::sim::action::ActionMode;
use crate::sim::constants::collision::PREFILTER_DIST_SQ;
use crate::sim::constants::map::SENTINEL;
use crate::sim::constants::observation_size;
use crate::sim::dream::DreamError;
use crate::sim::entity::{CollisionState, Entity, EntityKind};
use crate::sim::log::Log;
use crate::sim::map::{load_map, MapData, MapError};
use crate::sim::scheduler::EpisodeClock;
use crate::sim::spatial::{GridParams, RoadIndex};
use crate::sim::systems::collision::first_vehicle_collision;
use crate::sim::systems::dynamics::BicycleModel;
use crate::sim::systems::metrics::{self, MetricsContext};
use crate::sim::systems::planner::TrackingController;
use crate::util::vec2::Vec2;

/// Simulation errors
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Action batch is {actual}, simulation expects {expected}")]
    ActionModeMismatch { expected: ActionMode, actual: ActionMode },
    #[error("Expected {expected} actions, got {actual}")]
    ActionCount { expected: usize, actual: usize },
    #[error("Agent {agent}: discrete action ({accel}, {steer}) out of range")]
    DiscreteIndex { agent: usize, accel: usize, steer: usize },
    #[error("Map has no vehicle eligible for policy control")]
    NoActiveAgents,
    #[error(transparent)]
    Dream(#[from] DreamError),
}

/// Entity indices of the car partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Policy-controlled agents, in action order
    pub active: Vec<usize>,
    /// Cars kept for collisions and observations only
    pub static_cars: Vec<usize>,
    /// Static cars replayed from their reference trajectory
    pub expert_static: Vec<usize>,
    /// Collision candidates: `active` followed by `static_cars`
    pub cars: Vec<usize>,
}

impl Roster {
    #[inline]
    pub fn agent_count(&self) -> usize {
        self.active.len()
    }
}

#[derive(Debug, Clone)]
pub struct Simulation {
    pub(crate) config: Arc<SimConfig>,
    pub(crate) entities: Vec<Entity>,
    pub(crate) num_objects: usize,
    pub(crate) roads: Arc<RoadIndex>,
    pub(crate) roster: Arc<Roster>,
    pub(crate) world_mean: Vec2,
    pub(crate) clock: EpisodeClock,
    /// Per-agent logs of the running episode
    pub(crate) logs: Vec<Log>,
    /// Aggregate over finished episodes
    pub(crate) log: Log,
    pub(crate) rewards: Vec<f32>,
    pub(crate) terminals: Vec<bool>,
    pub(crate) previous_distance_to_goal: Vec<f32>,
    pub(crate) observation_size: usize,
    pub(crate) observations: Vec<f32>,
    pub(crate) dreaming: bool,
    pub(crate) model: BicycleModel,
    pub(crate) controller: TrackingController,
}

impl Simulation {
    /// Load the configured map and initialise the first episode
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let map = load_map(&config.map_path)?;
        Self::from_map(config, map)
    }

    /// Initialise from an already loaded scene
    pub fn from_map(config: SimConfig, map: MapData) -> Result<Self, SimError> {
        config.validate()?;
        let MapData {
            num_objects,
            mut entities,
            ..
        } = map;

        let world_mean = recentre(&mut entities);
        debug!("World mean ({:.2}, {:.2})", world_mean.x, world_mean.y);

        let roads = RoadIndex::build(
            &entities,
            &GridParams {
                cell_size: config.cell_size,
                max_segments_per_cell: config.max_segments_per_cell,
                vision_range: config.vision_range,
                collision_window: config.collision_window,
            },
        );
        if roads.grid.dropped() > 0 {
            debug!("Road grid dropped {} segments over cell capacity", roads.grid.dropped());
        }

        let roster = partition(&mut entities, num_objects, &config);
        if roster.active.is_empty() {
            return Err(SimError::NoActiveAgents);
        }
        info!(
            "Partition: {} active agents, {} static cars ({} expert)",
            roster.active.len(),
            roster.static_cars.len(),
            roster.expert_static.len()
        );

        let agents = roster.active.len();
        let obs_size = observation_size(config.max_cars, config.max_road_observations);
        let model = BicycleModel::new(config.dt, config.max_speed);
        let controller = TrackingController::new(config.controller.clone(), model);

        let mut sim = Self {
            clock: EpisodeClock::new(config.episode_length),
            config: Arc::new(config),
            entities,
            num_objects,
            roads: Arc::new(roads),
            roster: Arc::new(roster),
            world_mean,
            logs: vec![Log::default(); agents],
            log: Log::default(),
            rewards: vec![0.0; agents],
            terminals: vec![false; agents],
            previous_distance_to_goal: vec![0.0; agents],
            observation_size: obs_size,
            observations: vec![0.0; agents * obs_size],
            dreaming: false,
            model,
            controller,
        };

        sim.prune_bad_trajectories();
        sim.reset();
        Ok(sim)
    }

    // ========================================================================
    // Initialisation
    // ========================================================================

    /// Replay references once and remove static cars that agents run into
    fn prune_bad_trajectories(&mut self) {
        self.set_start_positions();
        let roster = Arc::clone(&self.roster);
        let mut first_hits: Vec<Option<usize>> = vec![None; roster.active.len()];

        for t in 0..self.config.episode_length as usize {
            for &idx in &roster.active {
                self.entities[idx].follow_reference(t);
            }
            for &idx in &roster.expert_static {
                if !self.entities[idx].state.is_absent() {
                    self.entities[idx].follow_reference(t);
                }
            }
            for (slot, &idx) in roster.active.iter().enumerate() {
                if first_hits[slot].is_none() {
                    first_hits[slot] = first_vehicle_collision(&self.entities, idx, &roster.cars, PREFILTER_DIST_SQ);
                }
            }
        }

        let mut removed = 0;
        for hit in first_hits.into_iter().flatten() {
            if !roster.static_cars.contains(&hit) {
                continue;
            }
            let traj = Arc::make_mut(&mut self.entities[hit].trajectory);
            if traj.x.first() != Some(&SENTINEL) {
                removed += 1;
            }
            if let (Some(x), Some(y)) = (traj.x.first_mut(), traj.y.first_mut()) {
                *x = SENTINEL;
                *y = SENTINEL;
            }
        }
        if removed > 0 {
            info!("Removed {} static cars on agent reference paths", removed);
        }
    }

    /// Place every entity on its first reference sample
    pub(crate) fn set_start_positions(&mut self) {
        for entity in self.entities.iter_mut() {
            let traj = Arc::clone(&entity.trajectory);
            if traj.is_empty() {
                continue;
            }
            let state = &mut entity.state;
            state.position = traj.point(0);
            state.z = traj.z.first().copied().unwrap_or(0.0);
            if !entity.kind.is_actor() {
                continue;
            }

            if entity.active_agent {
                state.velocity = traj.velocity(0);
            } else {
                state.velocity = Vec2::ZERO;
                state.collided_before_goal = false;
            }
            state.set_heading(traj.heading.first().copied().unwrap_or(0.0));
            state.valid = traj.is_valid(0);
            state.collision_state = CollisionState::None;
            state.clear_metrics();
            state.respawn_timestep = None;
        }
    }

    /// Start a new episode
    ///
    /// Clears per-agent logs and flags, recomputes metrics at the start
    /// positions and seeds the previous goal distance. The aggregate log is
    /// kept.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.set_start_positions();

        let roster = Arc::clone(&self.roster);
        for (slot, &idx) in roster.active.iter().enumerate() {
            self.logs[slot] = Log::default();
            let state = &mut self.entities[idx].state;
            state.respawn_timestep = None;
            state.collided_before_goal = false;
            state.reached_goal_this_episode = false;
            state.clear_metrics();

            let ctx = MetricsContext {
                roads: &self.roads,
                cars: &roster.cars,
                timestep: self.clock.timestep,
                spawn_immunity_ticks: self.config.spawn_immunity_ticks,
            };
            metrics::update_agent(&ctx, &mut self.entities, idx);
            self.previous_distance_to_goal[slot] = self.entities[idx].distance_to_goal();
        }

        self.rewards.fill(0.0);
        self.terminals.fill(false);
        self.compute_observations();
    }

    /// Put an agent back on its first reference sample
    pub(crate) fn respawn_agent(&mut self, idx: usize) {
        let timestep = self.clock.timestep;
        let entity = &mut self.entities[idx];
        let traj = Arc::clone(&entity.trajectory);
        if traj.is_empty() {
            return;
        }
        let state = &mut entity.state;
        state.position = traj.point(0);
        state.set_heading(traj.heading.first().copied().unwrap_or(0.0));
        state.velocity = traj.velocity(0);
        state.collision_state = CollisionState::None;
        state.clear_metrics();
        state.respawn_timestep = Some(timestep);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[inline]
    pub fn agent_count(&self) -> usize {
        self.roster.active.len()
    }

    #[inline]
    pub fn timestep(&self) -> u32 {
        self.clock.timestep
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Number of actor records at the front of `entities`
    pub fn num_objects(&self) -> usize {
        self.num_objects
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn roads(&self) -> &RoadIndex {
        &self.roads
    }

    /// Offset subtracted from every map coordinate at load
    pub fn world_mean(&self) -> Vec2 {
        self.world_mean
    }

    /// Entity of the `slot`-th active agent
    pub fn agent(&self, slot: usize) -> Option<&Entity> {
        self.roster.active.get(slot).map(|&idx| &self.entities[idx])
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    pub fn terminals(&self) -> &[bool] {
        &self.terminals
    }

    /// Flat observations, `observation_size()` floats per agent
    pub fn observations(&self) -> &[f32] {
        &self.observations
    }

    pub fn observation(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.observation_size)?;
        self.observations.get(start..start + self.observation_size)
    }

    pub fn observation_size(&self) -> usize {
        self.observation_size
    }

    /// Aggregate over finished episodes
    pub fn log(&self) -> &Log {
        &self.log
    }

    /// Return the aggregate log and start a fresh one
    pub fn take_log(&mut self) -> Log {
        std::mem::take(&mut self.log)
    }

    /// Per-agent logs of the running episode
    pub fn agent_logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn is_dreaming(&self) -> bool {
        self.dreaming
    }
}

/// Shift the scene so the mean of all usable samples sits at the origin
fn recentre(entities: &mut [Entity]) -> Vec2 {
    let (mut sum_x, mut sum_y, mut count) = (0.0f64, 0.0f64, 0u64);
    for entity in entities.iter() {
        let traj = &entity.trajectory;
        for i in 0..traj.len() {
            if traj.x[i] == SENTINEL || traj.y[i] == SENTINEL {
                continue;
            }
            if entity.kind.is_actor() && !traj.is_valid(i) {
                continue;
            }
            sum_x += traj.x[i] as f64;
            sum_y += traj.y[i] as f64;
            count += 1;
        }
    }
    if count == 0 {
        return Vec2::ZERO;
    }

    let mean = Vec2::new((sum_x / count as f64) as f32, (sum_y / count as f64) as f32);
    for entity in entities.iter_mut() {
        let traj = Arc::make_mut(&mut entity.trajectory);
        for (x, y) in traj.x.iter_mut().zip(traj.y.iter_mut()) {
            if *x == SENTINEL || *y == SENTINEL {
                continue;
            }
            *x -= mean.x;
            *y -= mean.y;
        }
        if entity.kind.is_actor() {
            entity.goal -= mean;
        }
    }
    mean
}

/// Split vehicles into active agents and static cars
///
/// The last object (the logged ego) is considered first, then objects in
/// file order. Only vehicles valid at tick 0 count as cars.
fn partition(entities: &mut [Entity], num_objects: usize, config: &SimConfig) -> Roster {
    let mut roster = Roster::default();
    if num_objects == 0 {
        return roster;
    }
    let cap = config.agent_cap();
    let order = std::iter::once(num_objects - 1).chain(0..num_objects - 1);

    for idx in order {
        if roster.active.len() + roster.static_cars.len() >= config.max_cars {
            break;
        }
        let entity = &mut entities[idx];
        if entity.kind != EntityKind::Vehicle || !entity.trajectory.is_valid(0) {
            continue;
        }
        entity.width *= config.vehicle_box_scale;
        entity.length *= config.vehicle_box_scale;

        let qualifies = !entity.mark_as_expert && entity.initial_goal_distance() >= config.min_goal_distance;
        if qualifies && roster.active.len() < cap {
            entity.active_agent = true;
            roster.active.push(idx);
        } else {
            entity.active_agent = false;
            roster.static_cars.push(idx);
            if entity.mark_as_expert || qualifies {
                entity.mark_as_expert = true;
                roster.expert_static.push(idx);
            }
        }
    }

    roster.cars = roster.active.iter().chain(&roster.static_cars).copied().collect();
    roster
}
