//! Step scheduler
//!
//! One tick: replay expert cars, move active agents, score them, respawn
//! finished or crashed agents and rebuild observations. The tick after the
//! last episode sample folds the per-agent logs into the aggregate and
//! resets instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sim::action::{ActionBatch, Control};
use crate::sim::entity::CollisionState;
use crate::sim::log::EpisodeOutcome;
use crate::sim::systems::metrics::{self, MetricsContext};
use crate::sim::world::{SimError, Simulation};

/// Episode phase reported by the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// 0 <= timestep < episode_length
    Running,
    /// The episode just ran out
    Reset,
}

/// Simulation-owned tick counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeClock {
    pub timestep: u32,
    pub episode_length: u32,
}

impl EpisodeClock {
    pub fn new(episode_length: u32) -> Self {
        Self {
            timestep: 0,
            episode_length,
        }
    }

    /// Move to the next tick
    pub fn advance(&mut self) -> Phase {
        self.timestep += 1;
        if self.timestep >= self.episode_length {
            Phase::Reset
        } else {
            Phase::Running
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.timestep = 0;
    }
}

/// What a step did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Clock after the step (0 right after an episode boundary)
    pub timestep: u32,
    pub episode_ended: bool,
}

impl Simulation {
    /// Advance by one policy action per active agent
    ///
    /// Discrete and continuous batches run one tick. A trajectory batch runs
    /// a dream rollout and commits `committed_steps` ticks.
    pub fn step(&mut self, actions: &ActionBatch) -> Result<StepInfo, SimError> {
        let expected = self.config.action_mode;
        if actions.mode() != expected {
            return Err(SimError::ActionModeMismatch {
                expected,
                actual: actions.mode(),
            });
        }
        if actions.len() != self.agent_count() {
            return Err(SimError::ActionCount {
                expected: self.agent_count(),
                actual: actions.len(),
            });
        }

        let controls = match actions {
            ActionBatch::Discrete(pairs) => pairs
                .iter()
                .enumerate()
                .map(|(agent, &[accel, steer])| {
                    self.config
                        .action_tables
                        .lookup(accel, steer)
                        .ok_or(SimError::DiscreteIndex { agent, accel, steer })
                })
                .collect::<Result<Vec<_>, _>>()?,
            ActionBatch::Continuous(pairs) => pairs
                .iter()
                .map(|&[accel, steer]| self.config.action_tables.scale_continuous(accel, steer))
                .collect(),
            ActionBatch::Trajectory(params) => {
                let report = self.dream(params)?;
                return Ok(StepInfo {
                    timestep: self.clock.timestep,
                    episode_ended: report.episode_boundary,
                });
            }
        };
        Ok(self.tick(&controls))
    }

    /// Advance one tick with physical controls, bypassing the action channel
    pub fn step_controls(&mut self, controls: &[Control]) -> Result<StepInfo, SimError> {
        if controls.len() != self.agent_count() {
            return Err(SimError::ActionCount {
                expected: self.agent_count(),
                actual: controls.len(),
            });
        }
        Ok(self.tick(controls))
    }

    /// One scheduler tick; `controls` has one entry per active agent
    pub(crate) fn tick(&mut self, controls: &[Control]) -> StepInfo {
        self.rewards.fill(0.0);
        self.terminals.fill(false);

        if self.clock.advance() == Phase::Reset {
            self.end_episode();
            return StepInfo {
                timestep: self.clock.timestep,
                episode_ended: true,
            };
        }

        let timestep = self.clock.timestep as usize;
        let roster = Arc::clone(&self.roster);

        for &idx in &roster.expert_static {
            if !self.entities[idx].state.is_absent() {
                self.entities[idx].follow_reference(timestep);
            }
        }

        for (slot, &idx) in roster.active.iter().enumerate() {
            self.logs[slot].score = 0.0;
            self.logs[slot].episode_length += 1.0;
            let entity = &mut self.entities[idx];
            if entity.state.collision_state == CollisionState::None {
                self.model.apply(&mut entity.state, entity.length, controls[slot]);
            }
        }

        for (slot, &idx) in roster.active.iter().enumerate() {
            self.score_agent(slot, idx);
        }

        for &idx in &roster.active {
            let state = &self.entities[idx].state;
            let crashed = state.collision_state.is_collided() && !self.dreaming;
            if state.metrics.reached_goal || crashed {
                self.respawn_agent(idx);
            }
        }

        self.compute_observations();
        StepInfo {
            timestep: self.clock.timestep,
            episode_ended: false,
        }
    }

    /// Metrics pass and reward for one agent
    fn score_agent(&mut self, slot: usize, idx: usize) {
        let ctx = MetricsContext {
            roads: &self.roads,
            cars: &self.roster.cars,
            timestep: self.clock.timestep,
            spawn_immunity_ticks: self.config.spawn_immunity_ticks,
        };
        let assessment = metrics::update_agent(&ctx, &mut self.entities, idx);

        let weights = &self.config.rewards;
        let log = &mut self.logs[slot];
        let entity = &mut self.entities[idx];
        let respawned = entity.state.respawn_timestep.is_some();
        let mut reward = 0.0;

        match assessment.collision_state {
            CollisionState::Vehicle => {
                if respawned {
                    reward += weights.vehicle_collision_post_respawn;
                } else {
                    reward += weights.vehicle_collision;
                    log.clean_collision_rate = 1.0;
                }
                log.collision_rate = 1.0;
            }
            CollisionState::Offroad => {
                reward += weights.offroad;
                log.offroad_rate = 1.0;
            }
            CollisionState::None => {}
        }
        if assessment.collision_state.is_collided() && !entity.state.reached_goal_this_episode {
            entity.state.collided_before_goal = true;
        }

        if weights.expert_distance != 0.0
            && entity.min_reference_distance(self.config.episode_length as usize) > weights.expert_distance_threshold
        {
            reward += weights.expert_distance;
        }

        let distance = entity.distance_to_goal();
        if distance < self.config.goal_radius {
            reward += if respawned {
                weights.goal_post_respawn
            } else {
                weights.goal
            };
            entity.state.reached_goal_this_episode = true;
            entity.state.metrics.reached_goal = true;
        }

        if self.previous_distance_to_goal[slot] - distance > 0.0 {
            reward += weights.progression;
        }
        self.previous_distance_to_goal[slot] = distance;

        if entity.state.metrics.lane_aligned {
            log.lane_alignment_rate = 1.0;
        }

        let ade = entity.state.metrics.avg_displacement_error;
        if ade > 0.0 && weights.ade != 0.0 {
            reward += weights.ade * ade;
        }
        log.avg_displacement_error = ade;

        log.episode_return += reward;
        self.rewards[slot] = reward;
    }

    /// Fold per-agent logs into the aggregate, reset, flag terminals
    fn end_episode(&mut self) {
        for (slot, &idx) in self.roster.active.iter().enumerate() {
            let state = &self.entities[idx].state;
            self.log.add_agent(
                &self.logs[slot],
                EpisodeOutcome {
                    reached_goal: state.reached_goal_this_episode,
                    collided_before_goal: state.collided_before_goal,
                },
            );
        }
        debug!(
            "Episode ended: {} agent-episodes logged, dreaming={}",
            self.log.n, self.dreaming
        );
        self.reset();
        self.terminals.fill(true);
    }
}
