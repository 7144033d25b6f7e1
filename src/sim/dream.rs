//! Dream rollouts for trajectory actions
//!
//! A dream plans every agent's trajectory, runs the scheduler over the whole
//! horizon to score it, rolls the world back and then commits only the first
//! `committed_steps` ticks of the plan. The externally visible reward is the
//! one accumulated while dreaming.

use std::collections::TryReserveError;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sim::action::Control;
use crate::sim::constants::planner::TRAJECTORY_PARAMS;
use crate::sim::entity::LiveState;
use crate::sim::log::Log;
use crate::sim::scheduler::EpisodeClock;
use crate::sim::systems::dynamics::KinematicState;
use crate::sim::systems::planner::plan_waypoints;
use crate::sim::world::{SimError, Simulation};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DreamError {
    #[error("Failed to allocate dream snapshot of {count} {what}")]
    SnapshotAlloc {
        what: &'static str,
        count: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Copy a slice into a fresh vector, reporting allocation failure
fn try_copy<T: Clone>(items: &[T], what: &'static str) -> Result<Vec<T>, DreamError> {
    let mut out = Vec::new();
    out.try_reserve_exact(items.len())
        .map_err(|source| DreamError::SnapshotAlloc {
            what,
            count: items.len(),
            source,
        })?;
    out.extend_from_slice(items);
    Ok(out)
}

/// Everything a rollout can mutate
///
/// Trajectories and the road index are immutable after load and are not
/// copied.
#[derive(Debug, Clone)]
pub struct DreamState {
    clock: EpisodeClock,
    states: Vec<LiveState>,
    logs: Vec<Log>,
    log: Log,
    previous_distance_to_goal: Vec<f32>,
    terminals: Vec<bool>,
}

impl DreamState {
    /// Snapshot the live world; nothing is touched if any copy fails
    pub fn capture(sim: &Simulation) -> Result<Self, DreamError> {
        let mut states = Vec::new();
        states
            .try_reserve_exact(sim.entities.len())
            .map_err(|source| DreamError::SnapshotAlloc {
                what: "entity states",
                count: sim.entities.len(),
                source,
            })?;
        states.extend(sim.entities.iter().map(|e| e.state));

        Ok(Self {
            clock: sim.clock,
            states,
            logs: try_copy(&sim.logs, "agent logs")?,
            log: sim.log,
            previous_distance_to_goal: try_copy(&sim.previous_distance_to_goal, "goal distances")?,
            terminals: try_copy(&sim.terminals, "terminal flags")?,
        })
    }

    /// Put the snapshot back, consuming it
    pub fn restore(self, sim: &mut Simulation) {
        sim.clock = self.clock;
        for (entity, state) in sim.entities.iter_mut().zip(self.states) {
            entity.state = state;
        }
        sim.logs = self.logs;
        sim.log = self.log;
        sim.previous_distance_to_goal = self.previous_distance_to_goal;
        sim.terminals = self.terminals;
    }
}

/// Outcome of one dream call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DreamReport {
    /// Speculative ticks run before rolling back
    pub dream_ticks: usize,
    /// The rollout reached the end of the episode
    pub dream_boundary: bool,
    /// Real ticks kept
    pub committed: usize,
    /// A committed tick crossed the episode boundary
    pub episode_boundary: bool,
}

impl Simulation {
    /// Tracking-controller commands for every agent over the dream horizon
    pub fn plan_controls(&self, params: &[[f32; TRAJECTORY_PARAMS]]) -> Result<Vec<Vec<Control>>, SimError> {
        if params.len() != self.agent_count() {
            return Err(SimError::ActionCount {
                expected: self.agent_count(),
                actual: params.len(),
            });
        }
        let horizon = self.config.dreaming_steps;
        Ok(self
            .roster
            .active
            .iter()
            .zip(params)
            .map(|(&idx, raw)| {
                let entity = &self.entities[idx];
                let start = KinematicState::of(&entity.state);
                let waypoints = plan_waypoints(&start, raw, &self.config.trajectory_scaling, self.config.dt, horizon);
                self.controller.track(start, entity.length, &waypoints)
            })
            .collect())
    }

    /// Score a trajectory action over the dream horizon, then commit its first steps
    pub fn dream(&mut self, params: &[[f32; TRAJECTORY_PARAMS]]) -> Result<DreamReport, SimError> {
        let plans = self.plan_controls(params)?;
        let snapshot = DreamState::capture(self)?;

        let horizon = self.config.dreaming_steps;
        let bonus = self.config.dream_respawn_bonus;
        let start = self.clock.timestep;
        let agents = self.agent_count();
        let mut dream_rewards = vec![0.0f32; agents];
        // First respawn of each agent inside this dream
        let mut first_respawn: Vec<Option<u32>> = vec![None; agents];
        let mut controls = vec![Control::IDLE; agents];
        let mut report = DreamReport {
            dream_ticks: 0,
            dream_boundary: false,
            committed: 0,
            episode_boundary: false,
        };

        self.dreaming = true;
        for ts in 0..horizon {
            for (control, plan) in controls.iter_mut().zip(&plans) {
                *control = plan[ts];
            }
            let info = self.tick(&controls);
            report.dream_ticks += 1;

            let now = self.clock.timestep;
            for (slot, &idx) in self.roster.active.iter().enumerate() {
                // Nothing counts after an agent's first mid-dream respawn
                if first_respawn[slot].is_some_and(|r| now > r) {
                    continue;
                }
                dream_rewards[slot] += self.rewards[slot];
                if self.entities[idx].state.respawn_timestep == Some(now) {
                    first_respawn[slot] = Some(now);
                    dream_rewards[slot] += bonus * (horizon - ts + 1) as f32;
                }
            }

            if info.episode_ended {
                report.dream_boundary = true;
                break;
            }
        }
        snapshot.restore(self);
        self.dreaming = false;

        for ts in 0..self.config.committed_steps.min(horizon) {
            for (control, plan) in controls.iter_mut().zip(&plans) {
                *control = plan[ts];
            }
            let info = self.tick(&controls);
            report.committed += 1;
            report.episode_boundary |= info.episode_ended;
        }
        self.rewards.copy_from_slice(&dream_rewards);

        debug!(
            "Dream from t={}: {} ticks, committed {}, now t={}",
            start, report.dream_ticks, report.committed, self.clock.timestep
        );
        Ok(report)
    }
}
