//! Read-only world snapshot for external renderers
//!
//! The core never depends on a renderer. A snapshot is plain serde data; with
//! the `render` feature it can be encoded with bincode's legacy fixed-int
//! configuration.

use serde::{Deserialize, Serialize};

use crate::sim::entity::{AgentMetrics, CollisionState, EntityKind};
use crate::sim::spatial::GridBounds;
use crate::sim::world::Simulation;
use crate::util::vec2::Vec2;

/// How an actor is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorRole {
    Agent,
    StaticCar,
    ExpertCar,
    /// Pedestrians, cyclists and vehicles outside the car partition
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorPose {
    pub entity: u32,
    pub kind: EntityKind,
    pub role: ActorRole,
    pub position: Vec2,
    pub heading: f32,
    pub length: f32,
    pub width: f32,
    pub goal: Vec2,
    pub collision_state: CollisionState,
    pub metrics: AgentMetrics,
    pub respawned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSnapshot {
    pub timestep: u32,
    /// Road grid extent, None for a scene without indexed roads
    pub bounds: Option<GridBounds>,
    /// Add to any position to recover map coordinates
    pub world_mean: Vec2,
    /// Actors present this tick
    pub actors: Vec<ActorPose>,
}

impl Simulation {
    pub fn render_snapshot(&self) -> RenderSnapshot {
        let roster = &self.roster;
        let actors = self
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind.is_actor() && !e.state.is_absent())
            .map(|(idx, e)| {
                let role = if e.active_agent {
                    ActorRole::Agent
                } else if roster.expert_static.contains(&idx) {
                    ActorRole::ExpertCar
                } else if roster.static_cars.contains(&idx) {
                    ActorRole::StaticCar
                } else {
                    ActorRole::Background
                };
                ActorPose {
                    entity: idx as u32,
                    kind: e.kind,
                    role,
                    position: e.state.position,
                    heading: e.state.heading,
                    length: e.length,
                    width: e.width,
                    goal: e.goal,
                    collision_state: e.state.collision_state,
                    metrics: e.state.metrics,
                    respawned: e.state.respawn_timestep.is_some(),
                }
            })
            .collect();

        RenderSnapshot {
            timestep: self.clock.timestep,
            bounds: self.roads.grid.bounds(),
            world_mean: self.world_mean,
            actors,
        }
    }
}

#[cfg(feature = "render")]
#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[cfg(feature = "render")]
#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(feature = "render")]
impl RenderSnapshot {
    /// Fixed-int bincode encoding
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::serde::encode_to_vec(self, bincode::config::legacy()).map_err(|e| EncodeError(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        bincode::serde::decode_from_slice(data, bincode::config::legacy())
            .map(|(snapshot, _)| snapshot)
            .map_err(|e| DecodeError(e.to_string()))
    }
}
