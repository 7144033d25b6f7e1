//! Entity store records
//!
//! Every actor (vehicle, pedestrian, cyclist) and every road polyline is an
//! `Entity`. Reference samples are shared behind an `Arc` so copying an entity
//! never duplicates its trajectory; only `LiveState` changes per tick.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sim::constants::map::SENTINEL;
use crate::util::vec2::Vec2;

/// Actor or road-feature kind, with the map-file type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    None = 0,
    Vehicle = 1,
    Pedestrian = 2,
    Cyclist = 3,
    RoadLane = 4,
    RoadLine = 5,
    RoadEdge = 6,
    StopSign = 7,
    Crosswalk = 8,
    SpeedBump = 9,
    Driveway = 10,
}

impl EntityKind {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1 => Self::Vehicle,
            2 => Self::Pedestrian,
            3 => Self::Cyclist,
            4 => Self::RoadLane,
            5 => Self::RoadLine,
            6 => Self::RoadEdge,
            7 => Self::StopSign,
            8 => Self::Crosswalk,
            9 => Self::SpeedBump,
            10 => Self::Driveway,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Vehicles, pedestrians and cyclists carry velocity/heading/validity samples
    #[inline]
    pub fn is_actor(self) -> bool {
        matches!(self, Self::Vehicle | Self::Pedestrian | Self::Cyclist)
    }

    #[inline]
    pub fn is_road(self) -> bool {
        self.code() >= Self::RoadLane.code()
    }

    /// Lanes, lines and edges are the only features placed in the road grid
    #[inline]
    pub fn is_grid_indexed(self) -> bool {
        matches!(self, Self::RoadLane | Self::RoadLine | Self::RoadEdge)
    }
}

/// Per-tick reference samples
///
/// Actors have one sample per episode tick. Road features have one sample
/// per polyline vertex and leave the velocity/heading/validity columns empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub vx: Vec<f32>,
    pub vy: Vec<f32>,
    pub vz: Vec<f32>,
    pub heading: Vec<f32>,
    pub valid: Vec<bool>,
}

impl Trajectory {
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Raw planar sample, sentinel included
    #[inline]
    pub fn point(&self, index: usize) -> Vec2 {
        Vec2::new(self.x[index], self.y[index])
    }

    /// Planar sample usable for distance computations
    ///
    /// None when out of range, flagged invalid, or holding the sentinel.
    pub fn valid_point(&self, index: usize) -> Option<Vec2> {
        if index >= self.len() {
            return None;
        }
        if !self.valid.is_empty() && !self.valid[index] {
            return None;
        }
        let (x, y) = (self.x[index], self.y[index]);
        if x == SENTINEL || y == SENTINEL {
            return None;
        }
        Some(Vec2::new(x, y))
    }

    /// Segment `index` as (start, end); requires `index + 1 < len`
    #[inline]
    pub fn segment(&self, index: usize) -> (Vec2, Vec2) {
        (self.point(index), self.point(index + 1))
    }

    #[inline]
    pub fn velocity(&self, index: usize) -> Vec2 {
        Vec2::new(self.vx[index], self.vy[index])
    }

    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }
}

/// Collision outcome of the latest metrics pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionState {
    #[default]
    None,
    Vehicle,
    Offroad,
}

impl CollisionState {
    #[inline]
    pub fn is_collided(self) -> bool {
        self != Self::None
    }
}

/// Per-agent metrics of the latest tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub collision: bool,
    pub offroad: bool,
    pub reached_goal: bool,
    pub lane_aligned: bool,
    pub avg_displacement_error: f32,
}

impl AgentMetrics {
    /// Metrics as `[collision, offroad, reached_goal, lane_aligned, avg_displacement_error]`
    pub fn as_array(&self) -> [f32; 5] {
        [
            self.collision as u8 as f32,
            self.offroad as u8 as f32,
            self.reached_goal as u8 as f32,
            self.lane_aligned as u8 as f32,
            self.avg_displacement_error,
        ]
    }
}

/// Mutable per-tick state of an entity
///
/// Plain data so the dream snapshot is a straight value copy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiveState {
    pub position: Vec2,
    pub z: f32,
    pub velocity: Vec2,
    pub heading: f32,
    /// Cached `heading.cos()`
    pub heading_cos: f32,
    /// Cached `heading.sin()`
    pub heading_sin: f32,
    pub valid: bool,
    pub collision_state: CollisionState,
    pub metrics: AgentMetrics,
    /// Tick of the latest respawn this episode
    pub respawn_timestep: Option<u32>,
    pub collided_before_goal: bool,
    pub reached_goal_this_episode: bool,
    pub cumulative_displacement: f32,
    pub displacement_samples: u32,
}

impl LiveState {
    #[inline]
    pub fn set_heading(&mut self, heading: f32) {
        self.heading = heading;
        self.heading_cos = heading.cos();
        self.heading_sin = heading.sin();
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    /// Position is the sentinel (entity absent this tick)
    #[inline]
    pub fn is_absent(&self) -> bool {
        self.position.x == SENTINEL
    }

    /// Clear metrics and the displacement accumulator
    pub fn clear_metrics(&mut self) {
        self.metrics = AgentMetrics::default();
        self.cumulative_displacement = 0.0;
        self.displacement_samples = 0;
    }

    /// Ticks since the latest respawn, None if never respawned
    #[inline]
    pub fn ticks_since_respawn(&self, timestep: u32) -> Option<u32> {
        self.respawn_timestep.map(|r| timestep.saturating_sub(r))
    }
}

/// One actor or road feature
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub trajectory: Arc<Trajectory>,
    pub width: f32,
    pub length: f32,
    pub height: f32,
    pub goal: Vec2,
    pub goal_z: f32,
    /// Driven by its reference trajectory, never by the policy
    pub mark_as_expert: bool,
    /// Set for members of the active partition
    pub active_agent: bool,
    pub state: LiveState,
}

impl Entity {
    pub fn new(kind: EntityKind, trajectory: Trajectory) -> Self {
        Self {
            kind,
            trajectory: Arc::new(trajectory),
            width: 0.0,
            length: 0.0,
            height: 0.0,
            goal: Vec2::ZERO,
            goal_z: 0.0,
            mark_as_expert: false,
            active_agent: false,
            state: LiveState::default(),
        }
    }

    /// Distance to goal measured in the heading frame of the first sample
    pub fn initial_goal_distance(&self) -> f32 {
        let traj = &self.trajectory;
        let heading = traj.heading.first().copied().unwrap_or(0.0);
        let offset = self.goal - traj.point(0);
        offset.into_frame(heading.cos(), heading.sin()).length()
    }

    #[inline]
    pub fn distance_to_goal(&self) -> f32 {
        self.state.position.distance_to(self.goal)
    }

    /// Place the entity on its reference sample at `timestep` (no physics)
    pub fn follow_reference(&mut self, timestep: usize) {
        let traj = &self.trajectory;
        if timestep >= traj.len() {
            return;
        }
        self.state.position = traj.point(timestep);
        self.state.z = traj.z[timestep];
        if let Some(&heading) = traj.heading.get(timestep) {
            self.state.set_heading(heading);
        }
    }

    /// Euclidean distance to the reference at `timestep`, if that sample is usable
    pub fn displacement_error(&self, timestep: usize) -> Option<f32> {
        self.trajectory
            .valid_point(timestep)
            .map(|reference| self.state.position.distance_to(reference))
    }

    /// Closest distance from the live position to any non-sentinel reference sample
    pub fn min_reference_distance(&self, horizon: usize) -> f32 {
        let traj = &self.trajectory;
        (0..horizon.min(traj.len()))
            .filter(|&i| traj.x[i] != SENTINEL && traj.y[i] != SENTINEL)
            .map(|i| self.state.position.distance_to(traj.point(i)))
            .fold(f32::INFINITY, f32::min)
    }
}
