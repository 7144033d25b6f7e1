//! Policy action channels
//!
//! A batch carries one action per active agent, tagged with the channel it
//! was produced for. The scheduler resolves every channel to a `Control`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::sim::constants::{action, planner::TRAJECTORY_PARAMS};

/// Which action channel the policy drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    /// Index pair into the acceleration and steering tables
    Discrete,
    /// Normalised `[accel, steer]` in [-1, 1]
    Continuous,
    /// Twelve polynomial coefficients, executed through a dream rollout
    Trajectory,
}

impl ActionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discrete => "discrete",
            Self::Continuous => "continuous",
            Self::Trajectory => "trajectory",
        }
    }
}

impl fmt::Display for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discrete" | "0" => Ok(Self::Discrete),
            "continuous" | "1" => Ok(Self::Continuous),
            "trajectory" | "2" => Ok(Self::Trajectory),
            _ => Err(ConfigError::UnknownActionMode(s.to_string())),
        }
    }
}

/// Physical acceleration (m/s^2) and steering angle (rad)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub acceleration: f32,
    pub steering: f32,
}

impl Control {
    pub const IDLE: Control = Control {
        acceleration: 0.0,
        steering: 0.0,
    };

    #[inline]
    pub const fn new(acceleration: f32, steering: f32) -> Self {
        Self {
            acceleration,
            steering,
        }
    }
}

/// Discrete lookup tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTables {
    pub accelerations: Vec<f32>,
    pub steerings: Vec<f32>,
}

impl Default for ActionTables {
    fn default() -> Self {
        Self {
            accelerations: action::ACCELERATION_VALUES.to_vec(),
            steerings: action::STEERING_VALUES.to_vec(),
        }
    }
}

impl ActionTables {
    /// Control for an index pair, None if either index is out of range
    pub fn lookup(&self, accel_idx: usize, steer_idx: usize) -> Option<Control> {
        Some(Control::new(
            *self.accelerations.get(accel_idx)?,
            *self.steerings.get(steer_idx)?,
        ))
    }

    /// Scale a normalised pair by the last (largest) table entries
    pub fn scale_continuous(&self, accel: f32, steer: f32) -> Control {
        let max_accel = self.accelerations.last().copied().unwrap_or(0.0);
        let max_steer = self.steerings.last().copied().unwrap_or(0.0);
        Control::new(
            accel.clamp(-1.0, 1.0) * max_accel,
            steer.clamp(-1.0, 1.0) * max_steer,
        )
    }
}

/// One action per active agent, typed by channel
#[derive(Debug, Clone, PartialEq)]
pub enum ActionBatch {
    Discrete(Vec<[usize; 2]>),
    Continuous(Vec<[f32; 2]>),
    Trajectory(Vec<[f32; TRAJECTORY_PARAMS]>),
}

impl ActionBatch {
    /// All-zero batch. Discrete index 0 is the first table entry, not idle.
    pub fn zeros(mode: ActionMode, agents: usize) -> Self {
        match mode {
            ActionMode::Discrete => Self::Discrete(vec![[0, 0]; agents]),
            ActionMode::Continuous => Self::Continuous(vec![[0.0; 2]; agents]),
            ActionMode::Trajectory => Self::Trajectory(vec![[0.0; TRAJECTORY_PARAMS]; agents]),
        }
    }

    pub fn mode(&self) -> ActionMode {
        match self {
            Self::Discrete(_) => ActionMode::Discrete,
            Self::Continuous(_) => ActionMode::Continuous,
            Self::Trajectory(_) => ActionMode::Trajectory,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Discrete(a) => a.len(),
            Self::Continuous(a) => a.len(),
            Self::Trajectory(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("discrete".parse::<ActionMode>().unwrap(), ActionMode::Discrete);
        assert_eq!(" Continuous ".parse::<ActionMode>().unwrap(), ActionMode::Continuous);
        assert_eq!("2".parse::<ActionMode>().unwrap(), ActionMode::Trajectory);
        assert_eq!(
            "bicycle".parse::<ActionMode>(),
            Err(ConfigError::UnknownActionMode("bicycle".to_string()))
        );
    }

    #[test]
    fn test_mode_display_roundtrip() {
        for mode in [ActionMode::Discrete, ActionMode::Continuous, ActionMode::Trajectory] {
            assert_eq!(mode.to_string().parse::<ActionMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_lookup() {
        let tables = ActionTables::default();
        assert_eq!(tables.lookup(3, 6), Some(Control::new(0.0, 0.0)));
        assert_eq!(tables.lookup(6, 0), Some(Control::new(4.0, -1.0)));
        assert_eq!(tables.lookup(7, 0), None);
        assert_eq!(tables.lookup(0, 13), None);
    }

    #[test]
    fn test_scale_continuous_clamps() {
        let tables = ActionTables::default();
        let c = tables.scale_continuous(0.5, -2.0);
        assert!((c.acceleration - 2.0).abs() < 1e-6);
        assert!((c.steering + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_batch_shape() {
        let batch = ActionBatch::zeros(ActionMode::Trajectory, 3);
        assert_eq!(batch.mode(), ActionMode::Trajectory);
        assert_eq!(batch.len(), 3);
        assert!(ActionBatch::Discrete(vec![]).is_empty());
    }
}
