//! Kinematic single-track vehicle model

use crate::sim::action::Control;
use crate::sim::entity::LiveState;
use crate::util::vec2::Vec2;

/// Pose and velocity advanced by the model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KinematicState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub heading: f32,
}

impl KinematicState {
    pub fn of(state: &LiveState) -> Self {
        Self {
            position: state.position,
            velocity: state.velocity,
            heading: state.heading,
        }
    }

    /// Speed, negative when the velocity points behind the heading
    pub fn signed_speed(&self) -> f32 {
        let speed = self.velocity.length();
        if self.velocity.dot(Vec2::from_heading(self.heading)) < 0.0 {
            -speed
        } else {
            speed
        }
    }
}

/// Fixed-step bicycle model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BicycleModel {
    pub dt: f32,
    pub max_speed: f32,
    /// When false, speed is floored at zero instead of `-max_speed`
    pub allow_reverse: bool,
}

impl BicycleModel {
    pub fn new(dt: f32, max_speed: f32) -> Self {
        Self {
            dt,
            max_speed,
            allow_reverse: true,
        }
    }

    /// Same model without reversing
    pub fn forward_only(self) -> Self {
        Self {
            allow_reverse: false,
            ..self
        }
    }

    /// Advance one tick
    ///
    /// Velocity follows `heading + beta` with the pre-update heading; the
    /// heading then integrates the yaw rate.
    pub fn step(&self, state: KinematicState, length: f32, control: Control) -> KinematicState {
        let min_speed = if self.allow_reverse { -self.max_speed } else { 0.0 };
        let speed = (state.signed_speed() + control.acceleration * self.dt).clamp(min_speed, self.max_speed);

        let tan_steer = control.steering.tan();
        let beta = (0.5 * tan_steer).atan();
        let yaw_rate = if length > 0.0 {
            speed * beta.cos() * tan_steer / length
        } else {
            0.0
        };

        let velocity = Vec2::from_heading(state.heading + beta) * speed;
        KinematicState {
            position: state.position + velocity * self.dt,
            velocity,
            heading: state.heading + yaw_rate * self.dt,
        }
    }

    /// Advance an entity's live state in place
    pub fn apply(&self, live: &mut LiveState, length: f32, control: Control) {
        let next = self.step(KinematicState::of(live), length, control);
        live.position = next.position;
        live.velocity = next.velocity;
        live.set_heading(next.heading);
    }
}
