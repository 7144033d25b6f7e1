//! Polynomial trajectory planner and proportional tracking controller
//!
//! A trajectory action is twelve raw parameters: six longitudinal then six
//! lateral quintic coefficients, lowest order first, expressed in the
//! vehicle frame at planning time.

use crate::config::ControllerConfig;
use crate::sim::action::Control;
use crate::sim::constants::planner::TRAJECTORY_PARAMS;
use crate::sim::systems::dynamics::{BicycleModel, KinematicState};
use crate::util::vec2::{wrap_angle, Vec2};

/// Coefficients per axis
pub const AXIS_COEFFS: usize = TRAJECTORY_PARAMS / 2;

/// Longitudinal and lateral coefficient sets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoints {
    pub longitudinal: [f32; AXIS_COEFFS],
    pub lateral: [f32; AXIS_COEFFS],
}

/// Clip raw parameters to [-1, 1] and scale them
pub fn control_points(raw: &[f32; TRAJECTORY_PARAMS], scaling: &[f32; TRAJECTORY_PARAMS]) -> ControlPoints {
    let mut scaled = [0.0f32; TRAJECTORY_PARAMS];
    for (out, (&r, &s)) in scaled.iter_mut().zip(raw.iter().zip(scaling)) {
        *out = r.clamp(-1.0, 1.0) * s;
    }
    let mut points = ControlPoints {
        longitudinal: [0.0; AXIS_COEFFS],
        lateral: [0.0; AXIS_COEFFS],
    };
    points.longitudinal.copy_from_slice(&scaled[..AXIS_COEFFS]);
    points.lateral.copy_from_slice(&scaled[AXIS_COEFFS..]);
    points
}

/// Evaluate `coeffs[0] + coeffs[1] t + ... + coeffs[n] t^n` by Horner's rule
#[inline]
pub fn polyval(coeffs: &[f32], t: f32) -> f32 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
}

/// World-frame waypoints at `t = dt * (i + 1)` for `i in 0..count`
///
/// The first-order longitudinal coefficient is replaced by the current speed
/// so the plan starts continuous with the vehicle.
pub fn plan_waypoints(
    state: &KinematicState,
    raw: &[f32; TRAJECTORY_PARAMS],
    scaling: &[f32; TRAJECTORY_PARAMS],
    dt: f32,
    count: usize,
) -> Vec<Vec2> {
    let mut points = control_points(raw, scaling);
    points.longitudinal[1] = state.velocity.length();

    let (cos, sin) = (state.heading.cos(), state.heading.sin());
    (0..count)
        .map(|i| {
            let t = dt * (i + 1) as f32;
            let local = Vec2::new(polyval(&points.longitudinal, t), polyval(&points.lateral, t));
            state.position + local.rotate_by(cos, sin)
        })
        .collect()
}

/// Proportional speed/heading tracker over a waypoint list
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingController {
    pub gains: ControllerConfig,
    pub dt: f32,
    /// Model for the controller's own forward simulation
    pub model: BicycleModel,
}

impl TrackingController {
    pub fn new(gains: ControllerConfig, model: BicycleModel) -> Self {
        Self {
            gains,
            dt: model.dt,
            model: model.forward_only(),
        }
    }

    /// One control per waypoint, simulating forward from `start`
    pub fn track(&self, start: KinematicState, length: f32, waypoints: &[Vec2]) -> Vec<Control> {
        let g = &self.gains;
        let n = waypoints.len();
        let mut sim = start;
        let mut controls = Vec::with_capacity(n);

        for i in 0..n {
            let target_idx = (i + g.look_ahead).min(n - 1);
            let steps_ahead = (target_idx - i + 1) as f32;
            let target = waypoints[target_idx];
            let to_target = target - sim.position;

            let target_speed = to_target.length() / (self.dt * steps_ahead);
            let speed = sim.velocity.length();
            let accel = (g.kp_speed * (target_speed - speed) / self.dt).clamp(-g.max_accel, g.max_accel);

            let yaw_error = wrap_angle(to_target.angle() - sim.heading);
            let steer = (g.kp_steer * yaw_error).clamp(-g.max_steer, g.max_steer);

            let tracked = Control::new(accel, steer);
            if Vec2::from_heading(sim.heading).dot(to_target) < 0.0 {
                controls.push(Control::new(g.brake_accel, 0.0));
            } else {
                controls.push(tracked);
            }

            // The internal rollout follows the tracked command even when braking was emitted
            sim = self.model.step(
                KinematicState {
                    velocity: Vec2::from_heading(sim.heading) * speed,
                    ..sim
                },
                length,
                tracked,
            );
        }
        controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::constants::planner::SCALING_FACTORS;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn reference_polyval(coeffs: &[f32], t: f32) -> f64 {
        coeffs
            .iter()
            .enumerate()
            .map(|(k, &c)| c as f64 * (t as f64).powi(k as i32))
            .sum()
    }

    #[test]
    fn test_polyval_at_zero_is_constant_term() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let coeffs: Vec<f32> = (0..6).map(|_| rng.gen_range(-10.0..10.0)).collect();
            assert_eq!(polyval(&coeffs, 0.0), coeffs[0]);
        }
    }

    #[test]
    fn test_polyval_matches_power_sum() {
        let coeffs = [0.5, -1.0, 2.0, 0.25, -0.125, 0.0625];
        for t in [0.1, 0.35, 0.5, 0.8, 1.0, 1.7] {
            let expected = reference_polyval(&coeffs, t);
            assert!(
                (polyval(&coeffs, t) as f64 - expected).abs() < 1e-4,
                "t = {t}"
            );
        }
    }

    #[test]
    fn test_polyval_empty() {
        assert_eq!(polyval(&[], 2.0), 0.0);
    }

    #[test]
    fn test_control_points_clip_and_scale() {
        let mut raw = [0.0; TRAJECTORY_PARAMS];
        raw[2] = 5.0;
        raw[7] = -0.5;
        raw[8] = 0.3;
        raw[0] = 1.0;
        let points = control_points(&raw, &SCALING_FACTORS);
        assert_eq!(points.longitudinal[2], 2.0);
        assert_eq!(points.longitudinal[0], 0.0);
        assert_eq!(points.lateral[1], -1.5);
        assert!((points.lateral[2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_waypoints_follow_heading_at_constant_speed() {
        let state = KinematicState {
            position: Vec2::new(5.0, 5.0),
            velocity: Vec2::new(0.0, 10.0),
            heading: std::f32::consts::FRAC_PI_2,
        };
        let raw = [0.0; TRAJECTORY_PARAMS];
        let wps = plan_waypoints(&state, &raw, &SCALING_FACTORS, 0.1, 10);
        assert_eq!(wps.len(), 10);
        assert!(wps[0].approx_eq(Vec2::new(5.0, 6.0), 1e-4));
        assert!(wps[9].approx_eq(Vec2::new(5.0, 15.0), 1e-4));
    }

    #[test]
    fn test_waypoints_lateral_offset_is_left() {
        let state = KinematicState {
            position: Vec2::ZERO,
            velocity: Vec2::new(5.0, 0.0),
            heading: 0.0,
        };
        let mut raw = [0.0; TRAJECTORY_PARAMS];
        raw[7] = 1.0;
        let wps = plan_waypoints(&state, &raw, &SCALING_FACTORS, 0.1, 3);
        assert!(wps.iter().all(|p| p.y > 0.0));
        assert!((wps[2].y - 0.9).abs() < 1e-5);
    }

    fn controller() -> TrackingController {
        TrackingController::new(ControllerConfig::default(), BicycleModel::new(0.1, 100.0))
    }

    #[test]
    fn test_tracking_straight_plan_holds_speed() {
        let state = KinematicState {
            position: Vec2::ZERO,
            velocity: Vec2::new(10.0, 0.0),
            heading: 0.0,
        };
        let wps = plan_waypoints(&state, &[0.0; TRAJECTORY_PARAMS], &SCALING_FACTORS, 0.1, 10);
        let controls = controller().track(state, 4.5, &wps);
        assert_eq!(controls.len(), 10);
        for c in controls {
            assert!(c.acceleration.abs() < 1e-2, "accel {}", c.acceleration);
            assert!(c.steering.abs() < 1e-3);
        }
    }

    #[test]
    fn test_tracking_clips_to_limits() {
        let state = KinematicState::default();
        let wps = vec![Vec2::new(50.0, 50.0)];
        let controls = controller().track(state, 4.5, &wps);
        assert_eq!(controls[0], Control::new(4.0, 1.0));
    }

    #[test]
    fn test_target_behind_brakes() {
        let state = KinematicState {
            position: Vec2::ZERO,
            velocity: Vec2::new(3.0, 0.0),
            heading: 0.0,
        };
        let wps = vec![Vec2::new(-2.0, 0.1), Vec2::new(-3.0, 0.1)];
        let controls = controller().track(state, 4.5, &wps);
        assert_eq!(controls[0], Control::new(-4.0, 0.0));
    }

    #[test]
    fn test_look_ahead_targets_later_waypoint() {
        let gains = ControllerConfig {
            look_ahead: 2,
            ..ControllerConfig::default()
        };
        let ctrl = TrackingController::new(gains, BicycleModel::new(0.1, 100.0));
        let state = KinematicState {
            position: Vec2::ZERO,
            velocity: Vec2::new(10.0, 0.0),
            heading: 0.0,
        };
        // Waypoint i sits at 1 m per step; target speed over 3 steps stays 10 m/s
        let wps: Vec<Vec2> = (1..=5).map(|i| Vec2::new(i as f32, 0.0)).collect();
        let controls = ctrl.track(state, 4.5, &wps);
        assert!(controls[0].acceleration.abs() < 1e-3);
    }
}
