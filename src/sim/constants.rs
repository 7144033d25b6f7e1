/// Fixed-timestep clock
pub mod clock {
    /// Seconds per simulation tick
    pub const DT: f32 = 0.1;
    /// Ticks per episode (length of every actor reference trajectory)
    pub const EPISODE_LENGTH: u32 = 91;
}

/// Map-format constants
pub mod map {
    /// Marks an absent reference sample
    pub const SENTINEL: f32 = -10_000.0;
}

/// Kinematic limits
pub mod vehicle {
    /// Maximum absolute speed (m/s)
    pub const MAX_SPEED: f32 = 100.0;
    /// Scale applied to vehicle boxes when they enter the car partition
    pub const BOX_SCALE: f32 = 0.7;
    /// Minimum ego-frame distance to goal for an actor to be policy-controlled
    pub const MIN_GOAL_DISTANCE: f32 = 2.0;
    /// Distance to goal under which the goal counts as reached
    pub const GOAL_RADIUS: f32 = 2.0;
}

/// Capacity ceilings for fixed-width buffers
pub mod capacity {
    /// Maximum cars (active + static) tracked per scene
    pub const MAX_CARS: usize = 64;
    /// Maximum road segments encoded per observation
    pub const MAX_ROAD_SEGMENT_OBSERVATIONS: usize = 200;
}

/// Road grid constants
pub mod grid {
    /// Side length of a square grid cell (metres)
    pub const CELL_SIZE: f32 = 5.0;
    /// Segment slots per cell; further insertions are dropped
    pub const MAX_SEGMENTS_PER_CELL: usize = 10;
    /// Observation window side, in cells
    pub const VISION_RANGE: usize = 21;
    /// Collision/lane window side, in cells
    pub const COLLISION_WINDOW: usize = 5;
}

/// Collision and road-rule thresholds
pub mod collision {
    /// Squared centre distance beyond which the SAT test is skipped
    pub const PREFILTER_DIST_SQ: f32 = 225.0;
    /// Squared distance under which the closest lane segment is considered
    pub const LANE_SEARCH_DIST_SQ: f32 = 100.0;
    /// Squared distance under which lane alignment is evaluated at all
    pub const LANE_ALIGN_DIST_SQ: f32 = 4.0;
    /// Maximum heading difference for a lane segment to be a candidate
    pub const LANE_CANDIDATE_ANGLE: f32 = std::f32::consts::FRAC_PI_2;
    /// Maximum heading difference for the agent to count as lane aligned
    pub const LANE_ALIGNED_ANGLE: f32 = std::f32::consts::FRAC_PI_6;
    /// Ticks after a respawn during which collisions are forgiven
    pub const SPAWN_IMMUNITY_TICKS: u32 = 50;
}

/// Default reward shaping
pub mod reward {
    pub const VEHICLE_COLLISION: f32 = -0.1;
    pub const OFFROAD: f32 = -0.1;
    pub const VEHICLE_COLLISION_POST_RESPAWN: f32 = -0.1;
    pub const GOAL: f32 = 1.0;
    pub const GOAL_POST_RESPAWN: f32 = 0.25;
    /// Granted whenever distance to goal shrank since the previous tick
    pub const PROGRESSION: f32 = 0.01;
    /// Granted while farther than `EXPERT_DISTANCE_THRESHOLD` from the reference
    pub const EXPERT_DISTANCE: f32 = 0.0;
    pub const EXPERT_DISTANCE_THRESHOLD: f32 = 1.5;
    /// Multiplies the running average displacement error
    pub const ADE: f32 = 0.0;
}

/// Discrete action tables
pub mod action {
    pub const ACCELERATION_VALUES: [f32; 7] = [-4.0, -2.667, -1.333, 0.0, 1.333, 2.667, 4.0];
    pub const STEERING_VALUES: [f32; 13] = [
        -1.0, -0.833, -0.667, -0.5, -0.333, -0.167, 0.0, 0.167, 0.333, 0.5, 0.667, 0.833, 1.0,
    ];
}

/// Trajectory planner and tracking controller
pub mod planner {
    /// Parameters per trajectory action (6 longitudinal + 6 lateral)
    pub const TRAJECTORY_PARAMS: usize = 12;
    /// Per-coefficient scale, lowest order first, longitudinal then lateral
    pub const SCALING_FACTORS: [f32; TRAJECTORY_PARAMS] = [
        0.0, 0.0, 2.0, 0.0, 0.0, 0.0, //
        0.0, 3.0, 10.0, 0.0, 0.0, 0.0,
    ];
    pub const KP_SPEED: f32 = 1.0;
    pub const KP_STEERING: f32 = 2.5;
    pub const MAX_ACCEL: f32 = 4.0;
    pub const MAX_STEERING: f32 = 1.0;
    /// Acceleration emitted when the tracked waypoint is behind the vehicle
    pub const BRAKE_ACCEL: f32 = -4.0;
    pub const LOOK_AHEAD: usize = 0;
}

/// Dream rollout defaults
pub mod dream {
    /// Speculative horizon (also the number of planned waypoints)
    pub const DREAMING_STEPS: usize = 10;
    /// Real steps committed after each dream
    pub const COMMITTED_STEPS: usize = 1;
    /// Bonus per remaining horizon tick when an agent respawns mid-dream
    pub const RESPAWN_BONUS: f32 = 0.015;
}

/// Observation normalisation
pub mod observation {
    pub const EGO_FEATURES: usize = 7;
    pub const PARTNER_FEATURES: usize = 7;
    pub const ROAD_FEATURES: usize = 7;
    pub const MAX_VEH_LEN: f32 = 30.0;
    pub const MAX_VEH_WIDTH: f32 = 15.0;
    pub const MAX_ROAD_SCALE: f32 = 100.0;
    pub const MAX_ROAD_SEGMENT_LENGTH: f32 = 100.0;
    pub const GOAL_SCALE: f32 = 0.005;
    pub const SPEED_SCALE: f32 = 0.01;
    pub const POSITION_SCALE: f32 = 0.02;
    /// Squared distance beyond which partner cars are not observed
    pub const PARTNER_RANGE_SQ: f32 = 2500.0;
    /// Nominal road segment width
    pub const ROAD_WIDTH: f32 = 0.1;
}

/// Flat observation length for a given car/road capacity
pub fn observation_size(max_cars: usize, max_road_observations: usize) -> usize {
    observation::EGO_FEATURES
        + observation::PARTNER_FEATURES * max_cars.saturating_sub(1)
        + observation::ROAD_FEATURES * max_road_observations
}
