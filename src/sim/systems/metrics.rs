//! Per-agent collision, road and displacement metrics
//!
//! `assess` only reads the world; `apply` writes the result onto the agent.
//! Offroad takes precedence over a vehicle collision in the same tick.

use crate::sim::constants::collision::{
    LANE_ALIGNED_ANGLE, LANE_ALIGN_DIST_SQ, LANE_CANDIDATE_ANGLE, LANE_SEARCH_DIST_SQ, PREFILTER_DIST_SQ,
};
use crate::sim::entity::{CollisionState, Entity};
use crate::sim::spatial::RoadIndex;
use crate::sim::systems::collision::{first_vehicle_collision, lane_aligned, scan_road, LaneThresholds, OrientedBox};

/// World facts a metrics pass reads
#[derive(Debug, Clone, Copy)]
pub struct MetricsContext<'a> {
    pub roads: &'a RoadIndex,
    /// Collision candidates: active agents then static cars
    pub cars: &'a [usize],
    pub timestep: u32,
    pub spawn_immunity_ticks: u32,
}

impl MetricsContext<'_> {
    #[inline]
    fn immune(&self, entity: &Entity) -> bool {
        entity
            .state
            .ticks_since_respawn(self.timestep)
            .is_some_and(|ticks| ticks < self.spawn_immunity_ticks)
    }
}

/// Outcome of one metrics pass for one agent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Assessment {
    pub collision_state: CollisionState,
    /// Car whose box overlapped the agent, before immunity
    pub hit: Option<usize>,
    /// The overlap was forgiven by spawn immunity
    pub suppressed: bool,
    pub lane_aligned: bool,
    /// Distance to this tick's reference sample, when positive and usable
    pub displacement: Option<f32>,
}

pub fn assess(ctx: &MetricsContext, entities: &[Entity], agent_idx: usize) -> Assessment {
    let agent = &entities[agent_idx];
    let mut out = Assessment::default();
    if agent.state.is_absent() {
        return out;
    }

    out.displacement = agent
        .displacement_error(ctx.timestep as usize)
        .filter(|&d| d > 0.0);

    let bx = OrientedBox::of(agent);
    let scan = scan_road(
        &bx,
        agent.state.heading,
        entities,
        ctx.roads.nearby(agent.state.position),
        LaneThresholds {
            search_dist_sq: LANE_SEARCH_DIST_SQ,
            candidate_angle: LANE_CANDIDATE_ANGLE,
        },
    );

    out.lane_aligned = match scan.closest_lane {
        Some((seg, dist_sq)) if dist_sq <= LANE_ALIGN_DIST_SQ => lane_aligned(
            agent.state.heading,
            &entities[seg.entity_index()].trajectory,
            seg.segment_index(),
            LANE_ALIGNED_ANGLE,
        ),
        _ => false,
    };

    if scan.offroad {
        out.collision_state = CollisionState::Offroad;
        return out;
    }

    out.hit = first_vehicle_collision(entities, agent_idx, ctx.cars, PREFILTER_DIST_SQ);
    if let Some(other) = out.hit {
        out.suppressed = ctx.immune(agent) || ctx.immune(&entities[other]);
        if !out.suppressed {
            out.collision_state = CollisionState::Vehicle;
        }
    }
    out
}

/// Write an assessment onto the agent's live state
pub fn apply(entity: &mut Entity, assessment: &Assessment) {
    let state = &mut entity.state;
    state.collision_state = assessment.collision_state;
    state.metrics.collision = assessment.collision_state == CollisionState::Vehicle;
    state.metrics.offroad = assessment.collision_state == CollisionState::Offroad;
    state.metrics.lane_aligned = assessment.lane_aligned;

    if let Some(d) = assessment.displacement {
        state.cumulative_displacement += d;
        state.displacement_samples += 1;
    }
    state.metrics.avg_displacement_error = if state.displacement_samples > 0 {
        state.cumulative_displacement / state.displacement_samples as f32
    } else {
        0.0
    };
}

/// Assess and apply in one go
pub fn update_agent(ctx: &MetricsContext, entities: &mut [Entity], agent_idx: usize) -> Assessment {
    let assessment = assess(ctx, entities, agent_idx);
    apply(&mut entities[agent_idx], &assessment);
    assessment
}
