//! Per-agent observation encoding
//!
//! Layout of one agent's vector, all positions in the ego frame:
//! - ego block (7): goal x/y, speed, width, length, collided, respawned
//! - `max_cars - 1` partner blocks (7): x, y, width, length, cos/sin of
//!   relative heading, speed
//! - `max_road_observations` road blocks (7): midpoint x/y, half length,
//!   width, cos/sin of relative direction, kind code - 4
//!
//! Unused blocks are zero.

use crate::sim::constants::observation::{
    EGO_FEATURES, GOAL_SCALE, MAX_ROAD_SCALE, MAX_ROAD_SEGMENT_LENGTH, MAX_VEH_LEN, MAX_VEH_WIDTH,
    PARTNER_FEATURES, PARTNER_RANGE_SQ, POSITION_SCALE, ROAD_FEATURES, ROAD_WIDTH, SPEED_SCALE,
};
use crate::sim::entity::{Entity, EntityKind};
use crate::sim::spatial::RoadIndex;
use crate::sim::world::Simulation;

/// Block counts of the flat vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationLayout {
    pub max_partners: usize,
    pub max_roads: usize,
    /// Partner speed normaliser
    pub max_speed: f32,
}

impl ObservationLayout {
    #[inline]
    pub fn size(&self) -> usize {
        EGO_FEATURES + PARTNER_FEATURES * self.max_partners + ROAD_FEATURES * self.max_roads
    }

    #[inline]
    fn roads_offset(&self) -> usize {
        EGO_FEATURES + PARTNER_FEATURES * self.max_partners
    }
}

/// Encode the observation of `entities[ego_idx]` into `out`
///
/// `out` must hold `layout.size()` floats; it is fully overwritten.
pub fn encode(
    entities: &[Entity],
    roads: &RoadIndex,
    cars: &[usize],
    ego_idx: usize,
    layout: &ObservationLayout,
    out: &mut [f32],
) {
    out.fill(0.0);
    let ego = &entities[ego_idx];
    let state = &ego.state;
    if !ego.kind.is_actor() {
        return;
    }
    let (cos, sin) = (state.heading_cos, state.heading_sin);
    let respawned = state.respawn_timestep.is_some();

    let goal = (ego.goal - state.position).into_frame(cos, sin);
    out[0] = goal.x * GOAL_SCALE;
    out[1] = goal.y * GOAL_SCALE;
    out[2] = state.speed() * SPEED_SCALE;
    out[3] = ego.width / MAX_VEH_WIDTH;
    out[4] = ego.length / MAX_VEH_LEN;
    out[5] = state.collision_state.is_collided() as u8 as f32;
    out[6] = respawned as u8 as f32;

    // A respawned ego sees no partners
    if !respawned {
        let mut seen = 0;
        for &other_idx in cars {
            if seen == layout.max_partners {
                break;
            }
            if other_idx == ego_idx {
                continue;
            }
            let other = &entities[other_idx];
            if other.state.respawn_timestep.is_some() {
                continue;
            }
            let offset = other.state.position - state.position;
            if offset.length_sq() > PARTNER_RANGE_SQ {
                continue;
            }

            let rel = offset.into_frame(cos, sin);
            let block = &mut out[EGO_FEATURES + seen * PARTNER_FEATURES..][..PARTNER_FEATURES];
            block[0] = rel.x * POSITION_SCALE;
            block[1] = rel.y * POSITION_SCALE;
            block[2] = other.width / MAX_VEH_WIDTH;
            block[3] = other.length / MAX_VEH_LEN;
            // cos/sin of (other - ego)
            block[4] = other.state.heading_cos * cos + other.state.heading_sin * sin;
            block[5] = other.state.heading_sin * cos - other.state.heading_cos * sin;
            block[6] = other.state.speed() / layout.max_speed;
            seen += 1;
        }
    }

    let base = layout.roads_offset();
    for (k, seg) in roads.observe(state.position, layout.max_roads).iter().enumerate() {
        let road = &entities[seg.entity_index()];
        let (start, end) = road.trajectory.segment(seg.segment_index());
        let mid = start.midpoint(end);
        let rel = (mid - state.position).into_frame(cos, sin);
        let half = end - mid;
        let dir = half.normalize().into_frame(cos, sin);

        let block = &mut out[base + k * ROAD_FEATURES..][..ROAD_FEATURES];
        block[0] = rel.x * POSITION_SCALE;
        block[1] = rel.y * POSITION_SCALE;
        block[2] = half.length() / MAX_ROAD_SEGMENT_LENGTH;
        block[3] = ROAD_WIDTH / MAX_ROAD_SCALE;
        block[4] = dir.x;
        block[5] = dir.y;
        block[6] = (road.kind.code() - EntityKind::RoadLane.code()) as f32;
    }
}

impl Simulation {
    pub(crate) fn observation_layout(&self) -> ObservationLayout {
        ObservationLayout {
            max_partners: self.config.max_cars.saturating_sub(1),
            max_roads: self.config.max_road_observations,
            max_speed: self.config.max_speed,
        }
    }

    /// Rebuild every agent's observation
    pub(crate) fn compute_observations(&mut self) {
        let layout = self.observation_layout();
        let size = self.observation_size;
        if size == 0 {
            return;
        }
        for (&idx, out) in self.roster.active.iter().zip(self.observations.chunks_exact_mut(size)) {
            encode(&self.entities, &self.roads, &self.roster.cars, idx, &layout, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::map::{MapBuilder, VehicleSpec};
    use crate::sim::spatial::GridParams;
    use crate::util::vec2::Vec2;

    fn layout() -> ObservationLayout {
        ObservationLayout {
            max_partners: 3,
            max_roads: 4,
            max_speed: 100.0,
        }
    }

    fn world(builder: MapBuilder) -> (Vec<Entity>, RoadIndex) {
        let mut entities = builder.build().entities;
        for e in entities.iter_mut() {
            e.follow_reference(0);
            if let Some(&vx) = e.trajectory.vx.first() {
                e.state.velocity = Vec2::new(vx, e.trajectory.vy[0]);
            }
        }
        let roads = RoadIndex::build(
            &entities,
            &GridParams {
                cell_size: 5.0,
                max_segments_per_cell: 10,
                vision_range: 21,
                collision_window: 5,
            },
        );
        (entities, roads)
    }

    #[test]
    fn test_layout_size() {
        assert_eq!(layout().size(), 7 + 21 + 28);
    }

    #[test]
    fn test_ego_block() {
        let (entities, roads) = world(
            MapBuilder::new(5).vehicle(
                VehicleSpec::new(Vec2::ZERO, std::f32::consts::FRAC_PI_2, Vec2::new(0.0, 100.0))
                    .with_speed(20.0)
                    .with_size(6.0, 3.0),
            ),
        );
        let mut out = vec![1.0; layout().size()];
        encode(&entities, &roads, &[0], 0, &layout(), &mut out);
        // Goal straight ahead in the ego frame
        assert!((out[0] - 0.5).abs() < 1e-5);
        assert!(out[1].abs() < 1e-5);
        assert!((out[2] - 0.2).abs() < 1e-5);
        assert!((out[3] - 0.2).abs() < 1e-6);
        assert!((out[4] - 0.2).abs() < 1e-6);
        assert_eq!(out[5], 0.0);
        assert_eq!(out[6], 0.0);
        assert!(out[7..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_partner_blocks() {
        let (mut entities, roads) = world(
            MapBuilder::new(5)
                .vehicle(VehicleSpec::new(Vec2::ZERO, 0.0, Vec2::new(50.0, 0.0)))
                .vehicle(VehicleSpec::new(Vec2::new(10.0, 5.0), std::f32::consts::FRAC_PI_2, Vec2::ZERO).with_speed(10.0))
                .vehicle(VehicleSpec::new(Vec2::new(60.0, 0.0), 0.0, Vec2::ZERO))
                .vehicle(VehicleSpec::new(Vec2::new(-5.0, 0.0), 0.0, Vec2::ZERO)),
        );
        entities[3].state.respawn_timestep = Some(1);
        let mut out = vec![0.0; layout().size()];
        encode(&entities, &roads, &[0, 1, 2, 3], 0, &layout(), &mut out);

        let block = &out[7..14];
        assert!((block[0] - 0.2).abs() < 1e-5);
        assert!((block[1] - 0.1).abs() < 1e-5);
        assert!(block[4].abs() < 1e-5);
        assert!((block[5] - 1.0).abs() < 1e-5);
        assert!((block[6] - 0.1).abs() < 1e-5);
        // Out of range and respawned partners are omitted
        assert!(out[14..28].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_respawned_ego_sees_no_partners() {
        let (mut entities, roads) = world(
            MapBuilder::new(5)
                .vehicle(VehicleSpec::new(Vec2::ZERO, 0.0, Vec2::new(50.0, 0.0)))
                .vehicle(VehicleSpec::new(Vec2::new(10.0, 0.0), 0.0, Vec2::ZERO)),
        );
        entities[0].state.respawn_timestep = Some(3);
        let mut out = vec![0.0; layout().size()];
        encode(&entities, &roads, &[0, 1], 0, &layout(), &mut out);
        assert_eq!(out[6], 1.0);
        assert!(out[7..28].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_partner_cap() {
        let mut builder = MapBuilder::new(5).vehicle(VehicleSpec::new(Vec2::ZERO, 0.0, Vec2::new(50.0, 0.0)));
        for i in 1..=6 {
            builder = builder.vehicle(VehicleSpec::new(Vec2::new(0.0, 5.0 * i as f32), 0.0, Vec2::ZERO));
        }
        let (entities, roads) = world(builder);
        let cars: Vec<usize> = (0..7).collect();
        let mut out = vec![0.0; layout().size()];
        encode(&entities, &roads, &cars, 0, &layout(), &mut out);
        // Three partner slots, filled in candidate order
        assert!((out[7 + 1] - 0.1).abs() < 1e-5);
        assert!((out[14 + 1] - 0.2).abs() < 1e-5);
        assert!((out[21 + 1] - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_road_blocks() {
        let (entities, roads) = world(
            MapBuilder::new(5)
                .vehicle(VehicleSpec::new(Vec2::ZERO, 0.0, Vec2::new(50.0, 0.0)))
                .road(EntityKind::RoadEdge, &[Vec2::new(-4.0, 4.0), Vec2::new(4.0, 4.0)])
                .road(EntityKind::RoadLine, &[Vec2::new(-4.0, -4.0), Vec2::new(-4.0, -2.0)]),
        );
        let mut out = vec![0.0; layout().size()];
        encode(&entities, &roads, &[0], 0, &layout(), &mut out);

        let base = 7 + 21;
        let blocks: Vec<&[f32]> = out[base..].chunks(7).collect();
        let edge = blocks
            .iter()
            .find(|b| b[6] == 2.0)
            .expect("edge block");
        assert!(edge[0].abs() < 1e-5);
        assert!((edge[1] - 0.08).abs() < 1e-5);
        assert!((edge[2] - 0.04).abs() < 1e-5);
        assert!((edge[3] - 0.001).abs() < 1e-7);
        assert!((edge[4] - 1.0).abs() < 1e-5);
        let line = blocks.iter().find(|b| b[6] == 1.0).expect("line block");
        assert!((line[5] - 1.0).abs() < 1e-5);
        assert_eq!(blocks.iter().filter(|b| b.iter().any(|&v| v != 0.0)).count(), 2);
    }

    #[test]
    fn test_simulation_observations() {
        let map = MapBuilder::new(20)
            .vehicle(VehicleSpec::new(Vec2::ZERO, 0.0, Vec2::new(50.0, 0.0)))
            .vehicle(VehicleSpec::new(Vec2::new(0.0, 10.0), 0.0, Vec2::new(50.0, 10.0)))
            .build();
        let sim = Simulation::from_map(crate::config::SimConfig::default(), map).unwrap();
        assert_eq!(sim.observations().len(), 2 * sim.observation_size());
        let obs = sim.observation(0).unwrap();
        // Goal distance 50 along heading
        assert!((obs[0] - 0.25).abs() < 1e-4);
        assert!(sim.observation(2).is_none());
    }
}
