//! Vehicle and road collision geometry
//!
//! Oriented boxes are tested with the separating axis theorem over the four
//! box axes; road edges are tested segment-against-box-edge.

use crate::sim::entity::{Entity, EntityKind, Trajectory};
use crate::sim::spatial::SegmentRef;
use crate::util::vec2::{angle_between, Vec2};

/// Corner sign pattern walking the box perimeter
const CORNER_SIGNS: [(f32, f32); 4] = [(-1.0, 1.0), (1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)];

/// Oriented bounding box of a vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub center: Vec2,
    pub half_length: f32,
    pub half_width: f32,
    pub cos: f32,
    pub sin: f32,
}

impl OrientedBox {
    pub fn new(center: Vec2, heading: f32, length: f32, width: f32) -> Self {
        Self {
            center,
            half_length: length * 0.5,
            half_width: width * 0.5,
            cos: heading.cos(),
            sin: heading.sin(),
        }
    }

    /// Box of an entity at its live pose, using the cached heading
    pub fn of(entity: &Entity) -> Self {
        Self {
            center: entity.state.position,
            half_length: entity.length * 0.5,
            half_width: entity.width * 0.5,
            cos: entity.state.heading_cos,
            sin: entity.state.heading_sin,
        }
    }

    /// Corners in perimeter order
    pub fn corners(&self) -> [Vec2; 4] {
        CORNER_SIGNS.map(|(sl, sw)| {
            self.center + Vec2::new(sl * self.half_length, sw * self.half_width).rotate_by(self.cos, self.sin)
        })
    }

    /// Length axis then width axis
    #[inline]
    pub fn axes(&self) -> [Vec2; 2] {
        [Vec2::new(self.cos, self.sin), Vec2::new(-self.sin, self.cos)]
    }

    /// The four perimeter edges
    pub fn edges(&self) -> [(Vec2, Vec2); 4] {
        let c = self.corners();
        [(c[0], c[1]), (c[1], c[2]), (c[2], c[3]), (c[3], c[0])]
    }
}

fn project(corners: &[Vec2; 4], axis: Vec2) -> (f32, f32) {
    corners.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
        let p = c.dot(axis);
        (lo.min(p), hi.max(p))
    })
}

/// Separating axis test; touching boxes overlap
pub fn boxes_overlap(a: &OrientedBox, b: &OrientedBox) -> bool {
    let ca = a.corners();
    let cb = b.corners();
    let [a0, a1] = a.axes();
    let [b0, b1] = b.axes();
    for axis in [a0, a1, b0, b1] {
        let (min_a, max_a) = project(&ca, axis);
        let (min_b, max_b) = project(&cb, axis);
        if max_a < min_b || min_a > max_b {
            return false;
        }
    }
    true
}

/// Proper or touching intersection of segments p and q; parallel segments never intersect
pub fn segments_intersect(p1: Vec2, p2: Vec2, q1: Vec2, q2: Vec2) -> bool {
    if p1.x.max(p2.x) < q1.x.min(q2.x)
        || p1.x.min(p2.x) > q1.x.max(q2.x)
        || p1.y.max(p2.y) < q1.y.min(q2.y)
        || p1.y.min(p2.y) > q1.y.max(q2.y)
    {
        return false;
    }

    let d1 = p2 - p1;
    let d2 = q2 - q1;
    let cross = d1.cross(d2);
    if cross == 0.0 {
        return false;
    }
    let d3 = p1 - q1;
    let s = d1.cross(d3) / cross;
    let t = d2.cross(d3) / cross;
    (0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t)
}

/// Any box edge crosses the segment
pub fn box_crosses_segment(bx: &OrientedBox, start: Vec2, end: Vec2) -> bool {
    bx.edges()
        .iter()
        .any(|&(a, b)| segments_intersect(a, b, start, end))
}

/// First car in `candidates` whose box overlaps the agent's
///
/// Candidates farther than `sqrt(prefilter_dist_sq)` skip the SAT test.
/// The scan is order dependent: the first overlap wins.
pub fn first_vehicle_collision(
    entities: &[Entity],
    agent_idx: usize,
    candidates: &[usize],
    prefilter_dist_sq: f32,
) -> Option<usize> {
    let agent = &entities[agent_idx];
    if agent.state.is_absent() {
        return None;
    }
    let agent_box = OrientedBox::of(agent);
    candidates.iter().copied().find(|&idx| {
        if idx == agent_idx {
            return false;
        }
        let other = &entities[idx];
        if other.state.position.distance_sq_to(agent.state.position) > prefilter_dist_sq {
            return false;
        }
        boxes_overlap(&agent_box, &OrientedBox::of(other))
    })
}

/// Result of scanning nearby road segments
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoadScan {
    pub offroad: bool,
    /// Closest heading-compatible lane segment and its squared distance
    pub closest_lane: Option<(SegmentRef, f32)>,
}

/// Thresholds for `scan_road`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneThresholds {
    pub search_dist_sq: f32,
    pub candidate_angle: f32,
}

/// Offroad and closest-lane scan over `nearby`
///
/// The first road-edge crossing sets offroad and ends the scan.
pub fn scan_road(
    bx: &OrientedBox,
    heading: f32,
    entities: &[Entity],
    nearby: &[SegmentRef],
    lanes: LaneThresholds,
) -> RoadScan {
    let mut scan = RoadScan::default();
    let mut best = lanes.search_dist_sq;

    for &seg in nearby {
        let road = &entities[seg.entity_index()];
        let (start, end) = road.trajectory.segment(seg.segment_index());
        match road.kind {
            EntityKind::RoadEdge => {
                if box_crosses_segment(bx, start, end) {
                    scan.offroad = true;
                    break;
                }
            }
            EntityKind::RoadLane => {
                let dist_sq = start.distance_sq_to(bx.center);
                let lane_heading = (end - start).angle();
                if dist_sq < best && angle_between(heading, lane_heading) < lanes.candidate_angle {
                    best = dist_sq;
                    scan.closest_lane = Some((seg, dist_sq));
                }
            }
            _ => {}
        }
    }
    scan
}

/// Lane direction at `segment`, averaged with the previous segment
pub fn lane_heading(traj: &Trajectory, segment: usize) -> f32 {
    let segment = segment.min(traj.len().saturating_sub(2));
    let (start, end) = traj.segment(segment);
    let current = (end - start).normalize();
    let previous = if segment > 0 {
        let (s, e) = traj.segment(segment - 1);
        (e - s).normalize()
    } else {
        current
    };
    let blended = previous + current;
    if blended.length_sq() > 0.0 {
        blended.angle()
    } else {
        current.angle()
    }
}

/// Heading within `max_angle` of the local lane direction
pub fn lane_aligned(heading: f32, traj: &Trajectory, segment: usize, max_angle: f32) -> bool {
    if traj.len() < 2 {
        return false;
    }
    angle_between(heading, lane_heading(traj, segment)) < max_angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::map::{MapBuilder, VehicleSpec};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_6, PI};

    #[test]
    fn test_corners_axis_aligned() {
        let bx = OrientedBox::new(Vec2::new(1.0, 1.0), 0.0, 4.0, 2.0);
        let c = bx.corners();
        assert!(c[0].approx_eq(Vec2::new(-1.0, 2.0), 1e-6));
        assert!(c[1].approx_eq(Vec2::new(3.0, 2.0), 1e-6));
        assert!(c[2].approx_eq(Vec2::new(3.0, 0.0), 1e-6));
        assert!(c[3].approx_eq(Vec2::new(-1.0, 0.0), 1e-6));
    }

    #[test]
    fn test_boxes_one_metre_apart_collide() {
        let a = OrientedBox::new(Vec2::new(0.0, 0.0), 0.0, 4.0, 2.0);
        let b = OrientedBox::new(Vec2::new(1.0, 0.0), 0.0, 4.0, 2.0);
        assert!(boxes_overlap(&a, &b));
        assert!(boxes_overlap(&b, &a));
    }

    #[test]
    fn test_identical_boxes_collide() {
        let a = OrientedBox::new(Vec2::new(3.0, -7.0), 1.1, 4.5, 1.8);
        assert!(boxes_overlap(&a, &a));
    }

    #[test]
    fn test_separated_boxes() {
        let a = OrientedBox::new(Vec2::new(0.0, 0.0), 0.0, 4.0, 2.0);
        let b = OrientedBox::new(Vec2::new(0.0, 2.5), 0.0, 4.0, 2.0);
        assert!(!boxes_overlap(&a, &b));
        // Rotated 45 degrees the diagonal no longer reaches
        let c = OrientedBox::new(Vec2::new(4.0, 3.0), PI / 4.0, 2.0, 2.0);
        assert!(!boxes_overlap(&a, &c));
    }

    #[test]
    fn test_sat_symmetry_random() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut hits = 0;
        for _ in 0..5000 {
            let a = OrientedBox::new(
                Vec2::new(rng.gen_range(-6.0..6.0), rng.gen_range(-6.0..6.0)),
                rng.gen_range(-PI..PI),
                rng.gen_range(0.5..6.0),
                rng.gen_range(0.5..3.0),
            );
            let b = OrientedBox::new(
                Vec2::new(rng.gen_range(-6.0..6.0), rng.gen_range(-6.0..6.0)),
                rng.gen_range(-PI..PI),
                rng.gen_range(0.5..6.0),
                rng.gen_range(0.5..3.0),
            );
            let ab = boxes_overlap(&a, &b);
            assert_eq!(ab, boxes_overlap(&b, &a));
            assert!(boxes_overlap(&a, &a));
            hits += ab as usize;
        }
        // Both outcomes were exercised
        assert!(hits > 0 && hits < 5000);
    }

    #[test]
    fn test_segments_intersect() {
        let o = Vec2::ZERO;
        assert!(segments_intersect(o, Vec2::new(2.0, 2.0), Vec2::new(0.0, 2.0), Vec2::new(2.0, 0.0)));
        // Touching at an endpoint
        assert!(segments_intersect(o, Vec2::new(1.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 5.0)));
        // Disjoint
        assert!(!segments_intersect(o, Vec2::new(1.0, 0.0), Vec2::new(2.0, -1.0), Vec2::new(2.0, 1.0)));
        // Collinear overlap counts as parallel
        assert!(!segments_intersect(o, Vec2::new(2.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(3.0, 0.0)));
    }

    #[test]
    fn test_box_crosses_segment() {
        let bx = OrientedBox::new(Vec2::ZERO, 0.0, 4.0, 2.0);
        assert!(box_crosses_segment(&bx, Vec2::new(-5.0, 0.5), Vec2::new(5.0, 0.5)));
        assert!(!box_crosses_segment(&bx, Vec2::new(-5.0, 3.0), Vec2::new(5.0, 3.0)));
        // Fully inside the box touches no edge
        assert!(!box_crosses_segment(&bx, Vec2::new(-0.5, 0.0), Vec2::new(0.5, 0.0)));
    }

    fn placed_cars(positions: &[Vec2]) -> Vec<Entity> {
        let mut builder = MapBuilder::new(2);
        for &p in positions {
            builder = builder.vehicle(VehicleSpec::new(p, 0.0, Vec2::ZERO).with_size(4.0, 2.0));
        }
        let mut entities = builder.build().entities;
        for e in &mut entities {
            e.follow_reference(0);
        }
        entities
    }

    #[test]
    fn test_first_vehicle_collision_order() {
        let entities = placed_cars(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(30.0, 0.0),
            Vec2::new(1.5, 0.0),
            Vec2::new(-1.5, 0.0),
        ]);
        let candidates = [0, 1, 2, 3];
        assert_eq!(first_vehicle_collision(&entities, 0, &candidates, 225.0), Some(2));
        let reversed = [3, 2, 1, 0];
        assert_eq!(first_vehicle_collision(&entities, 0, &reversed, 225.0), Some(3));
        assert_eq!(first_vehicle_collision(&entities, 1, &candidates, 225.0), None);
    }

    #[test]
    fn test_prefilter_skips_far_cars() {
        let entities = placed_cars(&[Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)]);
        assert_eq!(first_vehicle_collision(&entities, 0, &[0, 1], 0.5), None);
    }

    fn lane_road(points: &[Vec2]) -> Vec<Entity> {
        MapBuilder::new(2).road(EntityKind::RoadLane, points).build().entities
    }

    #[test]
    fn test_lane_heading_averages_segments() {
        let entities = lane_road(&[Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(2.0, 1.0)]);
        let traj = &entities[0].trajectory;
        assert!(lane_heading(traj, 0).abs() < 1e-6);
        assert!((lane_heading(traj, 1) - PI / 8.0).abs() < 1e-5);
    }

    #[test]
    fn test_lane_heading_across_pi() {
        // Both segments point roughly along -x; naive averaging would give ~0
        let entities = lane_road(&[Vec2::new(0.0, 0.0), Vec2::new(-1.0, 0.01), Vec2::new(-2.0, 0.0)]);
        let h = lane_heading(&entities[0].trajectory, 1);
        assert!(angle_between(h, PI) < 0.05);
    }

    #[test]
    fn test_lane_aligned() {
        let entities = lane_road(&[Vec2::ZERO, Vec2::new(10.0, 0.0)]);
        let traj = &entities[0].trajectory;
        assert!(lane_aligned(0.2, traj, 0, FRAC_PI_6));
        assert!(!lane_aligned(0.6, traj, 0, FRAC_PI_6));
        assert!(!lane_aligned(PI, traj, 0, FRAC_PI_6));
    }

    #[test]
    fn test_scan_road_offroad_short_circuits() {
        let entities = MapBuilder::new(2)
            .road(EntityKind::RoadEdge, &[Vec2::new(-5.0, 0.5), Vec2::new(5.0, 0.5)])
            .road(EntityKind::RoadLane, &[Vec2::new(0.0, 0.0), Vec2::new(5.0, 0.0)])
            .build()
            .entities;
        let bx = OrientedBox::new(Vec2::ZERO, 0.0, 4.0, 2.0);
        let thresholds = LaneThresholds {
            search_dist_sq: 100.0,
            candidate_angle: FRAC_PI_2,
        };
        let edge_first = [SegmentRef::new(0, 0), SegmentRef::new(1, 0)];
        let scan = scan_road(&bx, 0.0, &entities, &edge_first, thresholds);
        assert!(scan.offroad);
        assert!(scan.closest_lane.is_none());

        let lane_first = [SegmentRef::new(1, 0), SegmentRef::new(0, 0)];
        let scan = scan_road(&bx, 0.0, &entities, &lane_first, thresholds);
        assert!(scan.offroad);
        assert_eq!(scan.closest_lane, Some((SegmentRef::new(1, 0), 0.0)));
    }

    #[test]
    fn test_scan_road_rejects_opposing_lane() {
        let entities = MapBuilder::new(2)
            .road(EntityKind::RoadLane, &[Vec2::new(1.0, 0.0), Vec2::new(-4.0, 0.0)])
            .road(EntityKind::RoadLane, &[Vec2::new(0.0, 2.0), Vec2::new(5.0, 2.0)])
            .build()
            .entities;
        let bx = OrientedBox::new(Vec2::ZERO, 0.0, 4.0, 2.0);
        let thresholds = LaneThresholds {
            search_dist_sq: 100.0,
            candidate_angle: FRAC_PI_2,
        };
        let nearby = [SegmentRef::new(0, 0), SegmentRef::new(1, 0)];
        let scan = scan_road(&bx, 0.0, &entities, &nearby, thresholds);
        assert!(!scan.offroad);
        assert_eq!(scan.closest_lane, Some((SegmentRef::new(1, 0), 4.0)));
    }
}
