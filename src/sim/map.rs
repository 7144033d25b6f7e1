//! Binary map loading
//!
//! Layout (little-endian): `i32 num_objects`, `i32 num_roads`, then per entity
//! `i32 type`, `i32 N`, N floats each of x/y/z; actors add N floats each of
//! vx/vy/vz/heading and N `i32` validity flags; every entity ends with
//! `f32` width, length, height, goal x/y/z and `i32 mark_as_expert`.
//!
//! `MapBuilder` produces the same structures (and byte stream) for synthetic
//! scenes.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use tracing::{debug, info};

use crate::sim::constants::clock;
use crate::sim::entity::{Entity, EntityKind, Trajectory};
use crate::util::vec2::Vec2;

/// Upper bound on speculative pre-allocation per array
const PREALLOC_LIMIT: usize = 4096;

/// Map loading errors
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Failed to read map: {0}")]
    Io(#[from] std::io::Error),
    #[error("Map stream ended while reading {0}")]
    Truncated(&'static str),
    #[error("Negative {field} in map header: {value}")]
    NegativeCount { field: &'static str, value: i32 },
    #[error("Entity {index} has invalid array size {size}")]
    BadArraySize { index: usize, size: i32 },
    #[error("Entity {index} has unknown type code {code}")]
    UnknownKind { index: usize, code: i32 },
}

/// Entities of one scene, objects first then road features
#[derive(Debug, Clone)]
pub struct MapData {
    pub num_objects: usize,
    pub num_roads: usize,
    pub entities: Vec<Entity>,
}

/// Load a map file
pub fn load_map(path: impl AsRef<Path>) -> Result<MapData, MapError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let map = read_map(BufReader::new(file))?;
    info!(
        "Loaded map {} ({} objects, {} road features)",
        path.display(),
        map.num_objects,
        map.num_roads
    );
    Ok(map)
}

/// Decode a map from any byte stream
pub fn read_map<R: Read>(reader: R) -> Result<MapData, MapError> {
    let mut reader = MapReader { inner: reader };

    let num_objects = reader.count("num_objects")?;
    let num_roads = reader.count("num_roads")?;
    let total = num_objects + num_roads;

    let mut entities = Vec::with_capacity(total.min(PREALLOC_LIMIT));
    for index in 0..total {
        entities.push(reader.entity(index)?);
    }

    debug!("Decoded {} entities", entities.len());
    Ok(MapData {
        num_objects,
        num_roads,
        entities,
    })
}

struct MapReader<R> {
    inner: R,
}

impl<R: Read> MapReader<R> {
    fn bytes(&mut self, what: &'static str) -> Result<[u8; 4], MapError> {
        let mut buf = [0u8; 4];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(MapError::Truncated(what)),
            Err(e) => Err(MapError::Io(e)),
        }
    }

    fn i32(&mut self, what: &'static str) -> Result<i32, MapError> {
        Ok(i32::from_le_bytes(self.bytes(what)?))
    }

    fn f32(&mut self, what: &'static str) -> Result<f32, MapError> {
        Ok(f32::from_le_bytes(self.bytes(what)?))
    }

    fn count(&mut self, field: &'static str) -> Result<usize, MapError> {
        let value = self.i32(field)?;
        usize::try_from(value).map_err(|_| MapError::NegativeCount { field, value })
    }

    fn floats(&mut self, n: usize, what: &'static str) -> Result<Vec<f32>, MapError> {
        let mut out = Vec::with_capacity(n.min(PREALLOC_LIMIT));
        for _ in 0..n {
            out.push(self.f32(what)?);
        }
        Ok(out)
    }

    fn flags(&mut self, n: usize) -> Result<Vec<bool>, MapError> {
        let mut out = Vec::with_capacity(n.min(PREALLOC_LIMIT));
        for _ in 0..n {
            out.push(self.i32("validity flags")? != 0);
        }
        Ok(out)
    }

    fn entity(&mut self, index: usize) -> Result<Entity, MapError> {
        let code = self.i32("entity type")?;
        let kind = EntityKind::from_code(code).ok_or(MapError::UnknownKind { index, code })?;
        let size = self.i32("array size")?;
        let n = usize::try_from(size).map_err(|_| MapError::BadArraySize { index, size })?;

        let mut traj = Trajectory {
            x: self.floats(n, "x samples")?,
            y: self.floats(n, "y samples")?,
            z: self.floats(n, "z samples")?,
            ..Trajectory::default()
        };
        if kind.is_actor() {
            traj.vx = self.floats(n, "vx samples")?;
            traj.vy = self.floats(n, "vy samples")?;
            traj.vz = self.floats(n, "vz samples")?;
            traj.heading = self.floats(n, "heading samples")?;
            traj.valid = self.flags(n)?;
        }

        let mut entity = Entity::new(kind, traj);
        entity.width = self.f32("width")?;
        entity.length = self.f32("length")?;
        entity.height = self.f32("height")?;
        entity.goal = Vec2::new(self.f32("goal x")?, self.f32("goal y")?);
        entity.goal_z = self.f32("goal z")?;
        entity.mark_as_expert = self.i32("mark_as_expert")? != 0;
        Ok(entity)
    }
}

// ============================================================================
// Synthetic scenes
// ============================================================================

/// Vehicle placed by `MapBuilder`
///
/// Its reference trajectory drives straight along `heading` at `speed`.
#[derive(Debug, Clone)]
pub struct VehicleSpec {
    pub start: Vec2,
    pub heading: f32,
    pub speed: f32,
    pub goal: Vec2,
    pub length: f32,
    pub width: f32,
    pub expert: bool,
}

impl VehicleSpec {
    pub fn new(start: Vec2, heading: f32, goal: Vec2) -> Self {
        Self {
            start,
            heading,
            speed: 0.0,
            goal,
            length: 4.5,
            width: 2.0,
            expert: false,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_size(mut self, length: f32, width: f32) -> Self {
        self.length = length;
        self.width = width;
        self
    }

    pub fn expert(mut self) -> Self {
        self.expert = true;
        self
    }
}

/// Builds scenes in memory for tests, benches and tooling
#[derive(Debug, Clone)]
pub struct MapBuilder {
    episode_length: usize,
    objects: Vec<Entity>,
    roads: Vec<Entity>,
}

impl Default for MapBuilder {
    fn default() -> Self {
        Self::new(clock::EPISODE_LENGTH as usize)
    }
}

impl MapBuilder {
    /// `episode_length` sets the sample count of every actor trajectory
    pub fn new(episode_length: usize) -> Self {
        Self {
            episode_length,
            objects: Vec::new(),
            roads: Vec::new(),
        }
    }

    pub fn vehicle(mut self, spec: VehicleSpec) -> Self {
        let n = self.episode_length;
        let dir = Vec2::from_heading(spec.heading);
        let velocity = dir * spec.speed;
        let mut traj = Trajectory::default();
        for t in 0..n {
            let p = spec.start + velocity * (clock::DT * t as f32);
            traj.x.push(p.x);
            traj.y.push(p.y);
            traj.z.push(0.0);
            traj.vx.push(velocity.x);
            traj.vy.push(velocity.y);
            traj.vz.push(0.0);
            traj.heading.push(spec.heading);
            traj.valid.push(true);
        }

        let mut entity = Entity::new(EntityKind::Vehicle, traj);
        entity.width = spec.width;
        entity.length = spec.length;
        entity.height = 1.5;
        entity.goal = spec.goal;
        entity.mark_as_expert = spec.expert;
        self.objects.push(entity);
        self
    }

    /// Actor with an explicit reference trajectory
    pub fn actor(mut self, kind: EntityKind, traj: Trajectory, length: f32, width: f32, goal: Vec2) -> Self {
        let mut entity = Entity::new(kind, traj);
        entity.length = length;
        entity.width = width;
        entity.goal = goal;
        self.objects.push(entity);
        self
    }

    /// Road polyline through `points`
    pub fn road(mut self, kind: EntityKind, points: &[Vec2]) -> Self {
        let traj = Trajectory {
            x: points.iter().map(|p| p.x).collect(),
            y: points.iter().map(|p| p.y).collect(),
            z: vec![0.0; points.len()],
            ..Trajectory::default()
        };
        self.roads.push(Entity::new(kind, traj));
        self
    }

    pub fn build(self) -> MapData {
        let num_objects = self.objects.len();
        let num_roads = self.roads.len();
        let mut entities = self.objects;
        entities.extend(self.roads);
        MapData {
            num_objects,
            num_roads,
            entities,
        }
    }

    /// Encode the scene in the binary map format
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let put_i32 = |out: &mut Vec<u8>, v: i32| out.extend_from_slice(&v.to_le_bytes());
        let put_f32s = |out: &mut Vec<u8>, vs: &[f32]| {
            for v in vs {
                out.extend_from_slice(&v.to_le_bytes());
            }
        };

        put_i32(&mut out, self.objects.len() as i32);
        put_i32(&mut out, self.roads.len() as i32);
        for entity in self.objects.iter().chain(&self.roads) {
            let traj = &entity.trajectory;
            put_i32(&mut out, entity.kind.code());
            put_i32(&mut out, traj.len() as i32);
            put_f32s(&mut out, &traj.x);
            put_f32s(&mut out, &traj.y);
            put_f32s(&mut out, &traj.z);
            if entity.kind.is_actor() {
                put_f32s(&mut out, &traj.vx);
                put_f32s(&mut out, &traj.vy);
                put_f32s(&mut out, &traj.vz);
                put_f32s(&mut out, &traj.heading);
                for &valid in &traj.valid {
                    put_i32(&mut out, valid as i32);
                }
            }
            put_f32s(
                &mut out,
                &[
                    entity.width,
                    entity.length,
                    entity.height,
                    entity.goal.x,
                    entity.goal.y,
                    entity.goal_z,
                ],
            );
            put_i32(&mut out, entity.mark_as_expert as i32);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_builder() -> MapBuilder {
        MapBuilder::new(5)
            .vehicle(VehicleSpec::new(Vec2::new(1.0, 2.0), 0.5, Vec2::new(20.0, 2.0)).with_speed(3.0))
            .vehicle(VehicleSpec::new(Vec2::new(-4.0, 0.0), 0.0, Vec2::ZERO).expert())
            .road(
                EntityKind::RoadEdge,
                &[Vec2::new(0.0, -5.0), Vec2::new(10.0, -5.0), Vec2::new(20.0, -5.0)],
            )
    }

    #[test]
    fn test_read_encoded_map() {
        let builder = sample_builder();
        let bytes = builder.encode();
        let map = read_map(bytes.as_slice()).unwrap();

        assert_eq!(map.num_objects, 2);
        assert_eq!(map.num_roads, 1);
        assert_eq!(map.entities.len(), 3);

        let car = &map.entities[0];
        assert_eq!(car.kind, EntityKind::Vehicle);
        assert_eq!(car.trajectory.len(), 5);
        assert!((car.trajectory.x[0] - 1.0).abs() < 1e-6);
        assert!((car.trajectory.heading[3] - 0.5).abs() < 1e-6);
        assert!(car.trajectory.valid.iter().all(|&v| v));
        assert!(!car.mark_as_expert);
        assert!(map.entities[1].mark_as_expert);

        let edge = &map.entities[2];
        assert_eq!(edge.kind, EntityKind::RoadEdge);
        assert_eq!(edge.trajectory.len(), 3);
        assert!(edge.trajectory.heading.is_empty());
        assert!(edge.trajectory.valid.is_empty());
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = sample_builder().encode();
        let cut = &bytes[..bytes.len() - 3];
        match read_map(cut) {
            Err(MapError::Truncated(what)) => assert_eq!(what, "mark_as_expert"),
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_negative_header_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            read_map(bytes.as_slice()),
            Err(MapError::NegativeCount { field: "num_objects", value: -1 })
        ));
    }

    #[test]
    fn test_unknown_kind() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&42i32.to_le_bytes());
        assert!(matches!(
            read_map(bytes.as_slice()),
            Err(MapError::UnknownKind { index: 0, code: 42 })
        ));
    }

    #[test]
    fn test_negative_array_size() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&(-3i32).to_le_bytes());
        assert!(matches!(
            read_map(bytes.as_slice()),
            Err(MapError::BadArraySize { index: 0, size: -3 })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_map("/definitely/not/here.bin"),
            Err(MapError::Io(_))
        ));
    }

    #[test]
    fn test_builder_vehicle_reference_moves() {
        let map = MapBuilder::new(3)
            .vehicle(VehicleSpec::new(Vec2::ZERO, 0.0, Vec2::new(9.0, 0.0)).with_speed(10.0))
            .build();
        let traj = &map.entities[0].trajectory;
        assert!((traj.x[2] - 2.0).abs() < 1e-5);
        assert!((traj.vx[0] - 10.0).abs() < 1e-6);
    }
}
