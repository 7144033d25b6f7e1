//! Road grid and neighbor cache
//!
//! Road geometry never moves, so the grid and both window caches are built
//! once per map and shared read-only. Each cell holds a bounded list of
//! (entity, segment) pairs keyed by segment midpoint; overflow is dropped.

use smallvec::SmallVec;
use tracing::debug;

use crate::sim::constants::grid::MAX_SEGMENTS_PER_CELL;
use crate::sim::constants::map::SENTINEL;
use crate::sim::entity::Entity;
use crate::util::vec2::Vec2;

/// One road segment: vertices `segment` and `segment + 1` of `entity`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentRef {
    pub entity: u32,
    pub segment: u32,
}

impl SegmentRef {
    #[inline]
    pub fn new(entity: usize, segment: usize) -> Self {
        Self {
            entity: entity as u32,
            segment: segment as u32,
        }
    }

    #[inline]
    pub fn entity_index(&self) -> usize {
        self.entity as usize
    }

    #[inline]
    pub fn segment_index(&self) -> usize {
        self.segment as usize
    }
}

/// Axis-aligned bounding box of the indexed road vertices
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GridBounds {
    pub min: Vec2,
    pub max: Vec2,
}

/// Grid build parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridParams {
    pub cell_size: f32,
    pub max_segments_per_cell: usize,
    /// Side of the observation window, in cells
    pub vision_range: usize,
    /// Side of the collision/lane window, in cells
    pub collision_window: usize,
}

type Cell = SmallVec<[SegmentRef; MAX_SEGMENTS_PER_CELL]>;

/// Uniform grid over road-segment midpoints
#[derive(Debug, Clone)]
pub struct RoadGrid {
    bounds: Option<GridBounds>,
    cell_size: f32,
    inv_cell_size: f32,
    cols: usize,
    rows: usize,
    capacity: usize,
    cells: Vec<Cell>,
    dropped: usize,
}

impl RoadGrid {
    /// Index every lane, line and edge segment of `entities`
    ///
    /// Sized `floor(extent / cell) + 1` per axis: one cell more than `ceil`
    /// when the extent is a whole number of cells, so a vertex on the max
    /// bound still maps into the grid.
    pub fn build(entities: &[Entity], cell_size: f32, capacity: usize) -> Self {
        let bounds = road_bounds(entities);
        let (cols, rows) = match bounds {
            Some(b) => (
                ((b.max.x - b.min.x) / cell_size).floor() as usize + 1,
                ((b.max.y - b.min.y) / cell_size).floor() as usize + 1,
            ),
            None => (0, 0),
        };

        let mut grid = Self {
            bounds,
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cols,
            rows,
            capacity,
            cells: vec![Cell::new(); cols * rows],
            dropped: 0,
        };

        for (entity_idx, entity) in entities.iter().enumerate() {
            if !entity.kind.is_grid_indexed() {
                continue;
            }
            let traj = &entity.trajectory;
            for segment in 0..traj.len().saturating_sub(1) {
                let (start, end) = traj.segment(segment);
                let Some(cell) = grid.cell_index(start.midpoint(end)) else {
                    continue;
                };
                grid.insert(cell, SegmentRef::new(entity_idx, segment));
            }
        }

        debug!(
            "Road grid {}x{} cells, {} segments dropped at capacity",
            grid.cols, grid.rows, grid.dropped
        );
        grid
    }

    #[inline]
    fn insert(&mut self, cell: usize, segment: SegmentRef) {
        let slot = &mut self.cells[cell];
        if slot.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        slot.push(segment);
    }

    #[inline]
    pub fn bounds(&self) -> Option<GridBounds> {
        self.bounds
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Segments lost to the per-cell capacity
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Cell coordinates of a world position, None outside the grid
    pub fn cell_coords(&self, position: Vec2) -> Option<(usize, usize)> {
        let bounds = self.bounds?;
        let gx = ((position.x - bounds.min.x) * self.inv_cell_size).floor();
        let gy = ((position.y - bounds.min.y) * self.inv_cell_size).floor();
        // Written so NaN falls out of bounds
        if !(gx >= 0.0 && gx < self.cols as f32 && gy >= 0.0 && gy < self.rows as f32) {
            return None;
        }
        Some((gx as usize, gy as usize))
    }

    /// Flat cell index of a world position, None outside the grid
    #[inline]
    pub fn cell_index(&self, position: Vec2) -> Option<usize> {
        self.cell_coords(position).map(|(x, y)| y * self.cols + x)
    }

    #[inline]
    pub fn cell(&self, index: usize) -> &[SegmentRef] {
        &self.cells[index]
    }

    /// Cell at `(x, y)` shifted by `offset`, None when it leaves the grid
    #[inline]
    fn offset_cell(&self, x: usize, y: usize, offset: (i32, i32)) -> Option<usize> {
        let nx = x as i64 + offset.0 as i64;
        let ny = y as i64 + offset.1 as i64;
        if nx < 0 || ny < 0 || nx >= self.cols as i64 || ny >= self.rows as i64 {
            return None;
        }
        Some(ny as usize * self.cols + nx as usize)
    }

    /// Scan the cells around `position` in `offsets` order, up to `max` entries
    pub fn window_scan(&self, position: Vec2, offsets: &[(i32, i32)], max: usize) -> Vec<SegmentRef> {
        let mut out = Vec::new();
        let Some((x, y)) = self.cell_coords(position) else {
            return out;
        };
        for &offset in offsets {
            let Some(cell) = self.offset_cell(x, y, offset) else {
                continue;
            };
            for &segment in self.cell(cell) {
                if out.len() >= max {
                    return out;
                }
                out.push(segment);
            }
        }
        out
    }
}

/// Bounding box of all non-sentinel lane, line and edge vertices
fn road_bounds(entities: &[Entity]) -> Option<GridBounds> {
    let mut bounds: Option<GridBounds> = None;
    for entity in entities.iter().filter(|e| e.kind.is_grid_indexed()) {
        let traj = &entity.trajectory;
        for i in 0..traj.len() {
            if traj.x[i] == SENTINEL || traj.y[i] == SENTINEL {
                continue;
            }
            let p = traj.point(i);
            bounds = Some(match bounds {
                Some(b) => GridBounds {
                    min: b.min.min(p),
                    max: b.max.max(p),
                },
                None => GridBounds { min: p, max: p },
            });
        }
    }
    bounds
}

/// Center-out spiral over a `side` x `side` window (right, up, left, down)
pub fn spiral_offsets(side: usize) -> Vec<(i32, i32)> {
    let total = side * side;
    let half = (side / 2) as i32;
    let mut offsets = Vec::with_capacity(total);
    if total == 0 {
        return offsets;
    }
    offsets.push((0, 0));

    const DIRS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];
    let (mut x, mut y) = (0i32, 0i32);
    let mut dir = 0;
    let mut run = 1;
    let mut taken = 0;
    let mut turns = 0;
    while offsets.len() < total {
        x += DIRS[dir].0;
        y += DIRS[dir].1;
        if x.abs() <= half && y.abs() <= half {
            offsets.push((x, y));
        }
        taken += 1;
        if taken == run {
            taken = 0;
            dir = (dir + 1) % 4;
            turns += 1;
            if turns % 2 == 0 {
                run += 1;
            }
        }
    }
    offsets
}

/// Row-major scan over a `side` x `side` window
pub fn window_offsets(side: usize) -> Vec<(i32, i32)> {
    let half = (side / 2) as i32;
    let mut offsets = Vec::with_capacity(side * side);
    for dy in -half..=half {
        for dx in -half..=half {
            offsets.push((dx, dy));
        }
    }
    offsets
}

/// Per-cell precomputed union of the segments in a fixed window
///
/// All entries live in one contiguous array; `starts[c]..starts[c + 1]` is
/// the slice belonging to cell `c`.
#[derive(Debug, Clone)]
pub struct NeighborCache {
    offsets: Vec<(i32, i32)>,
    entries: Vec<SegmentRef>,
    starts: Vec<usize>,
}

impl NeighborCache {
    pub fn build(grid: &RoadGrid, offsets: Vec<(i32, i32)>) -> Self {
        let cell_count = grid.cell_count();
        let mut starts = Vec::with_capacity(cell_count + 1);

        // Size pass so the entry array is allocated once
        let mut total = 0;
        for cell in 0..cell_count {
            starts.push(total);
            let (x, y) = (cell % grid.cols, cell / grid.cols);
            total += offsets
                .iter()
                .filter_map(|&o| grid.offset_cell(x, y, o))
                .map(|c| grid.cell(c).len())
                .sum::<usize>();
        }
        starts.push(total);

        let mut entries = Vec::with_capacity(total);
        for cell in 0..cell_count {
            let (x, y) = (cell % grid.cols, cell / grid.cols);
            for &offset in &offsets {
                if let Some(c) = grid.offset_cell(x, y, offset) {
                    entries.extend_from_slice(grid.cell(c));
                }
            }
        }

        Self {
            offsets,
            entries,
            starts,
        }
    }

    #[inline]
    pub fn offsets(&self) -> &[(i32, i32)] {
        &self.offsets
    }

    /// Cached window of the cell containing `position`, truncated to `max`
    pub fn query(&self, grid: &RoadGrid, position: Vec2, max: usize) -> &[SegmentRef] {
        match grid.cell_index(position) {
            Some(cell) => self.cell_entries(cell, max),
            None => &[],
        }
    }

    #[inline]
    pub fn cell_entries(&self, cell: usize, max: usize) -> &[SegmentRef] {
        let start = self.starts[cell];
        let end = self.starts[cell + 1].min(start.saturating_add(max));
        &self.entries[start..end]
    }

    #[inline]
    pub fn total_entries(&self) -> usize {
        self.entries.len()
    }
}

/// Road grid plus the observation (spiral) and collision (row-major) caches
#[derive(Debug, Clone)]
pub struct RoadIndex {
    pub grid: RoadGrid,
    pub vision: NeighborCache,
    pub local: NeighborCache,
}

impl RoadIndex {
    pub fn build(entities: &[Entity], params: &GridParams) -> Self {
        let grid = RoadGrid::build(entities, params.cell_size, params.max_segments_per_cell);
        let vision = NeighborCache::build(&grid, spiral_offsets(params.vision_range));
        let local = NeighborCache::build(&grid, window_offsets(params.collision_window));
        debug!(
            "Neighbor caches: {} vision entries, {} local entries",
            vision.total_entries(),
            local.total_entries()
        );
        Self { grid, vision, local }
    }

    /// Segments visible from `position`, spiral ordered
    #[inline]
    pub fn observe(&self, position: Vec2, max: usize) -> &[SegmentRef] {
        self.vision.query(&self.grid, position, max)
    }

    /// Segments near `position` for offroad and lane checks
    #[inline]
    pub fn nearby(&self, position: Vec2) -> &[SegmentRef] {
        self.local.query(&self.grid, position, usize::MAX)
    }
}
