// This file is part of Ember.
//
// Ember is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Ember is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Ember.  If not, see <http://www.gnu.org/licenses/>.

//! The world's segment set: per-cell buckets, merged lazily across cell
//! boundaries into a spatial hash.

use crate::{
    cell::CollisionGrid,
    geometry::{calculate_geometry, Bucket},
    tiles::GridConfig,
};
use fxhash::FxHashMap;
use geom2d::{IVec2, WVec2};
use log::debug;
use spatial::SpatialHash;
use std::hash::{Hash, Hasher};

/// An oriented world segment. The non-solid half-plane lies to the
/// segment's left. `external` marks segments on a cell boundary with no
/// merged neighbour; light is allowed to shine across those.
#[derive(Copy, Clone, Debug)]
pub struct Segment {
    pub start: IVec2,
    pub end: IVec2,
    pub external: bool,
}

impl Segment {
    pub fn new(start: IVec2, end: IVec2, external: bool) -> Self {
        Self {
            start,
            end,
            external,
        }
    }

    pub fn min(&self) -> IVec2 {
        self.start.inf(&self.end)
    }

    pub fn max(&self) -> IVec2 {
        self.start.sup(&self.end)
    }
}

// Two segments are equal iff both endpoints match in order; the external
// flag is bookkeeping, not identity.
impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}
impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.start.x, self.start.y, self.end.x, self.end.y).hash(state);
    }
}

/// Spatial hash cell size for the merged segment set.
const GEOMETRY_HASH_CELL_SIZE: f64 = 512.;

#[derive(Debug)]
pub struct WorldGeometry {
    config: GridConfig,
    buckets: FxHashMap<(i32, i32), Bucket>,
    hash: SpatialHash<Segment>,
    dirty: bool,
}

impl WorldGeometry {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            buckets: FxHashMap::default(),
            hash: SpatialHash::new(GEOMETRY_HASH_CELL_SIZE),
            dirty: false,
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Recompute one cell's bucket from its collision grid.
    pub fn merge_geometry(&mut self, coord: IVec2, cell: &dyn CollisionGrid) {
        let bucket = calculate_geometry(cell, &self.config);
        self.buckets.insert((coord.x, coord.y), bucket);
        self.dirty = true;
    }

    pub fn clear_geometry(&mut self, coord: IVec2) {
        if self.buckets.remove(&(coord.x, coord.y)).is_some() {
            self.dirty = true;
        }
    }

    /// Transpose two cells' buckets; used by the active-window shift.
    pub fn swap_geometry(&mut self, a: IVec2, b: IVec2) {
        let av = self.buckets.remove(&(a.x, a.y));
        let bv = self.buckets.remove(&(b.x, b.y));
        if let Some(v) = av {
            self.buckets.insert((b.x, b.y), v);
        }
        if let Some(v) = bv {
            self.buckets.insert((a.x, a.y), v);
        }
        self.dirty = true;
    }

    /// The merged segment set, rebuilt lazily when dirty.
    pub fn geometry(&mut self) -> &SpatialHash<Segment> {
        if self.dirty {
            self.merge_all_geometry();
            self.dirty = false;
            debug!(
                "rebuilt world geometry: {} cells, {} segments",
                self.buckets.len(),
                self.hash.len()
            );
        }
        &self.hash
    }

    fn insert_segment(hash: &mut SpatialHash<Segment>, segment: Segment) {
        let min = segment.min();
        let max = segment.max();
        hash.update(
            segment,
            WVec2::new(min.x as f64, min.y as f64),
            WVec2::new(max.x as f64, max.y as f64),
        );
    }

    fn insert_list(
        hash: &mut SpatialHash<Segment>,
        list: &[(IVec2, IVec2)],
        offset: IVec2,
        external: bool,
    ) {
        for &(start, end) in list {
            Self::insert_segment(hash, Segment::new(start + offset, end + offset, external));
        }
    }

    fn merge_all_geometry(&mut self) {
        self.hash.clear();
        if self.buckets.is_empty() {
            return;
        }

        let mut min = IVec2::new(i32::MAX, i32::MAX);
        let mut max = IVec2::new(i32::MIN, i32::MIN);
        for &(x, y) in self.buckets.keys() {
            min = min.inf(&IVec2::new(x, y));
            max = max.sup(&IVec2::new(x + 1, y + 1));
        }

        let cell_world = self.config.cell_world_size();
        for y in min.y..max.y {
            for x in min.x..max.x {
                let coord = (x, y);
                let bucket = match self.buckets.get(&coord) {
                    Some(bucket) => bucket,
                    None => continue,
                };
                let offset = IVec2::new(x * cell_world.x, y * cell_world.y);

                // Add all non-edge geometry.
                Self::insert_list(&mut self.hash, &bucket.middle, offset, false);

                // Where there's no adjacent cell, add the edge geometry.
                if !self.buckets.contains_key(&(x, y - 1)) {
                    Self::insert_list(&mut self.hash, &bucket.top, offset, true);
                }
                if !self.buckets.contains_key(&(x - 1, y)) {
                    Self::insert_list(&mut self.hash, &bucket.left, offset, true);
                }
                if !self.buckets.contains_key(&(x, y + 1)) {
                    Self::insert_list(&mut self.hash, &bucket.bottom, offset, true);
                }
                if !self.buckets.contains_key(&(x + 1, y)) {
                    Self::insert_list(&mut self.hash, &bucket.right, offset, true);
                }

                // Merge edge geometry with adjacent cells. This depends on
                // the boundary lists being stored in ascending sweep
                // order.
                if let Some(below) = self.buckets.get(&(x, y + 1)) {
                    let mut top = bucket.bottom.clone();
                    let mut bottom = below.top.clone();
                    let bottom_offset = IVec2::new(x * cell_world.x, (y + 1) * cell_world.y);

                    let mut top_index = 0;
                    let mut bottom_index = 0;
                    while top_index < top.len() && bottom_index < bottom.len() {
                        let top_min = top[top_index].0.x;
                        let top_max = top[top_index].1.x;
                        let bottom_min = bottom[bottom_index].1.x;
                        let bottom_max = bottom[bottom_index].0.x;

                        merge_step(
                            &mut self.hash,
                            offset,
                            bottom_offset,
                            top_min,
                            top_max,
                            bottom_min,
                            bottom_max,
                            &mut top_index,
                            &mut bottom_index,
                            &mut top,
                            &mut bottom,
                        );
                    }
                    for &(start, end) in &top[top_index..] {
                        Self::insert_segment(
                            &mut self.hash,
                            Segment::new(start + offset, end + offset, true),
                        );
                    }
                    for &(start, end) in &bottom[bottom_index..] {
                        Self::insert_segment(
                            &mut self.hash,
                            Segment::new(start + bottom_offset, end + bottom_offset, true),
                        );
                    }
                }
                if let Some(beside) = self.buckets.get(&(x + 1, y)) {
                    let mut left = bucket.right.clone();
                    let mut right = beside.left.clone();
                    let right_offset = IVec2::new((x + 1) * cell_world.x, y * cell_world.y);

                    let mut left_index = 0;
                    let mut right_index = 0;
                    while left_index < left.len() && right_index < right.len() {
                        let left_min = left[left_index].1.y;
                        let left_max = left[left_index].0.y;
                        let right_min = right[right_index].0.y;
                        let right_max = right[right_index].1.y;

                        // This time the right list is the one with
                        // reversed segments, so pass everything the other
                        // way around.
                        merge_step(
                            &mut self.hash,
                            right_offset,
                            offset,
                            right_min,
                            right_max,
                            left_min,
                            left_max,
                            &mut right_index,
                            &mut left_index,
                            &mut right,
                            &mut left,
                        );
                    }
                    for &(start, end) in &left[left_index..] {
                        Self::insert_segment(
                            &mut self.hash,
                            Segment::new(start + offset, end + offset, true),
                        );
                    }
                    for &(start, end) in &right[right_index..] {
                        Self::insert_segment(
                            &mut self.hash,
                            Segment::new(start + right_offset, end + right_offset, true),
                        );
                    }
                }
            }
        }
    }
}

/// One step of the boundary zip. The two lists describe the open spans on
/// either side of a shared cell edge, one of them stored reversed; spans
/// present on only one side close up into real geometry, spans present on
/// both cancel.
#[allow(clippy::too_many_arguments)]
fn merge_step(
    hash: &mut SpatialHash<Segment>,
    a_offset: IVec2,
    b_offset: IVec2,
    a_min: i32,
    a_max: i32,
    b_min: i32,
    b_max: i32,
    a_index: &mut usize,
    b_index: &mut usize,
    a: &mut [(IVec2, IVec2)],
    b: &mut [(IVec2, IVec2)],
) {
    if a_max < b_min {
        let (start, end) = a[*a_index];
        WorldGeometry::insert_segment(
            hash,
            Segment::new(a_offset + start, a_offset + end, true),
        );
        *a_index += 1;
        return;
    }
    if b_max < a_min {
        let (start, end) = b[*b_index];
        WorldGeometry::insert_segment(
            hash,
            Segment::new(b_offset + start, b_offset + end, true),
        );
        *b_index += 1;
        return;
    }

    // The rest works for all overlap cases because one of the lists has
    // its segments stored in reverse: the leading remainder joins a's
    // start to b's end across the two cell frames.
    if a_min != b_min {
        WorldGeometry::insert_segment(
            hash,
            Segment::new(a_offset + a[*a_index].0, b_offset + b[*b_index].1, false),
        );
    }

    if a_max < b_max {
        b[*b_index].1 = a[*a_index].1 - b_offset + a_offset;
        *a_index += 1;
    } else if a_max > b_max {
        a[*a_index].0 = b[*b_index].0 - a_offset + b_offset;
        *b_index += 1;
    } else {
        *a_index += 1;
        *b_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::TileGrid;
    use crate::tiles::Collision;

    fn config() -> GridConfig {
        GridConfig {
            cell_width: 4,
            cell_height: 4,
            tile_width: 32,
            tile_height: 32,
        }
    }

    fn segments(world: &mut WorldGeometry) -> Vec<Segment> {
        let big = 1e9;
        world
            .geometry()
            .search(&WVec2::new(-big, -big), &WVec2::new(big, big))
            .copied()
            .collect()
    }

    #[test]
    fn test_lone_cell_edges_are_external() {
        let config = config();
        let mut world = WorldGeometry::new(config);
        let grid = TileGrid::new(&config);
        world.merge_geometry(IVec2::new(0, 0), &grid);

        let segs = segments(&mut world);
        // Empty lone cell: four boundary spans, all external.
        assert_eq!(segs.len(), 4);
        assert!(segs.iter().all(|s| s.external));
        assert!(segs.iter().all(|s| s.start != s.end));
    }

    #[test]
    fn test_open_passage_between_cells_cancels() {
        let config = config();
        let mut world = WorldGeometry::new(config);
        let grid = TileGrid::new(&config);
        world.merge_geometry(IVec2::new(0, 0), &grid);
        world.merge_geometry(IVec2::new(1, 0), &grid);

        let segs = segments(&mut world);
        // Two empty side-by-side cells: the shared vertical edge cancels
        // entirely; six external outer edges remain.
        let cw = config.cell_world_size();
        assert!(segs.iter().all(|s| s.external));
        assert!(!segs.iter().any(|s| s.start.x == cw.x && s.end.x == cw.x));
        assert_eq!(segs.len(), 6);
    }

    #[test]
    fn test_wall_on_shared_boundary_closes_up() {
        let config = config();
        let mut world = WorldGeometry::new(config);
        // Left cell open; right cell fully solid.
        let open = TileGrid::new(&config);
        let mut solid = TileGrid::new(&config);
        solid.fill(IVec2::new(0, 0), config.cell_size(), Collision::Full);
        world.merge_geometry(IVec2::new(0, 0), &open);
        world.merge_geometry(IVec2::new(1, 0), &solid);

        let cw = config.cell_world_size();
        let segs = segments(&mut world);
        // The open cell's right span survives as the wall face. It lies on
        // the shared boundary and was emitted by the leftover loop.
        let wall: Vec<_> = segs
            .iter()
            .filter(|s| s.start.x == cw.x && s.end.x == cw.x)
            .collect();
        assert_eq!(wall.len(), 1);
        // Oriented with the open side (left cell) on its left: upward.
        assert!(wall[0].start.y > wall[0].end.y);
        // A span the neighbour never overlapped comes from the leftover
        // loop and stays external.
        assert!(wall[0].external);
    }

    #[test]
    fn test_partial_overlap_merges_across_frames() {
        let config = config();
        let mut world = WorldGeometry::new(config);
        // Both cells empty except the upper half of the right cell is
        // solid, so the shared edge is closed at the top and open below.
        let open = TileGrid::new(&config);
        let mut half = TileGrid::new(&config);
        half.fill(
            IVec2::new(0, 0),
            IVec2::new(config.cell_width, 2),
            Collision::Full,
        );
        world.merge_geometry(IVec2::new(0, 0), &open);
        world.merge_geometry(IVec2::new(1, 0), &half);

        let cw = config.cell_world_size();
        let segs = segments(&mut world);
        let wall: Vec<_> = segs
            .iter()
            .filter(|s| s.start.x == cw.x && s.end.x == cw.x)
            .collect();
        // One wall face over the solid half only, oriented upward so the
        // open left cell sits on its left.
        assert_eq!(wall.len(), 1);
        assert_eq!(wall[0].start, IVec2::new(cw.x, 2 * config.tile_height));
        assert_eq!(wall[0].end, IVec2::new(cw.x, 0));
        // The overlapping pair combined across the two cell frames and is
        // interior geometry.
        assert!(!wall[0].external);
    }

    #[test]
    fn test_swap_geometry_moves_buckets() {
        let config = config();
        let mut world = WorldGeometry::new(config);
        let mut grid = TileGrid::new(&config);
        grid.set(IVec2::new(1, 1), Collision::Full);
        world.merge_geometry(IVec2::new(0, 0), &grid);

        let before = segments(&mut world);
        assert!(!before.is_empty());

        world.swap_geometry(IVec2::new(0, 0), IVec2::new(3, 0));
        let after = segments(&mut world);
        let cw = config.cell_world_size();
        // Same shapes, translated three cells right.
        assert_eq!(before.len(), after.len());
        for seg in &before {
            let moved = Segment::new(
                seg.start + IVec2::new(3 * cw.x, 0),
                seg.end + IVec2::new(3 * cw.x, 0),
                seg.external,
            );
            assert!(after.contains(&moved));
        }
    }

    #[test]
    fn test_rebuild_is_lazy_and_dirty_tracked() {
        let config = config();
        let mut world = WorldGeometry::new(config);
        let grid = TileGrid::new(&config);
        world.merge_geometry(IVec2::new(0, 0), &grid);
        assert_eq!(segments(&mut world).len(), 4);

        world.clear_geometry(IVec2::new(0, 0));
        assert!(segments(&mut world).is_empty());
    }
}
