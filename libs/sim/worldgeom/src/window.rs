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

//! The streamed-in region of the world: a `(1 + 2k)^2` window of cells
//! around the camera. Shifting the window swaps unchanged cells'
//! geometry buckets instead of recomputing them.

use crate::{
    cell::TileGrid,
    tiles::GridConfig,
    world::{Segment, WorldGeometry},
};
use fxhash::FxHashMap;
use geom2d::IVec2;
use spatial::SpatialHash;
use std::rc::Rc;

/// A coord-addressed store of cell blueprints.
#[derive(Debug, Default)]
pub struct CellMap {
    cells: FxHashMap<(i32, i32), Rc<TileGrid>>,
}

impl CellMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cell(&mut self, coord: IVec2, grid: TileGrid) {
        self.cells.insert((coord.x, coord.y), Rc::new(grid));
    }

    pub fn clear_cell(&mut self, coord: IVec2) {
        self.cells.remove(&(coord.x, coord.y));
    }

    pub fn cell(&self, coord: IVec2) -> Option<Rc<TileGrid>> {
        self.cells.get(&(coord.x, coord.y)).cloned()
    }
}

/// Where the window streams cells from.
#[derive(Debug)]
pub enum WorldSource<'a> {
    CellMap(&'a CellMap),
}

impl<'a> WorldSource<'a> {
    fn cell(&self, coord: IVec2) -> Option<Rc<TileGrid>> {
        match self {
            WorldSource::CellMap(map) => map.cell(coord),
        }
    }
}

#[derive(Debug)]
pub struct ActiveWindow {
    half_size: i32,
    // Negated active coordinate, so that window coord plus this offset is
    // a source coordinate.
    source_offset: IVec2,
    window: Vec<Option<Rc<TileGrid>>>,
    geometry: WorldGeometry,
    refreshed: Vec<IVec2>,
}

impl ActiveWindow {
    pub fn new(
        config: GridConfig,
        half_size: i32,
        source: &WorldSource,
        active_coord: IVec2,
    ) -> Self {
        debug_assert!(half_size >= 0);
        let side = (1 + 2 * half_size) as usize;
        let mut window = Self {
            half_size,
            source_offset: -active_coord,
            window: vec![None; side * side],
            geometry: WorldGeometry::new(config),
            refreshed: Vec::new(),
        };
        window.update_active_window(source);
        window
    }

    pub fn half_size(&self) -> i32 {
        self.half_size
    }

    pub fn active_coord(&self) -> IVec2 {
        -self.source_offset
    }

    /// Cells of the window, centre-relative.
    pub fn coords(&self) -> impl Iterator<Item = IVec2> {
        let h = self.half_size;
        (-h..=h).flat_map(move |y| (-h..=h).map(move |x| IVec2::new(x, y)))
    }

    pub fn cell(&self, v: IVec2) -> Option<&Rc<TileGrid>> {
        self.window[self.to_index(v)].as_ref()
    }

    /// Window coords whose cells changed since the last
    /// `clear_refreshed_cells`.
    pub fn refreshed_cells(&self) -> &[IVec2] {
        &self.refreshed
    }

    pub fn clear_refreshed_cells(&mut self) {
        self.refreshed.clear();
    }

    pub fn geometry(&mut self) -> &SpatialHash<Segment> {
        self.geometry.geometry()
    }

    /// Re-centre the window. Cells still in view keep their derived
    /// geometry via bucket swaps; newly visible cells are derived fresh.
    pub fn set_active_coord(&mut self, source: &WorldSource, coord: IVec2) {
        let offset = self.source_offset + coord;
        self.move_active_window(source, offset);
    }

    /// Re-read every cell from the source, refreshing changed ones.
    pub fn update_active_window(&mut self, source: &WorldSource) {
        for v in self.coords().collect::<Vec<_>>() {
            self.update_active_window_cell(source, v);
        }
    }

    fn to_index(&self, v: IVec2) -> usize {
        let side = 1 + 2 * self.half_size;
        ((v.y + self.half_size) * side + (v.x + self.half_size)) as usize
    }

    fn target(&self, source: &WorldSource, v: IVec2) -> Option<Rc<TileGrid>> {
        source.cell(v - self.source_offset)
    }

    fn update_active_window_cell(&mut self, source: &WorldSource, v: IVec2) {
        let index = self.to_index(v);
        let new_blueprint = self.target(source, v);

        // Changed cells or missing cells need their scripts refreshed.
        if !same_blueprint(&self.window[index], &new_blueprint) || new_blueprint.is_none() {
            self.refreshed.push(v);
        }

        if !same_blueprint(&self.window[index], &new_blueprint) {
            match &new_blueprint {
                Some(grid) => self.geometry.merge_geometry(v, grid.as_ref()),
                None => self.geometry.clear_geometry(v),
            }
            self.window[index] = new_blueprint;
        }
    }

    fn move_active_window(&mut self, source: &WorldSource, offset: IVec2) {
        if offset == IVec2::new(0, 0) {
            return;
        }
        let h = self.half_size;
        let side = 1 + 2 * h;
        let count = (side * side) as usize;
        self.source_offset -= offset;

        // Buckets are swapped through a staging band one window-width to
        // the right.
        let staging = IVec2::new(side, 0);
        let coords: Vec<IVec2> = self.coords().collect();

        // Copy the active window into staging.
        let mut copy: Vec<Option<Rc<TileGrid>>> = vec![None; count];
        let mut used = vec![false; count];
        let mut done = vec![false; count];
        for &v in &coords {
            self.geometry.swap_geometry(v, v + staging);
            let index = self.to_index(v);
            copy[index] = self.window[index].take();
        }

        // Move the cells that are still in view back into the new window.
        for &v in &coords {
            let from = v + offset;
            if from.x.abs() <= h && from.y.abs() <= h {
                self.geometry.swap_geometry(from + staging, v);
                let index = self.to_index(v);
                let copy_index = self.to_index(from);
                self.window[index] = copy[copy_index].clone();
                used[copy_index] = true;
                done[index] = true;
            }
        }

        // Create or swap the remaining unfilled cells.
        for &v in &coords {
            let index = self.to_index(v);
            if done[index] {
                continue;
            }
            self.refreshed.push(v);
            let new_blueprint = self.target(source, v);
            self.window[index] = new_blueprint.clone();

            // If the cell happens to be unchanged, swap it back in.
            if !used[index] && same_blueprint(&copy[index], &new_blueprint) {
                self.geometry.swap_geometry(v + staging, v);
                continue;
            }

            match &new_blueprint {
                Some(grid) => self.geometry.merge_geometry(v, grid.as_ref()),
                None => self.geometry.clear_geometry(v),
            }
        }

        // Scrolled-out cells leave their buckets behind in the staging
        // band; sweep it clear so they cannot reappear in the merge.
        for &v in &coords {
            self.geometry.clear_geometry(v + staging);
        }
    }
}

fn same_blueprint(a: &Option<Rc<TileGrid>>, b: &Option<Rc<TileGrid>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::Collision;
    use geom2d::WVec2;

    fn config() -> GridConfig {
        GridConfig {
            cell_width: 4,
            cell_height: 4,
            tile_width: 32,
            tile_height: 32,
        }
    }

    fn solid_cell(config: &GridConfig) -> TileGrid {
        let mut grid = TileGrid::new(config);
        grid.fill(IVec2::new(1, 1), IVec2::new(3, 3), Collision::Full);
        grid
    }

    fn count_segments(window: &mut ActiveWindow) -> usize {
        let big = 1e9;
        window
            .geometry()
            .search(&WVec2::new(-big, -big), &WVec2::new(big, big))
            .count()
    }

    #[test]
    fn test_initial_window_loads_cells() {
        let config = config();
        let mut map = CellMap::new();
        map.set_cell(IVec2::new(0, 0), solid_cell(&config));

        let mut window = ActiveWindow::new(
            config,
            1,
            &WorldSource::CellMap(&map),
            IVec2::new(0, 0),
        );
        // The centre cell is loaded; its interior box produces geometry.
        assert!(window.cell(IVec2::new(0, 0)).is_some());
        assert!(window.cell(IVec2::new(1, 0)).is_none());
        assert!(count_segments(&mut window) > 0);
        // All nine window cells report refreshed on first load.
        assert_eq!(window.refreshed_cells().len(), 9);
    }

    #[test]
    fn test_shift_keeps_overlapping_cells() {
        let config = config();
        let mut map = CellMap::new();
        map.set_cell(IVec2::new(0, 0), solid_cell(&config));
        map.set_cell(IVec2::new(1, 0), solid_cell(&config));

        let source = WorldSource::CellMap(&map);
        let mut window = ActiveWindow::new(config, 1, &source, IVec2::new(0, 0));
        let before = count_segments(&mut window);
        window.clear_refreshed_cells();

        window.set_active_coord(&source, IVec2::new(1, 0));
        assert_eq!(window.active_coord(), IVec2::new(1, 0));
        // Cell (1, 0) of the source is now the window centre.
        assert!(window.cell(IVec2::new(0, 0)).is_some());
        assert!(window.cell(IVec2::new(-1, 0)).is_some());
        // Only the entering column is refreshed.
        assert!(window.refreshed_cells().iter().all(|v| v.x == 1));
        assert_eq!(window.refreshed_cells().len(), 3);
        // Both source cells are still in view.
        assert_eq!(count_segments(&mut window), before);
    }

    #[test]
    fn test_shift_away_and_back_is_stable() {
        let config = config();
        let mut map = CellMap::new();
        map.set_cell(IVec2::new(0, 0), solid_cell(&config));

        let source = WorldSource::CellMap(&map);
        let mut window = ActiveWindow::new(config, 1, &source, IVec2::new(0, 0));
        let at_origin = count_segments(&mut window);

        // Shift far enough that the loaded cell scrolls out entirely.
        window.set_active_coord(&source, IVec2::new(10, 0));
        assert_eq!(count_segments(&mut window), 0);

        window.set_active_coord(&source, IVec2::new(0, 0));
        assert_eq!(count_segments(&mut window), at_origin);
    }
}
