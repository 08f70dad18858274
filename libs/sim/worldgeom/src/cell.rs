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
use crate::tiles::{Collision, GridConfig};
use geom2d::IVec2;

/// The collision-layer contract the geometry builder consumes: a
/// `cell_width x cell_height` grid of collision tags.
pub trait CollisionGrid {
    fn collision(&self, tile: IVec2) -> Collision;
}

/// A plain owned collision grid, row-major.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TileGrid {
    width: i32,
    height: i32,
    tiles: Vec<Collision>,
}

impl TileGrid {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            width: config.cell_width,
            height: config.cell_height,
            tiles: vec![Collision::None; (config.cell_width * config.cell_height) as usize],
        }
    }

    pub fn set(&mut self, tile: IVec2, collision: Collision) {
        if tile.x >= 0 && tile.x < self.width && tile.y >= 0 && tile.y < self.height {
            self.tiles[(tile.y * self.width + tile.x) as usize] = collision;
        }
    }

    /// Fill a rectangular run of tiles, inclusive of `min`, exclusive of
    /// `max`.
    pub fn fill(&mut self, min: IVec2, max: IVec2, collision: Collision) {
        for y in min.y..max.y {
            for x in min.x..max.x {
                self.set(IVec2::new(x, y), collision);
            }
        }
    }
}

impl CollisionGrid for TileGrid {
    fn collision(&self, tile: IVec2) -> Collision {
        if tile.x >= 0 && tile.x < self.width && tile.y >= 0 && tile.y < self.height {
            self.tiles[(tile.y * self.width + tile.x) as usize]
        } else {
            Collision::None
        }
    }
}
