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
mod cell;
mod geometry;
mod tiles;
mod window;
mod world;

pub use crate::{
    cell::{CollisionGrid, TileGrid},
    geometry::{calculate_geometry, Bucket},
    tiles::{Collision, Edge, GridConfig},
    window::{ActiveWindow, CellMap, WorldSource},
    world::{Segment, WorldGeometry},
};
