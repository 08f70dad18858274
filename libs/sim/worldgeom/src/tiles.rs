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

//! Tile collision tags and the lookup tables that drive geometry
//! derivation.
//!
//! Slope naming: `Slope1` is a 1:1 diagonal, `Slope2` a 1:2 (steep) and
//! `Slopeh` a 2:1 (shallow) diagonal; the `A`/`B` suffix picks which half
//! of the two-tile run a tile is. The `Ul`/`Ur`/`Dl`/`Dr` part names the
//! solid corner.

use geom2d::IVec2;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Collision {
    None,
    Full,
    HalfU,
    HalfD,
    HalfL,
    HalfR,
    Slope1Ul,
    Slope1Ur,
    Slope1Dl,
    Slope1Dr,
    Slope2UlA,
    Slope2UlB,
    Slope2UrA,
    Slope2UrB,
    Slope2DlA,
    Slope2DlB,
    Slope2DrA,
    Slope2DrB,
    SlopehUlA,
    SlopehUlB,
    SlopehUrA,
    SlopehUrB,
    SlopehDlA,
    SlopehDlB,
    SlopehDrA,
    SlopehDrB,
}

impl Collision {
    /// Tags which are neither empty nor a full block; these contribute a
    /// sloped or offset edge traced by the traversal tables.
    pub fn is_irregular(self) -> bool {
        self != Collision::None && self != Collision::Full
    }
}

/// Edges and half-edges of a tile. Composite names read half-then-edge:
/// `UpLeft` is the upper half of the left edge, `LeftDown` the left half
/// of the bottom edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
    LeftUp,
    LeftDown,
    RightUp,
    RightDown,
}

/// True if a tile with tag `c` is solid along the given edge or half-edge.
pub fn edge_blocked(c: Collision, edge: Edge) -> bool {
    use Collision::*;
    match edge {
        Edge::Up => matches!(
            c,
            Full | HalfU
                | Slope1Dl
                | Slope1Dr
                | Slope2DlB
                | Slope2DrB
                | SlopehDlA
                | SlopehDlB
                | SlopehDrA
                | SlopehDrB
        ),
        Edge::Down => matches!(
            c,
            Full | HalfD
                | Slope1Ul
                | Slope1Ur
                | Slope2UlB
                | Slope2UrB
                | SlopehUlA
                | SlopehUlB
                | SlopehUrA
                | SlopehUrB
        ),
        Edge::Left => matches!(
            c,
            Full | HalfL
                | Slope1Ul
                | Slope1Dl
                | Slope2UlA
                | Slope2UlB
                | Slope2DlA
                | Slope2DlB
                | SlopehUlB
                | SlopehDlB
        ),
        Edge::Right => matches!(
            c,
            Full | HalfR
                | Slope1Ur
                | Slope1Dr
                | Slope2UrA
                | Slope2UrB
                | Slope2DrA
                | Slope2DrB
                | SlopehUrB
                | SlopehDrB
        ),
        Edge::UpLeft => {
            edge_blocked(c, Edge::Left) || matches!(c, HalfU | SlopehDlA | SlopehDrB)
        }
        Edge::UpRight => {
            edge_blocked(c, Edge::Right) || matches!(c, HalfU | SlopehDlB | SlopehDrA)
        }
        Edge::DownLeft => {
            edge_blocked(c, Edge::Left) || matches!(c, HalfD | SlopehUlA | SlopehUrB)
        }
        Edge::DownRight => {
            edge_blocked(c, Edge::Right) || matches!(c, HalfD | SlopehUlB | SlopehUrA)
        }
        Edge::LeftUp => edge_blocked(c, Edge::Up) || matches!(c, HalfL | Slope2DlA | Slope2UlB),
        Edge::LeftDown => {
            edge_blocked(c, Edge::Down) || matches!(c, HalfL | Slope2DlB | Slope2UlA)
        }
        Edge::RightUp => edge_blocked(c, Edge::Up) || matches!(c, HalfR | Slope2DrA | Slope2UrB),
        Edge::RightDown => {
            edge_blocked(c, Edge::Down) || matches!(c, HalfR | Slope2DrB | Slope2UrA)
        }
    }
}

/// Canonical traversal direction for an irregular tile, so that adjacent
/// matching shapes are walked as one polyline.
pub fn consistent_traversal(c: Collision, positive: bool) -> IVec2 {
    use Collision::*;
    let (px, py, nx, ny) = match c {
        HalfU | HalfD => (1, 0, -1, 0),
        HalfL | HalfR => (0, 1, 0, -1),

        Slope1Ul | Slope1Dr => (1, 1, -1, -1),
        Slope1Ur | Slope1Dl => (1, -1, -1, 1),

        SlopehUlA | SlopehDrB => (1, 1, -1, 0),
        SlopehUlB | SlopehDrA => (1, 0, -1, -1),

        SlopehUrA | SlopehDlB => (1, 0, -1, 1),
        SlopehUrB | SlopehDlA => (1, -1, -1, 0),

        Slope2UlA | Slope2DrB => (0, 1, -1, -1),
        Slope2UlB | Slope2DrA => (1, 1, 0, -1),

        Slope2UrA | Slope2DlB => (0, 1, 1, -1),
        Slope2DlA | Slope2UrB => (-1, 1, 0, -1),

        _ => (0, 0, 0, 0),
    };
    if positive {
        IVec2::new(px, py)
    } else {
        IVec2::new(nx, ny)
    }
}

/// The tag the next tile must carry, in the consistent traversal
/// direction, for the sloped edge to continue as one line.
pub fn expected_traversal(c: Collision) -> Collision {
    use Collision::*;
    match c {
        Slope2UlA => Slope2UlB,
        Slope2UlB => Slope2UlA,
        Slope2UrA => Slope2UrB,
        Slope2UrB => Slope2UrA,
        Slope2DlA => Slope2DlB,
        Slope2DlB => Slope2DlA,
        Slope2DrA => Slope2DrB,
        Slope2DrB => Slope2DrA,
        SlopehUlA => SlopehUlB,
        SlopehUlB => SlopehUlA,
        SlopehUrA => SlopehUrB,
        SlopehUrB => SlopehUrA,
        SlopehDlA => SlopehDlB,
        SlopehDlB => SlopehDlA,
        SlopehDrA => SlopehDrB,
        SlopehDrB => SlopehDrA,
        other => other,
    }
}

/// Cell and tile dimensions. The geometry builder is parametric over
/// these; the defaults match the engine's stock tilesets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GridConfig {
    /// Cell size in tiles.
    pub cell_width: i32,
    pub cell_height: i32,
    /// Tile size in world units.
    pub tile_width: i32,
    pub tile_height: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_width: 40,
            cell_height: 30,
            tile_width: 32,
            tile_height: 32,
        }
    }
}

impl GridConfig {
    #[inline]
    pub fn cell_size(&self) -> IVec2 {
        IVec2::new(self.cell_width, self.cell_height)
    }

    #[inline]
    pub fn tile_size(&self) -> IVec2 {
        IVec2::new(self.tile_width, self.tile_height)
    }

    /// World size of one cell.
    #[inline]
    pub fn cell_world_size(&self) -> IVec2 {
        IVec2::new(
            self.cell_width * self.tile_width,
            self.cell_height * self.tile_height,
        )
    }

    // Tile-corner and edge-midpoint offsets used when emitting sloped
    // segments.
    #[inline]
    pub fn ul(&self) -> IVec2 {
        IVec2::new(0, 0)
    }
    #[inline]
    pub fn ur(&self) -> IVec2 {
        IVec2::new(self.tile_width, 0)
    }
    #[inline]
    pub fn dl(&self) -> IVec2 {
        IVec2::new(0, self.tile_height)
    }
    #[inline]
    pub fn dr(&self) -> IVec2 {
        IVec2::new(self.tile_width, self.tile_height)
    }
    #[inline]
    pub fn u(&self) -> IVec2 {
        IVec2::new(self.tile_width / 2, 0)
    }
    #[inline]
    pub fn d(&self) -> IVec2 {
        IVec2::new(self.tile_width / 2, self.tile_height)
    }
    #[inline]
    pub fn l(&self) -> IVec2 {
        IVec2::new(0, self.tile_height / 2)
    }
    #[inline]
    pub fn r(&self) -> IVec2 {
        IVec2::new(self.tile_width, self.tile_height / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_partners_are_symmetric() {
        use Collision::*;
        for c in [
            Slope2UlA, Slope2UlB, Slope2UrA, Slope2UrB, Slope2DlA, Slope2DlB, Slope2DrA,
            Slope2DrB, SlopehUlA, SlopehUlB, SlopehUrA, SlopehUrB, SlopehDlA, SlopehDlB,
            SlopehDrA, SlopehDrB,
        ] {
            assert_eq!(expected_traversal(expected_traversal(c)), c);
        }
        assert_eq!(expected_traversal(Slope1Ul), Slope1Ul);
        assert_eq!(expected_traversal(HalfU), HalfU);
    }

    #[test]
    fn test_full_blocks_all_edges() {
        for edge in [
            Edge::Up,
            Edge::Down,
            Edge::Left,
            Edge::Right,
            Edge::UpLeft,
            Edge::UpRight,
            Edge::DownLeft,
            Edge::DownRight,
            Edge::LeftUp,
            Edge::LeftDown,
            Edge::RightUp,
            Edge::RightDown,
        ] {
            assert!(edge_blocked(Collision::Full, edge));
            assert!(!edge_blocked(Collision::None, edge));
        }
    }

    #[test]
    fn test_half_tiles_block_their_halves() {
        // A top-half tile is solid along the top edge and the upper halves
        // of the side edges, but not along the bottom.
        assert!(edge_blocked(Collision::HalfU, Edge::Up));
        assert!(edge_blocked(Collision::HalfU, Edge::UpLeft));
        assert!(edge_blocked(Collision::HalfU, Edge::UpRight));
        assert!(!edge_blocked(Collision::HalfU, Edge::Down));
        assert!(!edge_blocked(Collision::HalfU, Edge::Left));
        assert!(!edge_blocked(Collision::HalfU, Edge::DownLeft));
    }
}
