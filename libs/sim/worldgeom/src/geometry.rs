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

//! Per-cell segment derivation from a collision grid.

use crate::{
    cell::CollisionGrid,
    tiles::{consistent_traversal, edge_blocked, expected_traversal, Collision, Edge, GridConfig},
};
use fxhash::FxHashSet;
use geom2d::IVec2;

/// One cell's derived segments, split into the four cell-boundary lists
/// and the interior. Boundary lists are kept in ascending sweep order;
/// the cross-cell merge relies on that.
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    pub top: Vec<(IVec2, IVec2)>,
    pub bottom: Vec<(IVec2, IVec2)>,
    pub left: Vec<(IVec2, IVec2)>,
    pub right: Vec<(IVec2, IVec2)>,
    pub middle: Vec<(IVec2, IVec2)>,
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Boundary {
    None,
    Left,
    Right,
}

/// Tiles outside the cell count as blocked, so runs close at the cell
/// boundary and boundary lists mark the open spans of each edge.
fn tile_blocked(
    grid: &dyn CollisionGrid,
    config: &GridConfig,
    tile: IVec2,
    edge: Edge,
) -> bool {
    if tile.x < 0 || tile.x >= config.cell_width || tile.y < 0 || tile.y >= config.cell_height {
        return true;
    }
    edge_blocked(grid.collision(tile), edge)
}

/// Derive the geometry of one cell, in cell-local world coordinates.
pub fn calculate_geometry(grid: &dyn CollisionGrid, config: &GridConfig) -> Bucket {
    let mut bucket = Bucket::default();

    // Strategy: treat horizontal and vertical edges completely separately.
    // Loop over the line segments forming the edges of tiles, adding
    // geometry when the collision of the tiles on either side of the edge
    // differs. When this pattern continues for several tiles, don't add
    // the geometry until we reach the end.
    // The same technique could be used for every possible sloped gradient,
    // but since these have the nice property of at most one sloped edge
    // per tile, independent of adjacent tiles, they are handled separately
    // afterwards.

    // Horizontal geometry lines.
    for row in 0..=config.cell_height {
        let mut boundary = Boundary::None;
        let mut boundary_start = 0;
        let mut list: Vec<(IVec2, IVec2)> = Vec::new();

        for t in 0..=2 * config.cell_width {
            let above = tile_blocked(
                grid,
                config,
                IVec2::new(t / 2, row - 1),
                if t % 2 == 1 {
                    Edge::RightDown
                } else {
                    Edge::LeftDown
                },
            );
            let below = tile_blocked(
                grid,
                config,
                IVec2::new(t / 2, row),
                if t % 2 == 1 {
                    Edge::RightUp
                } else {
                    Edge::LeftUp
                },
            );

            let new_boundary = if above && !below {
                Boundary::Left
            } else if below && !above {
                Boundary::Right
            } else {
                Boundary::None
            };
            if boundary == new_boundary {
                continue;
            }

            if boundary != Boundary::None {
                let mul = IVec2::new(config.tile_width / 2, config.tile_height);
                let start = IVec2::new(mul.x * boundary_start, mul.y * row);
                let end = IVec2::new(mul.x * t, mul.y * row);

                // Make sure the geometry is always on the right of its
                // boundary.
                list.push(if boundary == Boundary::Right {
                    (start, end)
                } else {
                    (end, start)
                });
            }
            if new_boundary != Boundary::None {
                boundary_start = t;
            }
            boundary = new_boundary;
        }

        if row == 0 {
            bucket.top = list;
        } else if row == config.cell_height {
            bucket.bottom = list;
        } else {
            bucket.middle.append(&mut list);
        }
    }

    // Vertical geometry lines.
    for col in 0..=config.cell_width {
        let mut boundary = Boundary::None;
        let mut boundary_start = 0;
        let mut list: Vec<(IVec2, IVec2)> = Vec::new();

        for t in 0..=2 * config.cell_height {
            let left = tile_blocked(
                grid,
                config,
                IVec2::new(col - 1, t / 2),
                if t % 2 == 1 {
                    Edge::DownRight
                } else {
                    Edge::UpRight
                },
            );
            let right = tile_blocked(
                grid,
                config,
                IVec2::new(col, t / 2),
                if t % 2 == 1 {
                    Edge::DownLeft
                } else {
                    Edge::UpLeft
                },
            );

            // Since we're moving downwards, left tile blocked means the
            // boundary is actually on the right.
            let new_boundary = if left && !right {
                Boundary::Right
            } else if right && !left {
                Boundary::Left
            } else {
                Boundary::None
            };
            if boundary == new_boundary {
                continue;
            }

            if boundary != Boundary::None {
                let mul = IVec2::new(config.tile_width, config.tile_height / 2);
                let start = IVec2::new(mul.x * col, mul.y * boundary_start);
                let end = IVec2::new(mul.x * col, mul.y * t);

                list.push(if boundary == Boundary::Right {
                    (start, end)
                } else {
                    (end, start)
                });
            }
            if new_boundary != Boundary::None {
                boundary_start = t;
            }
            boundary = new_boundary;
        }

        if col == 0 {
            bucket.left = list;
        } else if col == config.cell_width {
            bucket.right = list;
        } else {
            bucket.middle.append(&mut list);
        }
    }

    // Full straight edges of irregular tiles are handled by the above
    // strategy. Now make a list of non-full tiles so we can go back and
    // fill in the sloped edges.
    let mut set: FxHashSet<(i32, i32)> = FxHashSet::default();
    for y in 0..config.cell_height {
        for x in 0..config.cell_width {
            if grid.collision(IVec2::new(x, y)).is_irregular() {
                set.insert((x, y));
            }
        }
    }

    // Pick one irregular tile at a time and find the longest line formed
    // by its sloped edge. Erase the tiles we've used so that we don't make
    // parts of the same line multiple times.
    while let Some(&(x, y)) = set.iter().min() {
        let v = IVec2::new(x, y);
        set.remove(&(x, y));
        let collision = grid.collision(v);

        // Scan all the way in both directions to the end of the sloped
        // edge.
        let mut c = collision;
        let mut u = v;
        let mut dir = consistent_traversal(c, true);
        let mut next = grid.collision(u + dir);
        while next == expected_traversal(c) && dir != IVec2::new(0, 0) {
            u += dir;
            set.remove(&(u.x, u.y));

            c = next;
            dir = consistent_traversal(c, true);
            next = grid.collision(u + dir);
        }
        let max = u;
        let max_c = c;

        // Other direction.
        c = collision;
        u = v;
        dir = consistent_traversal(c, false);
        next = grid.collision(u + dir);
        while next == expected_traversal(c) && dir != IVec2::new(0, 0) {
            u += dir;
            set.remove(&(u.x, u.y));

            c = next;
            dir = consistent_traversal(c, false);
            next = grid.collision(u + dir);
        }
        let min = u;
        let min_c = c;

        if let Some(seg) = traversal_edge(config, min, max, min_c, max_c) {
            bucket.middle.push(seg);
        }
    }

    bucket
}

/// The sloped segment for a maximal run of irregular tiles from `min` to
/// `max`, using the endpoint offsets configured for the extreme tags.
fn traversal_edge(
    config: &GridConfig,
    min: IVec2,
    max: IVec2,
    min_c: Collision,
    max_c: Collision,
) -> Option<(IVec2, IVec2)> {
    use Collision::*;
    let ts = config.tile_size();
    let min = IVec2::new(min.x * ts.x, min.y * ts.y);
    let max = IVec2::new(max.x * ts.x, max.y * ts.y);

    let seg = match min_c {
        HalfU => (max + config.r(), min + config.l()),
        HalfD => (min + config.l(), max + config.r()),
        HalfL => (min + config.u(), max + config.d()),
        HalfR => (max + config.d(), min + config.u()),

        Slope1Ul => (min + config.ul(), max + config.dr()),
        Slope1Ur => (min + config.dl(), max + config.ur()),
        Slope1Dl => (max + config.ur(), min + config.dl()),
        Slope1Dr => (max + config.dr(), min + config.ul()),

        SlopehUlA | SlopehUlB => (
            min + if min_c == SlopehUlA {
                config.l()
            } else {
                config.ul()
            },
            max + if max_c == SlopehUlB {
                config.r()
            } else {
                config.dr()
            },
        ),
        SlopehUrA | SlopehUrB => (
            min + if min_c == SlopehUrB {
                config.l()
            } else {
                config.dl()
            },
            max + if max_c == SlopehUrA {
                config.r()
            } else {
                config.ur()
            },
        ),
        SlopehDlA | SlopehDlB => (
            max + if max_c == SlopehDlB {
                config.r()
            } else {
                config.ur()
            },
            min + if min_c == SlopehDlA {
                config.l()
            } else {
                config.dl()
            },
        ),
        SlopehDrA | SlopehDrB => (
            max + if max_c == SlopehDrA {
                config.r()
            } else {
                config.dr()
            },
            min + if min_c == SlopehDrB {
                config.l()
            } else {
                config.ul()
            },
        ),

        Slope2UlA | Slope2UlB => (
            min + if min_c == Slope2UlB {
                config.u()
            } else {
                config.ul()
            },
            max + if max_c == Slope2UlA {
                config.d()
            } else {
                config.dr()
            },
        ),
        Slope2UrA | Slope2UrB => (
            min + if min_c == Slope2UrA {
                config.d()
            } else {
                config.dl()
            },
            max + if max_c == Slope2UrB {
                config.u()
            } else {
                config.ur()
            },
        ),
        Slope2DlA | Slope2DlB => (
            min + if min_c == Slope2DlA {
                config.u()
            } else {
                config.ur()
            },
            max + if max_c == Slope2DlB {
                config.d()
            } else {
                config.dl()
            },
        ),
        Slope2DrA | Slope2DrB => (
            max + if max_c == Slope2DrB {
                config.d()
            } else {
                config.dr()
            },
            min + if min_c == Slope2DrA {
                config.u()
            } else {
                config.ul()
            },
        ),

        _ => return Option::None,
    };
    Some(seg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::TileGrid;

    fn config() -> GridConfig {
        GridConfig {
            cell_width: 8,
            cell_height: 6,
            tile_width: 32,
            tile_height: 32,
        }
    }

    #[test]
    fn test_empty_cell_boundary_spans() {
        let config = config();
        let grid = TileGrid::new(&config);
        let bucket = calculate_geometry(&grid, &config);

        // An empty cell has one open span per boundary edge and no
        // interior geometry.
        assert_eq!(bucket.top.len(), 1);
        assert_eq!(bucket.bottom.len(), 1);
        assert_eq!(bucket.left.len(), 1);
        assert_eq!(bucket.right.len(), 1);
        assert!(bucket.middle.is_empty());

        // The top span runs right-to-left (solid outside is above, so the
        // non-solid side must be on the left of the segment).
        let (start, end) = bucket.top[0];
        assert_eq!(start, IVec2::new(8 * 32, 0));
        assert_eq!(end, IVec2::new(0, 0));
    }

    #[test]
    fn test_single_full_tile_interior_box() {
        let config = config();
        let mut grid = TileGrid::new(&config);
        grid.set(IVec2::new(3, 2), Collision::Full);
        let bucket = calculate_geometry(&grid, &config);

        // The tile contributes its four edges to the interior, and splits
        // none of the boundary spans.
        let t = 32;
        let expect = [
            // Top edge of the block: non-solid above, runs left-to-right.
            (IVec2::new(3 * t, 2 * t), IVec2::new(4 * t, 2 * t)),
            // Bottom edge: non-solid below, runs right-to-left.
            (IVec2::new(4 * t, 3 * t), IVec2::new(3 * t, 3 * t)),
            // Left edge: non-solid to the left, runs upward.
            (IVec2::new(3 * t, 3 * t), IVec2::new(3 * t, 2 * t)),
            // Right edge: non-solid to the right, runs downward.
            (IVec2::new(4 * t, 2 * t), IVec2::new(4 * t, 3 * t)),
        ];
        assert_eq!(bucket.middle.len(), 4);
        for seg in expect {
            assert!(bucket.middle.contains(&seg), "missing {:?}", seg);
        }
    }

    #[test]
    fn test_adjacent_tiles_merge_into_runs() {
        let config = config();
        let mut grid = TileGrid::new(&config);
        grid.fill(IVec2::new(2, 3), IVec2::new(6, 4), Collision::Full);
        let bucket = calculate_geometry(&grid, &config);

        let t = 32;
        // One maximal top run across all four tiles.
        assert!(bucket
            .middle
            .contains(&(IVec2::new(2 * t, 3 * t), IVec2::new(6 * t, 3 * t))));
        // And one maximal bottom run.
        assert!(bucket
            .middle
            .contains(&(IVec2::new(6 * t, 4 * t), IVec2::new(2 * t, 4 * t))));
        // Sides plus the two runs only.
        assert_eq!(bucket.middle.len(), 4);
    }

    #[test]
    fn test_slope1_run_emits_single_diagonal() {
        let config = config();
        let mut grid = TileGrid::new(&config);
        // A 3-tile 1:1 slope rising to the right; solid corner down-left.
        grid.set(IVec2::new(2, 4), Collision::Slope1Ur);
        grid.set(IVec2::new(3, 3), Collision::Slope1Ur);
        grid.set(IVec2::new(4, 2), Collision::Slope1Ur);
        let bucket = calculate_geometry(&grid, &config);

        let t = 32;
        // One diagonal from the bottom-left of the run to its top-right.
        assert!(bucket
            .middle
            .iter()
            .any(|&seg| seg == (IVec2::new(2 * t, 5 * t), IVec2::new(5 * t, 2 * t))));
    }

    #[test]
    fn test_half_tile_run() {
        let config = config();
        let mut grid = TileGrid::new(&config);
        grid.fill(IVec2::new(1, 2), IVec2::new(4, 3), Collision::HalfD);
        let bucket = calculate_geometry(&grid, &config);

        let t = 32;
        // The flat top of a bottom-half run sits at the tile midline.
        assert!(bucket
            .middle
            .contains(&(IVec2::new(t, 2 * t + t / 2), IVec2::new(4 * t, 2 * t + t / 2))));
    }
}
