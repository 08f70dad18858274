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

//! Uniform grid over dynamic AABB-keyed entries.
//!
//! Entries are bucketed into fixed-size cells keyed by floor-divided
//! coordinates, so negative world positions bucket correctly. Region
//! queries touch only the overlapping cells and may return false positives
//! from the AABB approximation; callers refine with an exact test.

use fxhash::{FxHashMap, FxHashSet};
use geom2d::WVec2;
use smallvec::SmallVec;
use std::hash::Hash;

#[derive(Clone, Debug)]
struct SlotEntry<T> {
    entry: T,
    min: WVec2,
    max: WVec2,
    // Cells currently containing this entry.
    cells: SmallVec<[(i32, i32); 4]>,
}

#[derive(Debug)]
pub struct SpatialHash<T: Clone + Eq + Hash> {
    cell_size: f64,
    cells: FxHashMap<(i32, i32), SmallVec<[usize; 8]>>,
    slots: Vec<Option<SlotEntry<T>>>,
    index: FxHashMap<T, usize>,
    free: Vec<usize>,
}

impl<T: Clone + Eq + Hash> SpatialHash<T> {
    pub fn new(cell_size: f64) -> Self {
        debug_assert!(cell_size > 0.);
        Self {
            cell_size,
            cells: FxHashMap::default(),
            slots: Vec::new(),
            index: FxHashMap::default(),
            free: Vec::new(),
        }
    }

    #[inline]
    fn cell_coord(&self, value: f64) -> i32 {
        (value / self.cell_size).floor() as i32
    }

    fn covered_cells(&self, min: &WVec2, max: &WVec2) -> SmallVec<[(i32, i32); 4]> {
        let x0 = self.cell_coord(min.x.min(max.x));
        let x1 = self.cell_coord(min.x.max(max.x));
        let y0 = self.cell_coord(min.y.min(max.y));
        let y1 = self.cell_coord(min.y.max(max.y));
        let mut out = SmallVec::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                out.push((x, y));
            }
        }
        out
    }

    fn unlink(&mut self, slot: usize, cells: &[(i32, i32)]) {
        for key in cells {
            let bucket = self
                .cells
                .get_mut(key)
                .expect("spatial invariant violated: missing cell for slot");
            let pos = bucket
                .iter()
                .position(|&s| s == slot)
                .expect("spatial invariant violated: slot not in expected cell");
            bucket.swap_remove(pos);
            if bucket.is_empty() {
                self.cells.remove(key);
            }
        }
    }

    /// Insert `entry` with the given bounds. Inserting an entry that is
    /// already present behaves like `update`.
    pub fn insert(&mut self, entry: T, min: WVec2, max: WVec2) {
        if let Some(&slot) = self.index.get(&entry) {
            let old = self.slots[slot]
                .take()
                .expect("spatial invariant violated: indexed slot is vacant");
            self.unlink(slot, &old.cells);
            let cells = self.covered_cells(&min, &max);
            for &key in &cells {
                self.cells.entry(key).or_default().push(slot);
            }
            self.slots[slot] = Some(SlotEntry {
                entry,
                min,
                max,
                cells,
            });
            return;
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        let cells = self.covered_cells(&min, &max);
        for &key in &cells {
            self.cells.entry(key).or_default().push(slot);
        }
        self.index.insert(entry.clone(), slot);
        self.slots[slot] = Some(SlotEntry {
            entry,
            min,
            max,
            cells,
        });
    }

    /// Logically remove + re-insert; O(cells covered).
    pub fn update(&mut self, entry: T, min: WVec2, max: WVec2) {
        self.insert(entry, min, max);
    }

    pub fn remove(&mut self, entry: &T) {
        if let Some(slot) = self.index.remove(entry) {
            let old = self.slots[slot]
                .take()
                .expect("spatial invariant violated: indexed slot is vacant");
            self.unlink(slot, &old.cells);
            self.free.push(slot);
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.slots.clear();
        self.index.clear();
        self.free.clear();
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Every entry whose recorded AABB overlaps the query rectangle,
    /// each reported exactly once, in no particular order.
    pub fn search(&self, min: &WVec2, max: &WVec2) -> impl Iterator<Item = &T> + '_ {
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut hits: Vec<usize> = Vec::new();
        for key in self.covered_cells(min, max) {
            if let Some(bucket) = self.cells.get(&key) {
                for &slot in bucket {
                    if !seen.insert(slot) {
                        continue;
                    }
                    let e = self.slots[slot]
                        .as_ref()
                        .expect("spatial invariant violated: cell references vacant slot");
                    if e.min <= *max && e.max >= *min {
                        hits.push(slot);
                    }
                }
            }
        }
        hits.into_iter().map(move |slot| {
            &self.slots[slot]
                .as_ref()
                .expect("spatial invariant violated: hit references vacant slot")
                .entry
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64) -> WVec2 {
        WVec2::new(x, y)
    }

    fn collect<'a>(it: impl Iterator<Item = &'a i32>) -> Vec<i32> {
        let mut out: Vec<i32> = it.copied().collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_insert_search_remove() {
        let mut hash: SpatialHash<i32> = SpatialHash::new(64.);
        hash.insert(1, v(0., 0.), v(10., 10.));
        hash.insert(2, v(100., 100.), v(110., 110.));

        assert_eq!(collect(hash.search(&v(-5., -5.), &v(5., 5.))), vec![1]);
        assert_eq!(
            collect(hash.search(&v(-5., -5.), &v(120., 120.))),
            vec![1, 2]
        );

        hash.remove(&1);
        assert!(collect(hash.search(&v(-5., -5.), &v(5., 5.))).is_empty());
        assert_eq!(hash.len(), 1);
    }

    #[test]
    fn test_update_moves_entry() {
        let mut hash: SpatialHash<i32> = SpatialHash::new(64.);
        hash.insert(7, v(0., 0.), v(1., 1.));
        hash.update(7, v(200., 200.), v(201., 201.));

        assert!(collect(hash.search(&v(-2., -2.), &v(2., 2.))).is_empty());
        assert_eq!(
            collect(hash.search(&v(199., 199.), &v(202., 202.))),
            vec![7]
        );
        assert_eq!(hash.len(), 1);
    }

    #[test]
    fn test_multi_cell_entry_reported_once() {
        let mut hash: SpatialHash<i32> = SpatialHash::new(10.);
        hash.insert(3, v(-25., -25.), v(25., 25.));
        assert_eq!(collect(hash.search(&v(-30., -30.), &v(30., 30.))), vec![3]);
    }

    #[test]
    fn test_negative_coordinates_bucket_correctly() {
        let mut hash: SpatialHash<i32> = SpatialHash::new(10.);
        hash.insert(4, v(-25., -25.), v(-15., -15.));
        assert_eq!(
            collect(hash.search(&v(-20., -20.), &v(-19., -19.))),
            vec![4]
        );
        assert!(collect(hash.search(&v(5., 5.), &v(6., 6.))).is_empty());
    }
}
