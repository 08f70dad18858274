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

//! A stack of scoped symbol frames used by the checker and the IR
//! generator. There is always at least one frame.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Clone, Debug)]
pub struct SymbolTable<K: Eq + Hash, V> {
    stack: Vec<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> Default for SymbolTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> SymbolTable<K, V> {
    pub fn new() -> Self {
        Self {
            stack: vec![HashMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.stack.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Frame depth; at least 1.
    pub fn size(&self) -> usize {
        self.stack.len()
    }

    /// Run `f` inside a fresh frame, popping it on every exit path.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.push();
        let result = f(self);
        self.pop();
        result
    }

    /// Insert into the top frame.
    pub fn add(&mut self, symbol: K, value: V) {
        self.stack
            .last_mut()
            .expect("symbol table invariant violated: no frames")
            .insert(symbol, value);
    }

    /// Insert into an arbitrary frame.
    pub fn add_at(&mut self, symbol: K, frame: usize, value: V) {
        if frame < self.stack.len() {
            self.stack[frame].insert(symbol, value);
        }
    }

    /// Remove from the top frame.
    pub fn remove(&mut self, symbol: &K) {
        self.stack
            .last_mut()
            .expect("symbol table invariant violated: no frames")
            .remove(symbol);
    }

    pub fn has(&self, symbol: &K) -> bool {
        self.stack.iter().any(|frame| frame.contains_key(symbol))
    }

    /// Presence in the top frame only.
    pub fn has_top(&self, symbol: &K) -> bool {
        self.stack
            .last()
            .expect("symbol table invariant violated: no frames")
            .contains_key(symbol)
    }

    pub fn has_at(&self, symbol: &K, frame: usize) -> bool {
        frame < self.stack.len() && self.stack[frame].contains_key(symbol)
    }

    /// Index of the topmost frame defining `symbol`.
    pub fn index(&self, symbol: &K) -> Option<usize> {
        self.stack
            .iter()
            .rposition(|frame| frame.contains_key(symbol))
    }

    /// Topmost binding.
    pub fn get(&self, symbol: &K) -> Option<&V> {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.get(symbol))
    }

    pub fn get_mut(&mut self, symbol: &K) -> Option<&mut V> {
        self.stack
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(symbol))
    }

    pub fn get_at(&self, symbol: &K, frame: usize) -> Option<&V> {
        self.stack.get(frame).and_then(|f| f.get(symbol))
    }

    /// All symbols in frames `[min_frame, max_frame)`.
    pub fn symbols_in(&self, min_frame: usize, max_frame: usize) -> Vec<&K> {
        let mut output = Vec::new();
        for frame in self.stack.iter().take(max_frame).skip(min_frame) {
            output.extend(frame.keys());
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_index() {
        let mut table: SymbolTable<&str, i32> = SymbolTable::new();
        table.add("x", 1);
        table.push();
        table.add("x", 2);

        assert_eq!(table.get(&"x"), Some(&2));
        assert_eq!(table.index(&"x"), Some(1));
        table.pop();
        assert_eq!(table.get(&"x"), Some(&1));
        assert_eq!(table.index(&"x"), Some(0));
    }

    #[test]
    fn test_bottom_frame_never_pops() {
        let mut table: SymbolTable<&str, i32> = SymbolTable::new();
        table.pop();
        table.pop();
        assert_eq!(table.size(), 1);
        table.add("x", 1);
        assert!(table.has(&"x"));
    }

    #[test]
    fn test_scoped_releases_on_exit() {
        let mut table: SymbolTable<&str, i32> = SymbolTable::new();
        let depth = table.scoped(|t| {
            t.add("y", 1);
            t.size()
        });
        assert_eq!(depth, 2);
        assert_eq!(table.size(), 1);
        assert!(!table.has(&"y"));
    }
}
