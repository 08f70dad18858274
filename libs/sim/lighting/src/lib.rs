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

//! Per-light visibility tracing with frame-to-frame caching.

mod trace;

pub use crate::trace::{make_cone_trace, LightTrace};

use crate::trace::{
    angular_relevant_geometry, planar_relevant_geometry, trace_angular, trace_planar,
};
use fxhash::FxHashMap;
use geom2d::{cross, WVec2};
use log::trace as log_trace;
use ordered_float::OrderedFloat;
use spatial::SpatialHash;
use std::f64::consts::PI;
use std::hash::{Hash, Hasher};
use worldgeom::Segment;

/// A light owned by some world object. `offset` is local to the owner;
/// planar lights shine along `normal_vec` from the plane spanned by
/// `offset` on either side of the origin.
#[derive(Clone, Debug)]
pub struct Light {
    pub offset: WVec2,
    pub full_range: f64,
    /// Additional soft falloff beyond `full_range`.
    pub falloff_range: f64,
    pub colour: [f32; 4],
    pub layer_value: f64,
    pub angle: f64,
    pub aperture: f64,
    pub normal_vec: WVec2,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            offset: WVec2::new(0., 0.),
            full_range: 1.,
            falloff_range: 1.,
            colour: [1., 1., 1., 1.],
            layer_value: 0.,
            angle: 0.,
            aperture: PI,
            normal_vec: WVec2::new(0., 0.),
        }
    }
}

impl Light {
    pub fn max_range(&self) -> f64 {
        self.full_range + self.falloff_range
    }

    pub fn is_planar(&self) -> bool {
        self.normal_vec != WVec2::new(0., 0.)
    }

    pub fn is_cone(&self) -> bool {
        !self.is_planar() && self.aperture < PI
    }

    /// World origin of the trace given the owner's origin.
    pub fn origin(&self, owner_origin: &WVec2) -> WVec2 {
        if self.is_planar() {
            *owner_origin
        } else {
            owner_origin + self.offset
        }
    }

    /// The plane offset, sign-normalised so it is consistent relative to
    /// the normal.
    pub fn offset(&self) -> WVec2 {
        if !self.is_planar() {
            return self.offset;
        }
        if cross(&self.offset, &self.normal_vec) >= 0. {
            self.offset
        } else {
            -self.offset
        }
    }

    /// Conservative camera test: the range square for point lights, the
    /// bounding box of the lit parallelogram for planar ones.
    pub fn overlaps_rect(&self, origin: &WVec2, min: &WVec2, max: &WVec2) -> bool {
        let max_range = self.max_range();
        let bound = WVec2::new(max_range, max_range);
        if !self.is_planar() {
            return origin + bound >= *min && origin - bound < *max;
        }

        let a = origin - self.offset;
        let b = origin + self.offset;
        let c = a + self.normal_vec * max_range;
        let d = b + self.normal_vec * max_range;

        let light_min = a.inf(&b).inf(&c.inf(&d));
        let light_max = a.sup(&b).sup(&c.sup(&d));
        light_max > *min && light_min < *max
    }
}

/// Cache key for a computed trace. Deliberately excludes `angle` and
/// `aperture` so a cone light can rotate without invalidating its full
/// 360-degree trace; `offset` only matters for planar lights.
#[derive(Clone, Copy, Debug)]
pub struct TraceKey {
    origin: WVec2,
    max_range: f64,
    normal_vec: WVec2,
    offset: WVec2,
}

impl TraceKey {
    pub fn new(light: &Light, origin: &WVec2) -> Self {
        Self {
            origin: *origin,
            max_range: light.max_range(),
            normal_vec: light.normal_vec,
            offset: light.offset(),
        }
    }

    fn is_planar(&self) -> bool {
        self.normal_vec != WVec2::new(0., 0.)
    }

    pub fn origin(&self) -> &WVec2 {
        &self.origin
    }
}

impl PartialEq for TraceKey {
    fn eq(&self, other: &Self) -> bool {
        if self.origin != other.origin
            || self.max_range != other.max_range
            || self.normal_vec != other.normal_vec
        {
            return false;
        }
        !self.is_planar() || self.offset == other.offset
    }
}
impl Eq for TraceKey {}

impl Hash for TraceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        OrderedFloat(self.origin.x).hash(state);
        OrderedFloat(self.origin.y).hash(state);
        OrderedFloat(self.max_range).hash(state);
        OrderedFloat(self.normal_vec.x).hash(state);
        OrderedFloat(self.normal_vec.y).hash(state);
        if self.is_planar() {
            OrderedFloat(self.offset.x).hash(state);
            OrderedFloat(self.offset.y).hash(state);
        }
    }
}

/// Compute the visibility trace for one light. Deterministic and
/// side-effect free; every input produces an output.
pub fn trace(light: &Light, origin: &WVec2, geometry: &SpatialHash<Segment>) -> LightTrace {
    if light.is_planar() {
        let relevant = planar_relevant_geometry(light, origin, geometry);
        trace_planar(light, &relevant)
    } else {
        let relevant = angular_relevant_geometry(light, origin, geometry);
        trace_angular(light, &relevant)
    }
}

/// Frame-to-frame trace cache.
#[derive(Debug, Default)]
pub struct Lighting {
    trace_results: FxHashMap<TraceKey, LightTrace>,
}

impl Lighting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute traces for this frame's lights and drop every cached
    /// entry that was not requested; afterwards the cache holds exactly
    /// the frame's key set. Camera culling is the renderer's decision
    /// (via [`Light::overlaps_rect`]): a light off screen keeps its cache
    /// entry. Cone lights are keyed by their full trace, so rotating one
    /// is a cache hit.
    pub fn recalculate_traces<'a>(
        &mut self,
        sources: impl IntoIterator<Item = (WVec2, &'a Light)>,
        geometry: &SpatialHash<Segment>,
    ) {
        // Max range could also be clamped to the camera bounds, but that
        // blows the cache for every camera pan; not worth it unless
        // profiling says otherwise.
        let mut preserve: Vec<TraceKey> = Vec::new();
        let mut misses = 0usize;

        for (owner_origin, light) in sources {
            let origin = light.origin(&owner_origin);
            let key = TraceKey::new(light, &origin);
            preserve.push(key);

            if self.trace_results.contains_key(&key) {
                continue;
            }
            let result = trace(light, &origin, geometry);
            self.trace_results.insert(key, result);
            misses += 1;
        }

        self.trace_results
            .retain(|key, _| preserve.contains(key));
        log_trace!(
            "light traces: {} requested, {} recomputed",
            preserve.len(),
            misses
        );
    }

    pub fn clear_results_and_cache(&mut self) {
        self.trace_results.clear();
    }

    pub fn cached(&self, light: &Light, owner_origin: &WVec2) -> Option<&LightTrace> {
        let origin = light.origin(owner_origin);
        self.trace_results.get(&TraceKey::new(light, &origin))
    }

    pub fn keys(&self) -> impl Iterator<Item = &TraceKey> {
        self.trace_results.keys()
    }

    pub fn len(&self) -> usize {
        self.trace_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_results.is_empty()
    }

    /// Debug-render support: the polygon edges of every cached trace,
    /// world-positioned and clipped to the camera rectangle.
    pub fn visible_trace_lines(
        &self,
        camera_min: &WVec2,
        camera_max: &WVec2,
    ) -> Vec<(WVec2, WVec2)> {
        let mut lines = Vec::new();
        for (key, result) in &self.trace_results {
            if result.is_empty() {
                continue;
            }
            for i in 0..result.len() {
                let a = key.origin + result[i];
                let b = key.origin + result[(1 + i) % result.len()];
                let min = a.inf(&b);
                let max = a.sup(&b);
                if max >= *camera_min && min < *camera_max {
                    lines.push((a, b));
                }
            }
        }
        lines
    }
}
