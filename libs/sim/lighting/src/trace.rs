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

//! The visibility sweep. Pure functions from a light and a segment set to
//! the even-length trace polyline; no caching, no rendering.
//!
//! All comparisons are exact `f64` equality. The vertex orderings below
//! are total, so a trace is a pure function of its inputs; do not
//! introduce epsilons here without revisiting every tie-break.

use crate::Light;
use fxhash::FxHashMap;
use geom2d::{cross, from_angle, line_intersects_rect, normalise_angle, WVec2};
use ordered_float::OrderedFloat;
use spatial::SpatialHash;
use std::cmp::Ordering;
use worldgeom::Segment;

/// An even-length sequence of origin-relative points; consecutive pairs
/// are edges of the visibility polygon. Cyclic for angular lights, open
/// for planar ones. Adjacent pairs share exact endpoint values, so
/// consumers triangulating the region must reuse the points verbatim to
/// keep edges watertight.
pub type LightTrace = Vec<WVec2>;

/// A segment in origin-relative world coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct WorldSegment {
    pub start: WVec2,
    pub end: WVec2,
}

impl WorldSegment {
    fn new(start: WVec2, end: WVec2) -> Self {
        Self { start, end }
    }
}

impl Default for WorldSegment {
    fn default() -> Self {
        Self::new(WVec2::new(0., 0.), WVec2::new(0., 0.))
    }
}

type VertexKey = (OrderedFloat<f64>, OrderedFloat<f64>);

fn vertex_key(v: &WVec2) -> VertexKey {
    (OrderedFloat(v.x), OrderedFloat(v.y))
}

/// Sorts points radially by angle from the origin, starting at angle 0
/// (rightwards) and increasing; distance from the origin breaks ties on
/// a shared ray.
fn angular_order(a: &WVec2, b: &WVec2) -> Ordering {
    fn before(a: &WVec2, b: &WVec2) -> bool {
        // Eliminate points in opposite half-planes.
        if a.y >= 0. && b.y < 0. {
            return true;
        }
        if a.y < 0. && b.y >= 0. {
            return false;
        }
        if a.y == 0. && b.y == 0. {
            return if a.x >= 0. && b.x >= 0. {
                a.x < b.x
            } else {
                a.x > b.x
            };
        }

        let d = cross(b, a);
        // If d is zero the points are on the same half-line, so fall back
        // to distance from the origin.
        d < 0. || (d == 0. && a.norm_squared() < b.norm_squared())
    }

    if before(a, b) {
        Ordering::Less
    } else if before(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Sorts by projection onto the line perpendicular to `normal_vec`;
/// signed distance along the normal breaks ties.
fn planar_order(normal_vec: &WVec2, a: &WVec2, b: &WVec2) -> Ordering {
    let plane_vec = WVec2::new(normal_vec.y, -normal_vec.x);
    let a_dot = a.dot(&plane_vec);
    let b_dot = b.dot(&plane_vec);
    a_dot
        .partial_cmp(&b_dot)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.dot(normal_vec)
                .partial_cmp(&b.dot(normal_vec))
                .unwrap_or(Ordering::Equal)
        })
}

pub(crate) struct RelevantGeometry {
    pub vertices: Vec<WVec2>,
    pub segments: Vec<WorldSegment>,
    pub map: FxHashMap<VertexKey, Vec<WorldSegment>>,
}

/// Candidate segments and vertices for an angular light, translated into
/// origin-relative coordinates and pre-filtered by orientation.
pub(crate) fn angular_relevant_geometry(
    light: &Light,
    origin: &WVec2,
    all_geometry: &SpatialHash<Segment>,
) -> RelevantGeometry {
    // We could find only the vertices whose segments intersect the circle
    // defined by origin and max range, but squares are easier.
    let max_range = light.max_range();
    let bound = WVec2::new(max_range, max_range);

    let mut segments = Vec::new();
    let mut map: FxHashMap<VertexKey, Vec<WorldSegment>> = FxHashMap::default();
    for segment in all_geometry.search(&(origin - bound), &(origin + bound)) {
        // Translate to origin.
        let g_s = WVec2::new(segment.start.x as f64, segment.start.y as f64) - origin;
        let g_e = WVec2::new(segment.end.x as f64, segment.end.y as f64) - origin;

        if !line_intersects_rect(&g_s, &g_e, &-bound, &bound) {
            continue;
        }

        // Exclude segments defined in the wrong direction, that is, going
        // clockwise rather than anticlockwise around the origin.
        if cross(&g_e, &g_s) >= 0. {
            continue;
        }

        // Lights may shine in from outside the active window.
        if segment.external {
            continue;
        }

        let seg = WorldSegment::new(g_s, g_e);
        segments.push(seg);
        map.entry(vertex_key(&g_s)).or_default().push(seg);
        map.entry(vertex_key(&g_e)).or_default().push(seg);
    }

    let mut vertices: Vec<WVec2> = map.keys().map(|&(x, y)| WVec2::new(x.0, y.0)).collect();

    // Corners of the max-range square. These aren't real vertices, but
    // make the sweep stick to the outside of the square across any
    // rotation gap of more than pi / 2 with no real vertices in it.
    vertices.push(WVec2::new(-max_range, -max_range));
    vertices.push(WVec2::new(max_range, -max_range));
    vertices.push(WVec2::new(-max_range, max_range));
    vertices.push(WVec2::new(max_range, max_range));

    vertices.sort_by(angular_order);
    RelevantGeometry {
        vertices,
        segments,
        map,
    }
}

/// Candidate segments and vertices for a planar light: everything
/// intersecting the bounding box of the light's parallelogram.
pub(crate) fn planar_relevant_geometry(
    light: &Light,
    origin: &WVec2,
    all_geometry: &SpatialHash<Segment>,
) -> RelevantGeometry {
    let offset = light.offset();
    let v = light.normal_vec * light.max_range();

    let min_bound = (-offset).inf(&offset).inf(&(v - offset).inf(&(v + offset)));
    let max_bound = (-offset).sup(&offset).sup(&(v - offset).sup(&(v + offset)));

    let mut segments = Vec::new();
    let mut map: FxHashMap<VertexKey, Vec<WorldSegment>> = FxHashMap::default();
    for segment in all_geometry.search(&(origin + min_bound), &(origin + max_bound)) {
        let g_s = WVec2::new(segment.start.x as f64, segment.start.y as f64) - origin;
        let g_e = WVec2::new(segment.end.x as f64, segment.end.y as f64) - origin;

        if !line_intersects_rect(&g_s, &g_e, &min_bound, &max_bound) {
            continue;
        }

        // Exclude segments crossing the light direction the wrong way.
        if cross(&(g_e - g_s), &v) >= 0. {
            continue;
        }

        if segment.external {
            continue;
        }

        let seg = WorldSegment::new(g_s, g_e);
        segments.push(seg);
        map.entry(vertex_key(&g_s)).or_default().push(seg);
        map.entry(vertex_key(&g_e)).or_default().push(seg);
    }

    let mut vertices: Vec<WVec2> = map.keys().map(|&(x, y)| WVec2::new(x.0, y.0)).collect();

    // The two far-plane corners close the sweep.
    vertices.push(v - offset);
    vertices.push(v + offset);

    let normal = light.normal_vec;
    vertices.sort_by(|a, b| planar_order(&normal, a, b));
    RelevantGeometry {
        vertices,
        segments,
        map,
    }
}

/// Point on `segment` along the ray from the origin through `v`: the t
/// with `g(t) = start + t * (end - start)` and `g(t) x v = 0`.
pub(crate) fn angular_point_on_segment(v: &WVec2, segment: &WorldSegment) -> WVec2 {
    let g_vec = segment.end - segment.start;
    let d = cross(v, &g_vec);
    if d == 0. {
        // Parallel rays should have been excluded.
        return WVec2::new(0., 0.);
    }
    let t = cross(&segment.start, v) / d;
    segment.start + g_vec * t
}

/// Point on `segment` along the line through `v` in the direction of the
/// light's normal.
pub(crate) fn planar_point_on_segment(
    normal_vec: &WVec2,
    v: &WVec2,
    segment: &WorldSegment,
) -> WVec2 {
    let g_vec = segment.end - segment.start;
    let d = cross(&g_vec, normal_vec);
    if d == 0. {
        // Normal in the same direction as the segment; excluded earlier.
        return WVec2::new(0., 0.);
    }
    let t = cross(&g_vec, &(segment.start - v)) / d;
    v + normal_vec * t
}

/// Active set of segments crossed by the sweep ray. Linear scan; the set
/// stays small and equality is exact.
#[derive(Default)]
struct SegmentStack {
    segments: Vec<WorldSegment>,
}

impl SegmentStack {
    fn insert(&mut self, seg: &WorldSegment) {
        if !self.segments.contains(seg) {
            self.segments.push(*seg);
        }
    }

    fn remove(&mut self, seg: &WorldSegment) {
        self.segments.retain(|s| s != seg);
    }

    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &WorldSegment> {
        self.segments.iter()
    }
}

/// Closest active segment along the ray through `v`, by squared distance
/// of the ray intersection from the origin. Falls back to the max-range
/// square, picking the edge matching `v`'s octant so the sweep follows
/// the square in rotation order.
fn angular_closest(
    max_range: f64,
    v: &WVec2,
    stack: &SegmentStack,
) -> (WorldSegment, WVec2) {
    if stack.is_empty() {
        let ul = WVec2::new(-max_range, -max_range);
        let ur = WVec2::new(max_range, -max_range);
        let dl = WVec2::new(-max_range, max_range);
        let dr = WVec2::new(max_range, max_range);

        // Choose the edge in the direction of rotation at the corners.
        let geometry = if v.x == v.y {
            if v.x > 0. {
                WorldSegment::new(dr, dl)
            } else {
                WorldSegment::new(ul, ur)
            }
        } else if v.x == -v.y {
            if v.x > 0. {
                WorldSegment::new(ur, dr)
            } else {
                WorldSegment::new(dl, ul)
            }
        } else if v.y > 0. && v.y >= v.x.abs() {
            WorldSegment::new(dr, dl)
        } else if v.y < 0. && -v.y >= v.x.abs() {
            WorldSegment::new(ul, ur)
        } else if v.x > 0. && v.x >= v.y.abs() {
            WorldSegment::new(ur, dr)
        } else if v.x < 0. && -v.x >= v.y.abs() {
            WorldSegment::new(dl, ul)
        } else {
            WorldSegment::default()
        };

        let point = angular_point_on_segment(v, &geometry);
        return (geometry, point);
    }

    let mut closest = WorldSegment::default();
    let mut closest_point = WVec2::new(0., 0.);
    let mut min_dist_sq = 0.;
    let mut first = true;
    for g in stack.iter() {
        let point = angular_point_on_segment(v, g);
        let dist_sq = point.norm_squared();
        if first || dist_sq < min_dist_sq {
            min_dist_sq = dist_sq;
            closest = *g;
            closest_point = point;
        }
        first = false;
    }
    (closest, closest_point)
}

/// Closest active segment along the normal through `v`, by squared
/// distance from the light plane; the far plane when the stack is empty.
fn planar_closest(light: &Light, v: &WVec2, stack: &SegmentStack) -> (WorldSegment, WVec2) {
    let offset = light.offset();
    let plane = WorldSegment::new(-offset, offset);
    let plane_point = planar_point_on_segment(&light.normal_vec, v, &plane);

    let mut closest = WorldSegment::default();
    let mut closest_point = WVec2::new(0., 0.);
    let mut min_dist_sq = 0.;
    let mut first = true;
    for g in stack.iter() {
        let point = planar_point_on_segment(&light.normal_vec, v, g);
        let dist_sq = (point - plane_point).norm_squared();
        if first || dist_sq < min_dist_sq {
            min_dist_sq = dist_sq;
            closest = *g;
            closest_point = point;
        }
        first = false;
    }

    if first {
        let far = WorldSegment::new(
            light.normal_vec * light.max_range() + offset,
            light.normal_vec * light.max_range() - offset,
        );
        let point = planar_point_on_segment(&light.normal_vec, v, &far);
        return (far, point);
    }
    (closest, closest_point)
}

pub(crate) fn trace_angular(light: &Light, geometry: &RelevantGeometry) -> LightTrace {
    let mut output = LightTrace::new();
    if geometry.vertices.is_empty() {
        return output;
    }
    let max_range = light.max_range();

    // Initialise the stack with segments crossing the line from the
    // origin through the first vertex (but not starting exactly on it);
    // the orientation filter guarantees only the positive half-line
    // matters when the crossing signs are checked this way around.
    let mut stack = SegmentStack::default();
    let first_vec = geometry.vertices[0];
    for g in &geometry.segments {
        if cross(&first_vec, &g.start) < 0. && cross(&first_vec, &g.end) >= 0. {
            stack.insert(g);
        }
    }

    // Loop through the vertices. When one is the end of an active
    // segment, relative to the sweep direction, remove it; when it is the
    // start, add it. Orientation filtering makes start/end of the segment
    // correspond exactly to entering/leaving the sweep ray.
    let (mut prev_closest, _) = angular_closest(max_range, &first_vec, &stack);
    // If the stack is empty, make sure the first vertex gets added.
    let mut add_first = stack.is_empty();

    for i in 0..geometry.vertices.len() {
        let v = geometry.vertices[i];

        if let Some(list) = geometry.map.get(&vertex_key(&v)) {
            for g in list {
                if v == g.start {
                    stack.insert(g);
                } else {
                    stack.remove(g);
                }
            }
        }

        // If we're on the same ray from the origin as the next vertex,
        // this vertex doesn't represent a new angle; merge the runs.
        if i + 1 < geometry.vertices.len() {
            let next = geometry.vertices[i + 1];
            if cross(&v, &next) == 0. {
                continue;
            }
        }

        let (new_closest, new_closest_point) = angular_closest(max_range, &v, &stack);

        if new_closest == prev_closest && !add_first {
            continue;
        }
        add_first = false;

        let prev_closest_point = angular_point_on_segment(&v, &prev_closest);
        output.push(prev_closest_point);
        output.push(new_closest_point);

        prev_closest = new_closest;
    }
    output
}

pub(crate) fn trace_planar(light: &Light, geometry: &RelevantGeometry) -> LightTrace {
    let mut output = LightTrace::new();
    if geometry.vertices.is_empty() {
        return output;
    }

    // The strategy mirrors the angular sweep, in coordinates with respect
    // to the basis defined by the light plane rather than angular ones.
    // Segments crossing the light plane itself are not split; they were
    // filtered by direction instead.
    let plane_vec = WVec2::new(light.normal_vec.y, -light.normal_vec.x);

    let mut stack = SegmentStack::default();
    let first_vec = geometry.vertices[0];
    for g in &geometry.segments {
        if cross(&(g.start - first_vec), &light.normal_vec) < 0.
            && cross(&(g.end - first_vec), &light.normal_vec) >= 0.
        {
            stack.insert(g);
        }
    }

    let (mut prev_closest, _) = planar_closest(light, &first_vec, &stack);
    let mut add_first = stack.is_empty();

    for i in 0..geometry.vertices.len() {
        let v = geometry.vertices[i];

        if let Some(list) = geometry.map.get(&vertex_key(&v)) {
            for g in list {
                if v == g.end {
                    stack.insert(g);
                } else {
                    stack.remove(g);
                }
            }
        }

        // Skip if the next vertex projects to the same sweep position.
        if i + 1 < geometry.vertices.len() {
            let next = geometry.vertices[i + 1];
            if v.dot(&plane_vec) == next.dot(&plane_vec) {
                continue;
            }
        }

        let (new_closest, new_closest_point) = planar_closest(light, &v, &stack);

        let add_last = i + 1 == geometry.vertices.len() && stack.is_empty();
        if new_closest == prev_closest && !add_first && !add_last {
            continue;
        }
        add_first = false;

        let prev_closest_point = planar_point_on_segment(&light.normal_vec, &v, &prev_closest);
        output.push(prev_closest_point);
        output.push(new_closest_point);

        prev_closest = new_closest;
    }
    output
}

/// Slice a full angular trace down to the wedge of a cone light.
///
/// The result fans from the apex: a zero vector, the entry intersection,
/// the straight runs inside the wedge, the exit intersection, and a
/// closing zero vector. Apertures of pi or more return the full trace.
pub fn make_cone_trace(trace: &LightTrace, angle: f64, aperture: f64) -> LightTrace {
    use std::f64::consts::PI;
    if aperture >= PI {
        return trace.clone();
    }
    let mut output = LightTrace::new();
    if trace.is_empty() {
        return output;
    }

    let min = from_angle(normalise_angle(angle - aperture));
    let max = from_angle(normalise_angle(angle + aperture));

    // Re-order the trace so that it doesn't have a gap in the middle, by
    // collecting straight runs of pairs inside the cone.
    let mut straight = false;
    let mut straight_traces: Vec<LightTrace> = Vec::new();

    let mut min_index = 0;
    let mut max_index = 0;

    let mut i = 0;
    while i < trace.len() {
        let v = trace[i];
        let w = trace[1 + i];
        let v2 = trace[(2 + i) % trace.len()];

        let min_check = cross(&v, &min);
        let max_check = cross(&v, &max);

        // Find start and end indices of the conical section.
        if min_check >= 0. && cross(&v2, &min) < 0. {
            min_index = i;
        }
        if max_check >= 0. && cross(&v2, &max) < 0. {
            max_index = i;
        }

        // The conical section is the intersection of the half-planes
        // defined by the boundary rays for narrow cones, their union for
        // wide ones.
        let inside = if aperture > PI / 2. {
            min_check < 0. || max_check >= 0.
        } else {
            min_check < 0. && max_check >= 0.
        };
        if inside {
            if !straight {
                straight = true;
                straight_traces.push(LightTrace::new());
            }
            let last = straight_traces
                .last_mut()
                .expect("just pushed a run above");
            last.push(v);
            last.push(w);
        } else {
            straight = false;
        }

        i += 2;
    }

    // Assemble the trace from the straight runs, with the boundary-ray
    // crossings and the apex pair at the ends.
    let min_cross = WorldSegment::new(trace[1 + min_index], trace[(2 + min_index) % trace.len()]);
    let max_cross = WorldSegment::new(trace[1 + max_index], trace[(2 + max_index) % trace.len()]);

    output.push(WVec2::new(0., 0.));
    output.push(angular_point_on_segment(&min, &min_cross));
    for run in straight_traces.iter().rev() {
        output.extend_from_slice(run);
    }
    output.push(angular_point_on_segment(&max, &max_cross));
    output.push(WVec2::new(0., 0.));
    output
}
