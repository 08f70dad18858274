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
use geom2d::{cross, IVec2, WVec2};
use lighting::{make_cone_trace, trace, Light, Lighting};
use spatial::SpatialHash;
use std::f64::consts::PI;
use worldgeom::Segment;

fn geometry_of(segments: &[(IVec2, IVec2)]) -> SpatialHash<Segment> {
    let mut hash = SpatialHash::new(128.);
    for &(start, end) in segments {
        let seg = Segment::new(start, end, false);
        let min = seg.min();
        let max = seg.max();
        hash.insert(
            seg,
            WVec2::new(min.x as f64, min.y as f64),
            WVec2::new(max.x as f64, max.y as f64),
        );
    }
    hash
}

/// A 10x10 axis-aligned box centred on the origin, oriented so the
/// origin-side is to each segment's left.
fn box_geometry() -> SpatialHash<Segment> {
    geometry_of(&[
        (IVec2::new(-5, -5), IVec2::new(5, -5)),
        (IVec2::new(5, -5), IVec2::new(5, 5)),
        (IVec2::new(5, 5), IVec2::new(-5, 5)),
        (IVec2::new(-5, 5), IVec2::new(-5, -5)),
    ])
}

fn point_light(max_range: f64) -> Light {
    Light {
        full_range: max_range,
        falloff_range: 0.,
        ..Light::default()
    }
}

/// Signed area of the fan polygon formed by the trace around the origin.
fn trace_area(result: &[WVec2]) -> f64 {
    let mut area = 0.;
    for i in 0..result.len() {
        let a = result[i];
        let b = result[(1 + i) % result.len()];
        area += cross(&a, &b) / 2.;
    }
    area.abs()
}

/// The trace is star-shaped around the origin, so containment is
/// containment in any origin fan triangle.
fn polygon_contains(result: &[WVec2], p: &WVec2) -> bool {
    let origin = WVec2::new(0., 0.);
    for i in 0..result.len() {
        let a = result[i];
        let b = result[(1 + i) % result.len()];
        let d0 = cross(&(a - origin), &(p - origin));
        let d1 = cross(&(b - a), &(p - a));
        let d2 = cross(&(origin - b), &(p - b));
        if (d0 >= 0. && d1 >= 0. && d2 >= 0.) || (d0 <= 0. && d1 <= 0. && d2 <= 0.) {
            return true;
        }
    }
    false
}

#[test]
fn test_empty_geometry_angular_square() {
    let geometry = geometry_of(&[]);
    let light = point_light(100.);
    let result = trace(&light, &WVec2::new(0., 0.), &geometry);

    // The max-range square: one degenerate pair per corner.
    assert_eq!(result.len(), 8);
    assert_eq!(result.len() % 2, 0);
    assert!((trace_area(&result) - 4. * 100. * 100.).abs() < 1e-6);
}

#[test]
fn test_empty_geometry_planar_far_plane() {
    let geometry = geometry_of(&[]);
    let light = Light {
        normal_vec: WVec2::new(0., 1.),
        offset: WVec2::new(10., 0.),
        full_range: 50.,
        falloff_range: 0.,
        ..Light::default()
    };
    let result = trace(&light, &WVec2::new(0., 0.), &geometry);

    // The far plane only.
    assert_eq!(result.len(), 4);
    for p in &result {
        assert_eq!(p.y, 50.);
    }
}

#[test]
fn test_visibility_in_a_box() {
    let geometry = box_geometry();
    let light = point_light(100.);
    let result = trace(&light, &WVec2::new(0., 0.), &geometry);

    // Exactly the four corners, each as a degenerate pair.
    assert_eq!(result.len(), 8);
    for corner in [
        WVec2::new(5., 5.),
        WVec2::new(-5., 5.),
        WVec2::new(-5., -5.),
        WVec2::new(5., -5.),
    ] {
        assert_eq!(result.iter().filter(|p| **p == corner).count(), 2);
    }
    // Triangles from the origin tile the box exactly.
    assert!((trace_area(&result) - 100.).abs() < 1e-9);
}

#[test]
fn test_occlusion_by_one_wall() {
    // One wall spanning x in [-5, 5] at y = 5, lit from the origin.
    let geometry = geometry_of(&[(IVec2::new(5, 5), IVec2::new(-5, 5))]);
    let light = point_light(100.);
    let result = trace(&light, &WVec2::new(0., 0.), &geometry);

    assert_eq!(result.len() % 2, 0);
    // At least one emitted pair lies on the wall.
    let on_wall = |p: &WVec2| p.y == 5. && p.x >= -5. && p.x <= 5.;
    assert!(result
        .chunks(2)
        .any(|pair| on_wall(&pair[0]) || on_wall(&pair[1])));

    // The wedge behind the wall is in shadow; in front is lit.
    assert!(!polygon_contains(&result, &WVec2::new(0., 50.)));
    assert!(polygon_contains(&result, &WVec2::new(0., 4.)));
    assert!(polygon_contains(&result, &WVec2::new(0., -50.)));
    // Past the wall's end the light spills through.
    assert!(polygon_contains(&result, &WVec2::new(80., 50.)));
}

#[test]
fn test_trace_is_deterministic() {
    let geometry = box_geometry();
    let light = point_light(100.);
    let a = trace(&light, &WVec2::new(1., 2.), &geometry);
    let b = trace(&light, &WVec2::new(1., 2.), &geometry);
    assert_eq!(a, b);
}

#[test]
fn test_planar_light_hits_wall() {
    // A wall across the beam of a downward planar light.
    let geometry = geometry_of(&[(IVec2::new(8, 20), IVec2::new(-8, 20))]);
    let light = Light {
        normal_vec: WVec2::new(0., 1.),
        offset: WVec2::new(10., 0.),
        full_range: 50.,
        falloff_range: 0.,
        ..Light::default()
    };
    let result = trace(&light, &WVec2::new(0., 0.), &geometry);

    assert_eq!(result.len() % 2, 0);
    // Some of the beam stops at the wall, some reaches the far plane.
    assert!(result.iter().any(|p| p.y == 20.));
    assert!(result.iter().any(|p| p.y == 50.));
}

#[test]
fn test_cone_slice_stability() {
    let geometry = box_geometry();
    let light = point_light(100.);
    let full = trace(&light, &WVec2::new(0., 0.), &geometry);

    let theta = 0.3;
    let eps = 1e-4;
    let a = make_cone_trace(&full, theta, PI / 4.);
    let b = make_cone_trace(&full, theta + eps, PI / 4.);

    assert_eq!(a.len() % 2, 0);
    assert_eq!(b.len() % 2, 0);
    // Apex pairs at both ends.
    assert_eq!(a[0], WVec2::new(0., 0.));
    assert_eq!(*a.last().unwrap(), WVec2::new(0., 0.));
    // Rotating by epsilon moves the area by O(epsilon).
    assert!((trace_area(&a) - trace_area(&b)).abs() < 0.1);
}

#[test]
fn test_cone_with_full_aperture_is_identity() {
    let geometry = box_geometry();
    let light = point_light(100.);
    let full = trace(&light, &WVec2::new(0., 0.), &geometry);
    assert_eq!(make_cone_trace(&full, 1.2, PI), full);
}

#[test]
fn test_cone_with_zero_aperture_is_degenerate() {
    let geometry = box_geometry();
    let light = point_light(100.);
    let full = trace(&light, &WVec2::new(0., 0.), &geometry);
    let cone = make_cone_trace(&full, 0.3, 0.);
    assert_eq!(cone.len() % 2, 0);
    assert!(trace_area(&cone) < 1e-9);
}

#[test]
fn test_cache_retains_exactly_requested_keys() {
    let geometry = box_geometry();
    let mut lighting = Lighting::new();
    let light_a = point_light(100.);
    let light_b = point_light(60.);

    lighting.recalculate_traces(
        [
            (WVec2::new(0., 0.), &light_a),
            (WVec2::new(1., 0.), &light_b),
        ],
        &geometry,
    );
    assert_eq!(lighting.len(), 2);

    // Dropping one light drops exactly its cache entry.
    lighting.recalculate_traces([(WVec2::new(0., 0.), &light_a)], &geometry);
    assert_eq!(lighting.len(), 1);
    assert!(lighting.cached(&light_a, &WVec2::new(0., 0.)).is_some());
    assert!(lighting.cached(&light_b, &WVec2::new(1., 0.)).is_none());

    lighting.clear_results_and_cache();
    assert!(lighting.is_empty());
}

#[test]
fn test_cone_rotation_is_a_cache_hit() {
    let geometry = box_geometry();
    let mut lighting = Lighting::new();

    let mut cone = point_light(100.);
    cone.aperture = PI / 4.;
    cone.angle = 0.1;

    lighting.recalculate_traces([(WVec2::new(0., 0.), &cone)], &geometry);
    let before: Vec<WVec2> = lighting
        .cached(&cone, &WVec2::new(0., 0.))
        .expect("trace cached")
        .clone();

    // Rotate the cone; the full trace must be reused unchanged.
    cone.angle = 0.9;
    lighting.recalculate_traces([(WVec2::new(0., 0.), &cone)], &geometry);
    assert_eq!(lighting.len(), 1);
    let after = lighting
        .cached(&cone, &WVec2::new(0., 0.))
        .expect("trace cached");
    assert_eq!(*after, before);
}

#[test]
fn test_off_camera_light_still_caches() {
    // Camera culling is a rendering decision; the frame's lights keep
    // their cache entries even when off screen.
    let geometry = box_geometry();
    let mut lighting = Lighting::new();
    let light = point_light(10.);

    assert!(!light.overlaps_rect(
        &WVec2::new(1000., 1000.),
        &WVec2::new(-100., -100.),
        &WVec2::new(100., 100.)
    ));
    lighting.recalculate_traces([(WVec2::new(1000., 1000.), &light)], &geometry);
    assert_eq!(lighting.len(), 1);
    assert!(lighting.cached(&light, &WVec2::new(1000., 1000.)).is_some());
}

#[test]
fn test_external_segments_do_not_occlude() {
    let mut hash = SpatialHash::new(128.);
    let seg = Segment::new(IVec2::new(5, 5), IVec2::new(-5, 5), true);
    hash.insert(seg, WVec2::new(-5., 5.), WVec2::new(5., 5.));

    let light = point_light(100.);
    let result = trace(&light, &WVec2::new(0., 0.), &hash);
    // The external wall is ignored entirely: full square.
    assert_eq!(result.len(), 8);
}
