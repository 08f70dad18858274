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

//! Small 2D helpers shared by the world-geometry and lighting crates.
//! Everything is over nalgebra's fixed-size vectors; mixing dimensions is a
//! compile error rather than a runtime one.

use nalgebra::Vector2;

pub type IVec2 = Vector2<i32>;
pub type WVec2 = Vector2<f64>;

/// 2D cross product (perp-dot). Positive when `b` is counter-clockwise
/// from `a`.
#[inline]
pub fn cross(a: &WVec2, b: &WVec2) -> f64 {
    a.perp(b)
}

/// Unit vector at `angle` radians from the positive x axis.
#[inline]
pub fn from_angle(angle: f64) -> WVec2 {
    WVec2::new(angle.cos(), angle.sin())
}

/// Rotate `v` counter-clockwise by `angle` radians.
#[inline]
pub fn rotate(v: &WVec2, angle: f64) -> WVec2 {
    let (sin, cos) = angle.sin_cos();
    WVec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

/// Wrap an angle into [-pi, pi].
#[inline]
pub fn normalise_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

/// Floor division, componentwise.
#[inline]
pub fn euclidean_div(v: &IVec2, d: &IVec2) -> IVec2 {
    IVec2::new(v.x.div_euclid(d.x), v.y.div_euclid(d.y))
}

/// Non-negative remainder, componentwise.
#[inline]
pub fn euclidean_mod(v: &IVec2, d: &IVec2) -> IVec2 {
    IVec2::new(v.x.rem_euclid(d.x), v.y.rem_euclid(d.y))
}

/// Exact segment-vs-rectangle overlap test. The rectangle is half-open on
/// its max edge, matching the tile grid's conventions: a segment lying
/// exactly on the max boundary does not intersect.
pub fn line_intersects_rect(start: &WVec2, end: &WVec2, min: &WVec2, max: &WVec2) -> bool {
    let line_min = start.inf(end);
    let line_max = start.sup(end);

    // Check bounds.
    if !(line_min < *max && line_max > *min) {
        return false;
    }

    // Check equation of line.
    if start.x - end.x != 0. {
        let m = (end.y - start.y) / (end.x - start.x);
        let y_neg = end.y + m * (min.x - end.x);
        let y_pos = end.y + m * (max.x - end.x);

        if (max.y < y_neg && max.y < y_pos) || (min.y >= y_neg && min.y >= y_pos) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_cross_orientation() {
        let x = WVec2::new(1., 0.);
        let y = WVec2::new(0., 1.);
        assert_eq!(cross(&x, &y), 1.);
        assert_eq!(cross(&y, &x), -1.);
        assert_eq!(cross(&x, &x), 0.);
    }

    #[test]
    fn test_from_angle_rotate() {
        assert_relative_eq!(from_angle(0.), WVec2::new(1., 0.));
        assert_relative_eq!(from_angle(PI / 2.), WVec2::new(0., 1.), epsilon = 1e-12);
        assert_relative_eq!(
            rotate(&WVec2::new(1., 0.), PI),
            WVec2::new(-1., 0.),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_normalise_angle() {
        assert_relative_eq!(normalise_angle(3. * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(normalise_angle(-PI / 2.), -PI / 2., epsilon = 1e-12);
    }

    #[test]
    fn test_euclidean() {
        for n in -20..20 {
            for d in [-7, -3, 1, 4] {
                let q = n_div(n, d);
                let r = n_mod(n, d);
                assert!(0 <= r && r < d.abs(), "n={} d={} r={}", n, d, r);
                assert_eq!(d * q + r, n);
            }
        }

        fn n_div(n: i32, d: i32) -> i32 {
            euclidean_div(&IVec2::new(n, 0), &IVec2::new(d, 1)).x
        }
        fn n_mod(n: i32, d: i32) -> i32 {
            euclidean_mod(&IVec2::new(n, 0), &IVec2::new(d, 1)).x
        }
    }

    #[test]
    fn test_line_intersects_rect() {
        let min = WVec2::new(-1., -1.);
        let max = WVec2::new(1., 1.);
        // Crossing diagonal.
        assert!(line_intersects_rect(
            &WVec2::new(-2., -2.),
            &WVec2::new(2., 2.),
            &min,
            &max
        ));
        // Entirely outside.
        assert!(!line_intersects_rect(
            &WVec2::new(2., -2.),
            &WVec2::new(2., 2.),
            &min,
            &max
        ));
        // Steep line passing left of the rect.
        assert!(!line_intersects_rect(
            &WVec2::new(-4., -4.),
            &WVec2::new(-1.5, 4.),
            &min,
            &max
        ));
        // Vertical line through the interior.
        assert!(line_intersects_rect(
            &WVec2::new(0., -5.),
            &WVec2::new(0., 5.),
            &min,
            &max
        ));
    }
}
