// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Planar geometry used by the team-area and packing computations.

use matchflow_common::types::Vector3;

/// Area of the minimum axis-aligned bounding rectangle of the points.
pub fn bounding_box_area(points: &[Vector3]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    (max_x - min_x) * (max_y - min_y)
}

/// Convex hull of the xy projections, counter-clockwise, no repeated
/// endpoint. Andrew's monotone chain.
pub fn convex_hull(points: &[Vector3]) -> Vec<(f64, f64)> {
    let mut pts: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
    pts.sort_by(|a, b| a.partial_cmp(b).expect("positions are finite"));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Shoelace area of a simple polygon given as an ordered vertex list.
pub fn polygon_area(vertices: &[(f64, f64)]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0.0;
    for i in 0..vertices.len() {
        let (x1, y1) = vertices[i];
        let (x2, y2) = vertices[(i + 1) % vertices.len()];
        doubled += x1 * y2 - x2 * y1;
    }
    doubled.abs() / 2.0
}

/// Count of opponents standing between the ball and the goal the attack
/// runs towards. `attack_sign` is +1.0 when the attack goes towards
/// positive x, -1.0 otherwise.
pub fn packing(ball: &Vector3, attack_sign: f64, opponents: &[Vector3]) -> i64 {
    opponents
        .iter()
        .filter(|p| (p.x - ball.x) * attack_sign > 0.0)
        .count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64) -> Vector3 {
        Vector3::new(x, y, 0.0)
    }

    #[test]
    fn test_bounding_box_area() {
        assert_eq!(bounding_box_area(&[v(0.0, 0.0)]), 0.0);
        assert_eq!(
            bounding_box_area(&[v(0.0, 0.0), v(2.0, 3.0), v(1.0, 1.0)]),
            6.0
        );
    }

    #[test]
    fn test_convex_hull_and_area() {
        // Unit square plus an interior point.
        let hull = convex_hull(&[
            v(0.0, 0.0),
            v(1.0, 0.0),
            v(1.0, 1.0),
            v(0.0, 1.0),
            v(0.5, 0.5),
        ]);
        assert_eq!(hull.len(), 4);
        assert!((polygon_area(&hull) - 1.0).abs() < 1e-12);

        // Collinear points have no area.
        let hull = convex_hull(&[v(0.0, 0.0), v(1.0, 0.0), v(2.0, 0.0)]);
        assert_eq!(polygon_area(&hull), 0.0);
    }

    #[test]
    fn test_packing_counts_opponents_towards_goal() {
        let ball = v(10.0, 0.0);
        let opponents = [v(20.0, 5.0), v(15.0, -3.0), v(5.0, 0.0)];
        assert_eq!(packing(&ball, 1.0, &opponents), 2);
        assert_eq!(packing(&ball, -1.0, &opponents), 1);
        assert_eq!(packing(&ball, 1.0, &[]), 0);
    }
}
