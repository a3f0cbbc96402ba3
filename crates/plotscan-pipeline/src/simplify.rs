//! Polygon approximation using the Ramer-Douglas-Peucker algorithm.
//!
//! The rectifier needs to know whether a traced page outline is "really"
//! a quadrilateral. Border following yields hundreds of staircase points
//! along each side; RDP with a tolerance proportional to the perimeter
//! collapses every side to its two corners.

use crate::types::{PixelPoint, Point};

/// Approximate a closed contour by a polygon whose edges stay within
/// `epsilon` pixels of the original points.
///
/// The loop is split at the point farthest from the first point, each
/// half is simplified with RDP, and a final cyclic pass drops vertices
/// that ended up within `epsilon` of the segment joining their
/// neighbours (the split point itself can be such a vertex).
///
/// Contours with fewer than 3 points are returned unchanged.
#[must_use = "returns the approximated polygon"]
pub fn approximate_closed(points: &[PixelPoint], epsilon: f64) -> Vec<PixelPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let start = Point::from(points[0]);
    let split = points
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, &p)| (i, start.distance_squared(Point::from(p))))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best })
        .0;
    if split == 0 {
        // Every point coincides with the start.
        return vec![points[0]];
    }

    let mut closed: Vec<PixelPoint> = points.to_vec();
    closed.push(points[0]);

    let mut vertices = simplify_open(&closed[..=split], epsilon);
    vertices.pop();
    let mut second = simplify_open(&closed[split..], epsilon);
    second.pop();
    vertices.extend(second);

    drop_flat_vertices(vertices, epsilon)
}

/// Simplify an open chain, always keeping both endpoints.
#[must_use = "returns the simplified chain"]
pub fn simplify_open(points: &[PixelPoint], epsilon: f64) -> Vec<PixelPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[points.len() - 1] = true;

    rdp_recurse(points, 0, points.len() - 1, epsilon, &mut kept);

    points
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect()
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
fn rdp_recurse(points: &[PixelPoint], start: usize, end: usize, epsilon: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = perpendicular_distance(points[i].into(), points[start].into(), points[end].into());
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > epsilon {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, epsilon, kept);
        rdp_recurse(points, max_idx, end, epsilon, kept);
    }
}

/// Repeatedly remove the flattest vertex of a closed polygon while it
/// lies within `epsilon` of its neighbours' chord.
fn drop_flat_vertices(mut vertices: Vec<PixelPoint>, epsilon: f64) -> Vec<PixelPoint> {
    while vertices.len() > 3 {
        let n = vertices.len();
        let flattest = (0..n)
            .map(|i| {
                let prev = vertices[(i + n - 1) % n];
                let next = vertices[(i + 1) % n];
                (i, perpendicular_distance(vertices[i].into(), prev.into(), next.into()))
            })
            .fold(None, |best: Option<(usize, f64)>, cur| match best {
                Some(b) if b.1 <= cur.1 => Some(b),
                _ => Some(cur),
            });
        match flattest {
            Some((i, d)) if d <= epsilon => {
                vertices.remove(i);
            }
            _ => break,
        }
    }
    vertices
}

/// Perpendicular distance from point `p` to the line defined by `a` and `b`.
///
/// Uses the formula: |cross(b-a, p-a)| / |b-a|.
/// When `a` and `b` coincide, returns the distance from `p` to `a`.
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(i32, i32)]) -> Vec<PixelPoint> {
        coords.iter().map(|&(x, y)| PixelPoint::new(x, y)).collect()
    }

    /// Dense outline of an axis-aligned rectangle, clockwise from the
    /// top-left corner, one point per pixel step.
    fn dense_rectangle(w: i32, h: i32) -> Vec<PixelPoint> {
        let mut out = Vec::new();
        out.extend((0..w).map(|x| PixelPoint::new(x, 0)));
        out.extend((0..h).map(|y| PixelPoint::new(w, y)));
        out.extend((0..w).map(|x| PixelPoint::new(w - x, h)));
        out.extend((0..h).map(|y| PixelPoint::new(0, h - y)));
        out
    }

    #[test]
    fn collinear_chain_collapses_to_endpoints() {
        let chain = pts(&[(0, 0), (1, 1), (2, 2), (3, 3), (4, 4)]);
        assert_eq!(simplify_open(&chain, 0.1), pts(&[(0, 0), (4, 4)]));
    }

    #[test]
    fn zigzag_retains_peaks() {
        let chain = pts(&[(0, 0), (2, 5), (4, 0), (6, 5), (8, 0)]);
        assert_eq!(simplify_open(&chain, 1.0).len(), 5);
        assert_eq!(simplify_open(&chain, 10.0).len(), 2);
    }

    #[test]
    fn dense_rectangle_becomes_four_corners() {
        let outline = dense_rectangle(40, 25);
        let epsilon = 0.02 * 130.0;
        let poly = approximate_closed(&outline, epsilon);
        assert_eq!(poly.len(), 4, "got {poly:?}");
        for corner in pts(&[(0, 0), (40, 0), (40, 25), (0, 25)]) {
            assert!(poly.contains(&corner), "missing corner {corner:?} in {poly:?}");
        }
    }

    #[test]
    fn start_in_middle_of_edge_is_removed() {
        let mut outline = dense_rectangle(40, 40);
        outline.rotate_left(20);
        let poly = approximate_closed(&outline, 3.2);
        assert_eq!(poly.len(), 4, "got {poly:?}");
    }

    #[test]
    fn triangle_stays_triangle() {
        let tri = pts(&[(0, 0), (10, 0), (20, 0), (10, 15)]);
        assert_eq!(approximate_closed(&tri, 0.5).len(), 3);
    }

    #[test]
    fn tiny_contours_unchanged() {
        let two = pts(&[(0, 0), (5, 5)]);
        assert_eq!(approximate_closed(&two, 1.0), two);
        let same = pts(&[(3, 3), (3, 3), (3, 3)]);
        assert_eq!(approximate_closed(&same, 1.0), pts(&[(3, 3)]));
    }

    #[test]
    fn perpendicular_distance_diagonal_segment() {
        let d = perpendicular_distance(
            Point::new(2.0, -1.0),
            Point::new(0.0, 0.0),
            Point::new(4.0, 2.0),
        );
        let expected = 8.0 / 20.0_f64.sqrt();
        assert!((d - expected).abs() < 1e-10, "got {d}, expected {expected}");
    }
}
