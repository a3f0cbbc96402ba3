//! Four-corner document outlines with a canonical corner order.

use crate::types::{PixelPoint, Point};

/// A document outline with corners in canonical order:
/// top-left, top-right, bottom-left, bottom-right.
///
/// The order is derived from the corner coordinates alone, so the same
/// four points give the same quadrilateral whatever order they were
/// traced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quadrilateral {
    corners: [PixelPoint; 4],
}

impl Quadrilateral {
    /// Reorder four arbitrary corners canonically.
    ///
    /// - top-left: smallest `x + y`
    /// - top-right: smallest `y - x`
    /// - bottom-left: largest `y - x`
    /// - bottom-right: largest `x + y`
    ///
    /// Ties keep the earliest corner in input order.
    #[must_use]
    pub fn from_corners(corners: [PixelPoint; 4]) -> Self {
        let pick = |key: fn(PixelPoint) -> i32, largest: bool| {
            let mut best = corners[0];
            for &c in &corners[1..] {
                let better = if largest {
                    key(c) > key(best)
                } else {
                    key(c) < key(best)
                };
                if better {
                    best = c;
                }
            }
            best
        };

        Self {
            corners: [
                pick(PixelPoint::sum, false),
                pick(PixelPoint::difference, false),
                pick(PixelPoint::difference, true),
                pick(PixelPoint::sum, true),
            ],
        }
    }

    /// Build from a polygon that must have exactly four vertices.
    #[must_use]
    pub fn from_polygon(vertices: &[PixelPoint]) -> Option<Self> {
        let corners: [PixelPoint; 4] = vertices.try_into().ok()?;
        Some(Self::from_corners(corners))
    }

    /// Corners in canonical order.
    #[must_use]
    pub const fn corners(&self) -> [PixelPoint; 4] {
        self.corners
    }

    /// Top-left corner.
    #[must_use]
    pub const fn top_left(&self) -> PixelPoint {
        self.corners[0]
    }

    /// Top-right corner.
    #[must_use]
    pub const fn top_right(&self) -> PixelPoint {
        self.corners[1]
    }

    /// Bottom-left corner.
    #[must_use]
    pub const fn bottom_left(&self) -> PixelPoint {
        self.corners[2]
    }

    /// Bottom-right corner.
    #[must_use]
    pub const fn bottom_right(&self) -> PixelPoint {
        self.corners[3]
    }

    /// Corners as `(x, y)` floats in canonical order, the form the
    /// projective warp takes as control points.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn control_points(&self) -> [(f32, f32); 4] {
        self.corners.map(|c| {
            let p = Point::from(c);
            (p.x as f32, p.y as f32)
        })
    }

    /// `true` when two canonical slots hold the same point, which
    /// happens for degenerate or strongly rotated outlines.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        let c = &self.corners;
        (0..4).any(|i| ((i + 1)..4).any(|j| c[i] == c[j]))
    }
}
