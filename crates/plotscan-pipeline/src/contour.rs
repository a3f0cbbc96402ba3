//! Contour tracing and contour measurements.
//!
//! Tracing uses Suzuki-Abe border following via
//! `imageproc::contours::find_contours`. The rectifier only wants the
//! outermost borders (the page outline), the extractor wants every
//! border, holes included, as a flat list.

use geo::line_measures::Distance;
use geo::{Area, Euclidean, LineString, Polygon};
use image::GrayImage;
use imageproc::contours::BorderType;

use crate::types::{Contour, PixelPoint};

/// Which borders [`trace`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// Only outer borders that are not nested inside any other border.
    External,
    /// Every outer border and hole border, without hierarchy.
    List,
}

/// Trace the borders of white regions in a binary image.
///
/// Contours with no points are dropped; every returned contour has at
/// least one point.
#[must_use]
pub fn trace(binary: &GrayImage, retrieval: Retrieval) -> Vec<Contour> {
    let contours: Vec<imageproc::contours::Contour<i32>> =
        imageproc::contours::find_contours(binary);

    contours
        .into_iter()
        .filter(|c| match retrieval {
            Retrieval::External => c.border_type == BorderType::Outer && c.parent.is_none(),
            Retrieval::List => true,
        })
        .filter(|c| !c.points.is_empty())
        .map(|c| {
            Contour::new(
                c.points
                    .into_iter()
                    .map(|p| PixelPoint::new(p.x, p.y))
                    .collect(),
            )
        })
        .collect()
}

fn to_geo(p: PixelPoint) -> geo::Point<f64> {
    geo::Point::new(f64::from(p.x), f64::from(p.y))
}

/// Area enclosed by a contour treated as a closed polygon.
///
/// Orientation does not matter. Fewer than three points enclose nothing.
#[must_use]
pub fn enclosed_area(points: &[PixelPoint]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let ring: LineString<f64> = points
        .iter()
        .map(|p| (f64::from(p.x), f64::from(p.y)))
        .collect();
    Polygon::new(ring, vec![]).unsigned_area()
}

/// Length of the closed loop through `points`, including the closing
/// segment from the last point back to the first.
#[must_use]
pub fn closed_perimeter(points: &[PixelPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let open: f64 = points
        .windows(2)
        .map(|w| Euclidean.distance(&to_geo(w[0]), &to_geo(w[1])))
        .sum();
    let (first, last) = (points[0], points[points.len() - 1]);
    open + Euclidean.distance(&to_geo(last), &to_geo(first))
}
