//! Canny edge detection.
//!
//! Wraps [`imageproc::edges::canny`]. Both the rectifier and the
//! extractor run Canny, each with its own threshold pair: the rectifier
//! looks for the strong outline of a page, the extractor for pen
//! strokes on an already binarized image.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero marks every pixel with any gradient as a
/// candidate edge, which floods the contour tracer.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Hysteresis threshold pair for one Canny pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CannyThresholds {
    /// Gradient magnitude above which a connected pixel stays an edge.
    pub low: f32,
    /// Gradient magnitude above which a pixel is a definite edge.
    pub high: f32,
}

impl CannyThresholds {
    /// Create a threshold pair.
    #[must_use]
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }
}

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge.
///
/// Both thresholds are clamped to a minimum of [`MIN_THRESHOLD`] and
/// `low` is clamped to be at most `high`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, thresholds: CannyThresholds) -> GrayImage {
    let high = thresholds.high.max(MIN_THRESHOLD);
    let low = thresholds.low.max(MIN_THRESHOLD).min(high);
    imageproc::edges::canny(image, low, high)
}

/// Number of non-zero pixels in a binary map.
#[cfg(test)]
pub(crate) fn count_set(image: &GrayImage) -> u64 {
    image.pixels().map(|p| u64::from(p.0[0] > 0)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let img = GrayImage::from_fn(20, 20, |_, _| image::Luma([128]));
        let edges = canny(&img, CannyThresholds::new(50.0, 150.0));
        assert_eq!(edges.dimensions(), (20, 20));
        assert_eq!(count_set(&edges), 0, "expected no edges in uniform image");
    }

    #[test]
    fn sharp_edge_detected() {
        let edges = canny(&sharp_edge_image(), CannyThresholds::new(50.0, 150.0));
        assert!(count_set(&edges) > 0, "expected edges at sharp boundary");
    }

    #[test]
    fn zero_low_threshold_is_clamped_to_min() {
        let img = sharp_edge_image();
        let edges_zero = canny(&img, CannyThresholds::new(0.0, 150.0));
        let edges_min = canny(&img, CannyThresholds::new(MIN_THRESHOLD, 150.0));
        assert_eq!(edges_zero, edges_min);
    }

    #[test]
    fn low_above_high_is_clamped() {
        let img = sharp_edge_image();
        let edges_inverted = canny(&img, CannyThresholds::new(200.0, 100.0));
        let edges_equal = canny(&img, CannyThresholds::new(100.0, 100.0));
        assert_eq!(edges_inverted, edges_equal);
    }
}
