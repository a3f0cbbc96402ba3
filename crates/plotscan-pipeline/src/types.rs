//! Shared types for the plotscan vision pipeline.

use serde::{Deserialize, Serialize};

use crate::extract::ExtractConfig;
use crate::rectify::RectifyConfig;

/// Single-channel intensity raster used by every detection step.
pub use image::GrayImage;

/// 3-channel frame raster, as captured and as rectified.
pub use image::RgbImage;

/// A 2D point in continuous image or document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Column, growing rightward.
    pub x: f64,
    /// Row, growing downward.
    pub y: f64,
}

impl Point {
    /// Point at `(x, y)`.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared distance to `other`; avoids the square root.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Straight-line distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// An integer pixel coordinate, origin at the image top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPoint {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl PixelPoint {
    /// Create a new pixel point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// `x + y`; smallest at the top-left corner of a page.
    #[must_use]
    pub const fn sum(self) -> i32 {
        self.x + self.y
    }

    /// `y - x`; smallest at the top-right corner of a page.
    #[must_use]
    pub const fn difference(self) -> i32 {
        self.y - self.x
    }
}

impl From<PixelPoint> for Point {
    fn from(p: PixelPoint) -> Self {
        Self::new(f64::from(p.x), f64::from(p.y))
    }
}

/// Ordered vertices of one pen stroke, in canvas coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Stroke through `points` in order.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Whether there are no vertices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Vertex count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Starting vertex.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// The vertices.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }
}

/// Ordered boundary of a region in pixel space.
///
/// Point order defines the drawing direction and is preserved by every
/// downstream stage. Contours may be closed loops (the tracer's usual
/// output) or open runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour(Vec<PixelPoint>);

impl Contour {
    /// Create a contour from its ordered points.
    #[must_use]
    pub const fn new(points: Vec<PixelPoint>) -> Self {
        Self(points)
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of points.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Ordered points.
    #[must_use]
    pub fn points(&self) -> &[PixelPoint] {
        &self.0
    }

    /// Converts to a floating-point polyline with the same point order.
    #[must_use]
    pub fn to_polyline(&self) -> Polyline {
        Polyline::new(self.0.iter().copied().map(Point::from).collect())
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self::new(image.width(), image.height())
    }
}

/// Configuration for one vision pipeline run (rectify, then extract).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Document detection and perspective correction parameters.
    pub rectify: RectifyConfig,
    /// Line extraction parameters.
    pub extract: ExtractConfig,
}

/// Result of running the vision pipeline on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Extracted contours in output-resolution pixel coordinates.
    pub contours: Vec<Contour>,
    /// The output resolution the contours are expressed in.
    pub dimensions: Dimensions,
    /// Whether a document quadrilateral was found and corrected.
    pub document_found: bool,
}

/// Errors that abort a vision pipeline run.
///
/// A missing document is deliberately *not* an error: the rectifier
/// passes the frame through and reports it via
/// [`Rectified::document_found`](crate::rectify::Rectified::document_found).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The bytes are not a supported image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Zero bytes were supplied as an image.
    #[error("input image data is empty")]
    EmptyInput,

    /// The frame has a zero width or height.
    #[error("frame has zero area ({width}x{height})")]
    EmptyFrame {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },

    /// A config value is out of range.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Contour extraction produced nothing to plot.
    #[error("no contours found in the image")]
    NoContours,
}
