//! Line extraction from a rectified page.
//!
//! Local thresholding separates ink from paper, Canny turns the ink
//! regions into stroke outlines, and a generous dilation merges the two
//! sides of each pen line so it is traced as one contour.

use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::blur::median_blur;
use crate::contour::{Retrieval, trace};
use crate::edge::{CannyThresholds, canny};
use crate::grayscale::to_intensity;
use crate::morphology::dilate_then_erode;
use crate::threshold::binarize;
use crate::types::{Contour, Dimensions, PipelineError};

/// Parameters for [`extract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Side of the square window for local mean thresholding.
    pub block_size: u32,
    /// Constant subtracted from the local mean.
    pub threshold_offset: i32,
    /// Median filter radius (1 = 3x3).
    pub median_radius: u32,
    /// Canny thresholds for stroke outlines.
    pub canny: CannyThresholds,
    /// Dilation passes.
    pub dilate_iterations: u8,
    /// Erosion passes after dilation.
    pub erode_iterations: u8,
    /// Resolution the contours are traced at and expressed in.
    pub output: Dimensions,
}

impl ExtractConfig {
    /// Default threshold window.
    pub const DEFAULT_BLOCK_SIZE: u32 = 7;
    /// Default threshold offset.
    pub const DEFAULT_THRESHOLD_OFFSET: i32 = 2;
    /// Default median radius.
    pub const DEFAULT_MEDIAN_RADIUS: u32 = 1;
    /// Default stroke Canny thresholds.
    pub const DEFAULT_CANNY: CannyThresholds = CannyThresholds::new(50.0, 100.0);
    /// Default dilation passes.
    pub const DEFAULT_DILATE_ITERATIONS: u8 = 5;
    /// Default erosion passes.
    pub const DEFAULT_ERODE_ITERATIONS: u8 = 3;
    /// Default output resolution, A3 landscape at 10 px/mm.
    pub const DEFAULT_OUTPUT: Dimensions = Dimensions::new(4200, 2970);

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.block_size < 3 {
            return Err(PipelineError::InvalidConfig(format!(
                "extract.block_size must be at least 3, got {}",
                self.block_size
            )));
        }
        if self.output.width == 0 || self.output.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "extract.output must be non-empty, got {}x{}",
                self.output.width, self.output.height
            )));
        }
        Ok(())
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE,
            threshold_offset: Self::DEFAULT_THRESHOLD_OFFSET,
            median_radius: Self::DEFAULT_MEDIAN_RADIUS,
            canny: Self::DEFAULT_CANNY,
            dilate_iterations: Self::DEFAULT_DILATE_ITERATIONS,
            erode_iterations: Self::DEFAULT_ERODE_ITERATIONS,
            output: Self::DEFAULT_OUTPUT,
        }
    }
}

/// Reduce a rectified page to contours in `config.output` coordinates.
///
/// Returns every border (outer and hole) as a flat list. A blank page
/// or an empty image yields an empty list.
#[must_use = "returns the extracted contours"]
pub fn extract(rectified: &RgbImage, config: &ExtractConfig) -> Vec<Contour> {
    let (width, height) = rectified.dimensions();
    if width == 0 || height == 0 || config.output.width == 0 || config.output.height == 0 {
        return Vec::new();
    }

    let gray = to_intensity(rectified);
    let binary = binarize(&gray, config.block_size, config.threshold_offset);
    let smoothed = median_blur(&binary, config.median_radius);
    let edges = canny(&smoothed, config.canny);
    let closed = dilate_then_erode(&edges, config.dilate_iterations, config.erode_iterations);

    let scaled = if (width, height) == (config.output.width, config.output.height) {
        closed
    } else {
        image::imageops::resize(
            &closed,
            config.output.width,
            config.output.height,
            FilterType::Nearest,
        )
    };

    let contours = trace(&scaled, Retrieval::List);
    tracing::debug!(
        contours = contours.len(),
        width = config.output.width,
        height = config.output.height,
        "extracted contours"
    );
    contours
}
