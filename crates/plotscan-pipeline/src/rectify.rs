//! Document detection and perspective correction.
//!
//! Finds the largest four-sided region in a camera frame, maps it onto
//! an upright rectangle, and trims a margin so the page border does not
//! reach the line extractor.
//!
//! Failing to find a page is a soft outcome: the frame is passed
//! through unchanged and [`Rectified::document_found`] reports `false`.

use image::imageops::FilterType;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use serde::{Deserialize, Serialize};

use crate::blur::gaussian_blur;
use crate::contour::{Retrieval, closed_perimeter, enclosed_area, trace};
use crate::edge::{CannyThresholds, canny};
use crate::grayscale::to_intensity;
use crate::morphology::dilate_then_erode;
use crate::quad::Quadrilateral;
use crate::simplify::approximate_closed;
use crate::types::{Dimensions, PipelineError};

/// Parameters for [`rectify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyConfig {
    /// Gaussian sigma applied before edge detection.
    pub blur_sigma: f32,
    /// Canny thresholds for the page outline.
    pub canny: CannyThresholds,
    /// Dilation passes that close gaps in the outline.
    pub dilate_iterations: u8,
    /// Erosion passes after dilation.
    pub erode_iterations: u8,
    /// Contours enclosing less area than this (px^2) are never a page.
    pub min_area: f64,
    /// Polygon approximation tolerance as a fraction of the contour
    /// perimeter.
    pub approx_fraction: f64,
    /// Pixels trimmed from each side of the warped page.
    pub crop_margin: u32,
    /// Output size. `None` keeps the input frame's size.
    pub output: Option<Dimensions>,
}

impl RectifyConfig {
    /// Default Gaussian sigma.
    pub const DEFAULT_BLUR_SIGMA: f32 = 1.0;
    /// Default outline Canny thresholds.
    pub const DEFAULT_CANNY: CannyThresholds = CannyThresholds::new(100.0, 200.0);
    /// Default dilation passes.
    pub const DEFAULT_DILATE_ITERATIONS: u8 = 2;
    /// Default erosion passes.
    pub const DEFAULT_ERODE_ITERATIONS: u8 = 1;
    /// Default minimum page area in px^2.
    pub const DEFAULT_MIN_AREA: f64 = 5000.0;
    /// Default approximation tolerance, 2% of the perimeter.
    pub const DEFAULT_APPROX_FRACTION: f64 = 0.02;
    /// Default crop margin in pixels.
    pub const DEFAULT_CROP_MARGIN: u32 = 25;

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.min_area.is_nan() || self.min_area < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "rectify.min_area must be non-negative, got {}",
                self.min_area
            )));
        }
        if self.approx_fraction.is_nan()
            || self.approx_fraction <= 0.0
            || self.approx_fraction >= 1.0
        {
            return Err(PipelineError::InvalidConfig(format!(
                "rectify.approx_fraction must be in (0, 1), got {}",
                self.approx_fraction
            )));
        }
        if let Some(d) = self.output {
            if d.width == 0 || d.height == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "rectify.output must be non-empty, got {}x{}",
                    d.width, d.height
                )));
            }
        }
        Ok(())
    }
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self {
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            canny: Self::DEFAULT_CANNY,
            dilate_iterations: Self::DEFAULT_DILATE_ITERATIONS,
            erode_iterations: Self::DEFAULT_ERODE_ITERATIONS,
            min_area: Self::DEFAULT_MIN_AREA,
            approx_fraction: Self::DEFAULT_APPROX_FRACTION,
            crop_margin: Self::DEFAULT_CROP_MARGIN,
            output: None,
        }
    }
}

/// Output of [`rectify`].
#[derive(Debug, Clone)]
pub struct Rectified {
    /// The corrected page, or a copy of the input frame when no page
    /// was found.
    pub image: RgbImage,
    /// The page outline in input-frame coordinates, if one was found.
    pub quadrilateral: Option<Quadrilateral>,
}

impl Rectified {
    /// Whether a page was detected and corrected.
    #[must_use]
    pub const fn document_found(&self) -> bool {
        self.quadrilateral.is_some()
    }
}

/// Locate the page outline in a frame.
///
/// Returns the largest external contour above `min_area` whose polygon
/// approximation has exactly four vertices, in canonical corner order.
#[must_use]
pub fn find_document(gray: &GrayImage, config: &RectifyConfig) -> Option<Quadrilateral> {
    let blurred = gaussian_blur(gray, config.blur_sigma);
    let edges = canny(&blurred, config.canny);
    let closed = dilate_then_erode(&edges, config.dilate_iterations, config.erode_iterations);
    let contours = trace(&closed, Retrieval::External);
    tracing::debug!(contours = contours.len(), "traced outline candidates");

    let mut best: Option<(f64, Quadrilateral)> = None;
    for contour in &contours {
        let area = enclosed_area(contour.points());
        if area <= config.min_area {
            continue;
        }
        if best.is_some_and(|(best_area, _)| area <= best_area) {
            continue;
        }
        let epsilon = config.approx_fraction * closed_perimeter(contour.points());
        let polygon = approximate_closed(contour.points(), epsilon);
        if let Some(quad) = Quadrilateral::from_polygon(&polygon) {
            best = Some((area, quad));
        }
    }

    best.map(|(area, quad)| {
        tracing::debug!(area, corners = ?quad.corners(), "page outline found");
        quad
    })
}

/// Detect the page in `frame` and warp it to an upright rectangle.
///
/// The target size is `config.output`, or the frame's own size. After
/// warping, `crop_margin` pixels are cut from each side and the result
/// is scaled back up to the target size. A margin that would consume
/// the whole image is skipped.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyFrame`] for a zero-area frame and
/// [`PipelineError::InvalidConfig`] if `config` fails validation. Not
/// finding a page is not an error.
pub fn rectify(frame: &RgbImage, config: &RectifyConfig) -> Result<Rectified, PipelineError> {
    config.validate()?;
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::EmptyFrame { width, height });
    }

    let passthrough = || Rectified {
        image: frame.clone(),
        quadrilateral: None,
    };

    let Some(quad) = find_document(&to_intensity(frame), config) else {
        tracing::info!(width, height, "no document found; passing frame through");
        return Ok(passthrough());
    };
    if quad.is_degenerate() {
        tracing::warn!(corners = ?quad.corners(), "degenerate page outline; passing frame through");
        return Ok(passthrough());
    }

    let target = config.output.unwrap_or(Dimensions::new(width, height));
    #[allow(clippy::cast_precision_loss)]
    let (tw, th) = (target.width as f32, target.height as f32);
    let destination = [(0.0, 0.0), (tw, 0.0), (0.0, th), (tw, th)];

    let Some(projection) = Projection::from_control_points(quad.control_points(), destination)
    else {
        tracing::warn!(corners = ?quad.corners(), "no projective transform for outline; passing frame through");
        return Ok(passthrough());
    };

    let mut warped = RgbImage::new(target.width, target.height);
    warp_into(
        frame,
        &projection,
        Interpolation::Bilinear,
        Rgb([255, 255, 255]),
        &mut warped,
    );

    let image = crop_and_restore(&warped, config.crop_margin);
    tracing::info!(
        width = target.width,
        height = target.height,
        margin = config.crop_margin,
        "document rectified"
    );

    Ok(Rectified {
        image,
        quadrilateral: Some(quad),
    })
}

/// Trim `margin` pixels per side and scale back to the original size.
fn crop_and_restore(image: &RgbImage, margin: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let twice = margin.saturating_mul(2);
    if margin == 0 || twice >= w || twice >= h {
        return image.clone();
    }
    let cropped = image::imageops::crop_imm(image, margin, margin, w - twice, h - twice).to_image();
    image::imageops::resize(&cropped, w, h, FilterType::Triangle)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Dark frame with a bright axis-aligned page.
    fn page_on_desk(w: u32, h: u32, page: (u32, u32, u32, u32)) -> RgbImage {
        let (x0, y0, x1, y1) = page;
        RgbImage::from_fn(w, h, |x, y| {
            if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
                Rgb([235, 235, 235])
            } else {
                Rgb([25, 25, 25])
            }
        })
    }

    #[test]
    fn default_config_is_valid() {
        RectifyConfig::default().validate().unwrap();
    }

    #[test]
    fn invalid_fraction_is_rejected() {
        let config = RectifyConfig {
            approx_fraction: 0.0,
            ..RectifyConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn empty_frame_is_an_error() {
        let result = rectify(&RgbImage::new(0, 10), &RectifyConfig::default());
        assert!(matches!(
            result,
            Err(PipelineError::EmptyFrame { width: 0, height: 10 })
        ));
    }

    #[test]
    fn uniform_frame_passes_through() {
        let frame = RgbImage::from_pixel(120, 90, Rgb([200, 180, 160]));
        let out = rectify(&frame, &RectifyConfig::default()).unwrap();
        assert!(!out.document_found());
        assert_eq!(out.image, frame);
    }

    #[test]
    fn small_page_is_ignored() {
        // 40x40 = 1600 px^2, below the default minimum area.
        let frame = page_on_desk(160, 120, (60, 40, 100, 80));
        let out = rectify(&frame, &RectifyConfig::default()).unwrap();
        assert!(!out.document_found());
        assert_eq!(out.image, frame);
    }

    #[test]
    fn page_is_found_and_corners_ordered() {
        let frame = page_on_desk(240, 180, (40, 30, 200, 150));
        let quad = find_document(&to_intensity(&frame), &RectifyConfig::default()).unwrap();
        let close = |a: crate::types::PixelPoint, x: i32, y: i32| {
            (a.x - x).abs() <= 5 && (a.y - y).abs() <= 5
        };
        assert!(close(quad.top_left(), 40, 30), "{quad:?}");
        assert!(close(quad.top_right(), 199, 30), "{quad:?}");
        assert!(close(quad.bottom_left(), 40, 149), "{quad:?}");
        assert!(close(quad.bottom_right(), 199, 149), "{quad:?}");
    }

    #[test]
    fn rectified_page_fills_output() {
        let frame = page_on_desk(240, 180, (40, 30, 200, 150));
        let out = rectify(&frame, &RectifyConfig::default()).unwrap();
        assert!(out.document_found());
        assert_eq!(out.image.dimensions(), (240, 180));
        // The page interior now covers the centre and well past it.
        for (x, y) in [(120, 90), (60, 45), (180, 135)] {
            let px = out.image.get_pixel(x, y).0;
            assert!(px[0] > 200, "pixel ({x},{y}) = {px:?}");
        }
    }

    #[test]
    fn explicit_output_size_is_honoured() {
        let frame = page_on_desk(240, 180, (40, 30, 200, 150));
        let config = RectifyConfig {
            output: Some(Dimensions::new(300, 200)),
            ..RectifyConfig::default()
        };
        let out = rectify(&frame, &config).unwrap();
        assert!(out.document_found());
        assert_eq!(out.image.dimensions(), (300, 200));
    }

    #[test]
    fn oversized_margin_skips_crop() {
        let img = RgbImage::from_pixel(30, 30, Rgb([1, 2, 3]));
        assert_eq!(crop_and_restore(&img, 15), img);
        assert_eq!(crop_and_restore(&img, 0), img);
        assert_eq!(crop_and_restore(&img, 5).dimensions(), (30, 30));
    }

    #[test]
    fn config_serde_fills_missing_fields() {
        let config: RectifyConfig = serde_json::from_str(r#"{"crop_margin": 10}"#).unwrap();
        assert_eq!(config.crop_margin, 10);
        assert_eq!(config.canny, RectifyConfig::DEFAULT_CANNY);
        assert!(config.output.is_none());
    }
}
