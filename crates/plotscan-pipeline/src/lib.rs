//! plotscan-pipeline: Pure document vision pipeline (sans-IO).
//!
//! Turns a camera frame into pixel contours through two stages:
//!
//! - **rectify**: grayscale -> blur -> Canny -> close -> outline
//!   contours -> quadrilateral -> perspective warp -> crop
//! - **extract**: adaptive threshold -> median -> Canny ->
//!   dilate/erode -> resize -> contour list
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images and returns structured data. Files, cameras and serial ports
//! live in `plotscan-io`.

pub mod blur;
pub mod contour;
pub mod edge;
pub mod extract;
pub mod grayscale;
pub mod morphology;
pub mod quad;
pub mod rectify;
pub mod simplify;
pub mod threshold;
pub mod types;

pub use extract::{ExtractConfig, extract};
pub use grayscale::decode_frame;
pub use quad::Quadrilateral;
pub use rectify::{RectifyConfig, Rectified, rectify};
pub use types::{
    Contour, Dimensions, GrayImage, PipelineConfig, PipelineError, PixelPoint, Point, Polyline,
    ProcessResult, RgbImage,
};

/// Run both vision stages on one frame.
///
/// A frame without a detectable page is still processed (the whole
/// frame is treated as the page); [`ProcessResult::document_found`]
/// records which case applied.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if either stage's config is
/// invalid, [`PipelineError::EmptyFrame`] for a zero-area frame, and
/// [`PipelineError::NoContours`] if extraction finds nothing to plot.
pub fn process(frame: &RgbImage, config: &PipelineConfig) -> Result<ProcessResult, PipelineError> {
    config.extract.validate()?;

    let started = std::time::Instant::now();
    let rectified = rectify(frame, &config.rectify)?;
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis(),
        document_found = rectified.document_found(),
        "rectify stage done"
    );

    let started = std::time::Instant::now();
    let contours = extract(&rectified.image, &config.extract);
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis(),
        contours = contours.len(),
        "extract stage done"
    );

    if contours.is_empty() {
        return Err(PipelineError::NoContours);
    }

    Ok(ProcessResult {
        contours,
        dimensions: config.extract.output,
        document_found: rectified.document_found(),
    })
}

/// Decode raw image bytes and run [`process`] on them.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] or [`PipelineError::ImageDecode`]
/// if the bytes are not a usable image, otherwise as [`process`].
pub fn process_bytes(
    image_bytes: &[u8],
    config: &PipelineConfig,
) -> Result<ProcessResult, PipelineError> {
    let frame = decode_frame(image_bytes)?;
    process(&frame, config)
}
