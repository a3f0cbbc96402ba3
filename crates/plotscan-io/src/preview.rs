//! Preview image for a display surface.

use plotscan_export::{CompileOptions, SvgError, VectorPathDocument, fit_frame, render_document};
use plotscan_pipeline::RgbImage;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::frame::FrameSlot;

/// Stroke width of previewed paths, in output pixels.
pub const PREVIEW_LINE_WIDTH: f32 = 1.5;

/// Errors producing a preview.
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    /// The stored SVG could not be read.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The stored SVG could not be parsed.
    #[error("stored vector document is unreadable: {0}")]
    Svg(#[from] SvgError),

    /// Neither a vector document nor a frame exists yet.
    #[error("nothing to preview: no vector document and no frame")]
    NothingToShow,
}

/// Render the current preview at `width` x `height`.
///
/// Shows the stored vector document if one exists, otherwise the most
/// recent frame. Both are fitted aspect-preserving on white.
///
/// # Errors
///
/// Returns [`PreviewError::NothingToShow`] if there is neither, or the
/// read/parse error for a stored document that cannot be used.
pub fn render_preview(
    store: &ArtifactStore,
    slot: &FrameSlot,
    width: u32,
    height: u32,
) -> Result<RgbImage, PreviewError> {
    if let Some(svg) = store.read_svg()? {
        let document = VectorPathDocument::parse(&svg, CompileOptions::DEFAULT_TOLERANCE)?;
        return Ok(render_document(&document, width, height, PREVIEW_LINE_WIDTH));
    }
    slot.latest()
        .map(|frame| fit_frame(&frame, width, height))
        .ok_or(PreviewError::NothingToShow)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn nothing_to_show_before_any_input() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            render_preview(&store, &FrameSlot::new(), 10, 10),
            Err(PreviewError::NothingToShow)
        ));
    }

    #[test]
    fn frame_is_shown_until_a_document_exists() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let slot = FrameSlot::new();
        slot.publish(RgbImage::from_pixel(8, 8, Rgb([10, 10, 10])));

        let img = render_preview(&store, &slot, 16, 16).unwrap();
        assert_eq!(img.get_pixel(8, 8).0, [10, 10, 10]);

        store
            .write_svg(r#"<svg width="8" height="8"><path d="M 0 4 8 4"/></svg>"#)
            .unwrap();
        let img = render_preview(&store, &slot, 16, 16).unwrap();
        assert_eq!(img.get_pixel(8, 1).0, [255, 255, 255]);
        assert!(img.get_pixel(8, 8).0.iter().all(|&c| c < 128));
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write_svg("<svg><path d=\"M 0 0 1 1\"/></svg>").unwrap();
        assert!(matches!(
            render_preview(&store, &FrameSlot::new(), 10, 10),
            Err(PreviewError::Svg(_))
        ));
    }
}
