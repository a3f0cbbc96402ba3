//! Frame decoding and intensity conversion.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the
//! 3-channel frame the rectifier works on, plus the single-channel
//! intensity image used for every detection step.

use image::{GrayImage, RgbImage};

use crate::types::PipelineError;

/// Decode raw image bytes into a 3-channel frame.
///
/// Grayscale and RGBA sources are expanded/flattened to RGB so every
/// downstream stage sees the same channel layout.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Convert a frame to single-channel intensity.
///
/// Uses the `image` crate's luminance weighting, in which green
/// dominates and blue contributes least.
#[must_use = "returns the intensity image"]
pub fn to_intensity(frame: &RgbImage) -> GrayImage {
    image::imageops::grayscale(frame)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Helper: encode a small RGB image as a PNG byte buffer.
    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn empty_input_returns_error() {
        let result = decode_frame(&[]);
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode_frame(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn decoded_frame_keeps_dimensions() {
        let img = RgbImage::from_pixel(17, 31, image::Rgb([128, 64, 32]));
        let frame = decode_frame(&encode_png(&img)).unwrap();
        assert_eq!(frame.dimensions(), (17, 31));
        assert_eq!(frame.get_pixel(3, 3).0, [128, 64, 32]);
    }

    #[test]
    fn intensity_weights_green_highest() {
        let red = to_intensity(&RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0])));
        let green = to_intensity(&RgbImage::from_pixel(1, 1, image::Rgb([0, 255, 0])));
        let blue = to_intensity(&RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 255])));
        let r = red.get_pixel(0, 0).0[0];
        let g = green.get_pixel(0, 0).0[0];
        let b = blue.get_pixel(0, 0).0[0];
        assert!(
            g > r && r > b,
            "expected green > red > blue, got R={r} G={g} B={b}",
        );
    }
}
