//! Local mean thresholding for unevenly lit pages.
//!
//! A global threshold fails on phone/webcam captures where one side of
//! the page is in shadow. Comparing each pixel with the mean of its
//! neighbourhood instead keeps strokes separable everywhere.

use image::GrayImage;

/// Binarize `image` against the mean of the `block_size x block_size`
/// window centred on each pixel.
///
/// Paper (at least `mean - offset`) becomes 255, ink becomes 0. Windows
/// are clipped at the image border. `block_size` is rounded up to odd;
/// anything below 3 behaves as 3.
#[must_use = "returns the binarized image"]
pub fn binarize(image: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let radius = (block_size / 2).max(1);
    imageproc::contrast::adaptive_threshold(image, radius, offset)
}
