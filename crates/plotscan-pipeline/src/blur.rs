//! Noise suppression before edge detection.
//!
//! [`gaussian_blur`] smooths camera sensor noise ahead of the
//! rectifier's Canny pass. [`median_blur`] removes the salt-and-pepper
//! speckle that adaptive thresholding leaves behind without rounding
//! off line edges the way a Gaussian would.

use image::GrayImage;

/// Gaussian-smooth an intensity image with standard deviation `sigma`.
///
/// `sigma <= 0` (or NaN) disables smoothing and returns a copy;
/// `gaussian_blur_f32` would panic on it.
#[must_use = "returns the smoothed frame"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma.is_nan() || sigma <= 0.0 {
        image.clone()
    } else {
        imageproc::filter::gaussian_blur_f32(image, sigma)
    }
}

/// Apply a square median filter with the given `radius`.
///
/// A radius of 1 is the 3x3 median. Zero returns the image unchanged.
#[must_use = "returns the filtered image"]
pub fn median_blur(image: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return image.clone();
    }

    imageproc::filter::median_filter(image, radius, radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Dark desk on the left half, white page on the right.
    fn page_border() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _| image::Luma([if x >= 5 { 255 } else { 0 }]))
    }

    #[test]
    fn non_positive_sigma_is_a_copy() {
        let img = page_border();
        for sigma in [0.0, -2.5, f32::NAN] {
            assert_eq!(gaussian_blur(&img, sigma), img);
        }
    }

    #[test]
    fn gaussian_softens_page_border() {
        let soft = gaussian_blur(&page_border(), 2.0);
        let desk = soft.get_pixel(4, 5).0[0];
        let page = soft.get_pixel(5, 5).0[0];
        assert!(desk > 0 && page < 255, "desk {desk}, page {page}");
    }

    #[test]
    fn median_removes_isolated_speckle() {
        let mut img = GrayImage::new(9, 9);
        img.put_pixel(4, 4, image::Luma([255]));
        let filtered = median_blur(&img, 1);
        assert!(filtered.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn median_keeps_straight_edge() {
        let img = page_border();
        let filtered = median_blur(&img, 1);
        assert_eq!(filtered.get_pixel(4, 5).0[0], 0);
        assert_eq!(filtered.get_pixel(5, 5).0[0], 255);
    }

    #[test]
    fn zero_radius_median_is_identity() {
        let img = page_border();
        assert_eq!(median_blur(&img, 0), img);
    }
}
