//! Raster previews of vector documents and frames.
//!
//! Both renderers letterbox their input into the requested size on a
//! white background, preserving aspect ratio and centring the content.

use image::{Rgb, RgbImage};
use tiny_skia::{Color, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::svg::VectorPathDocument;

/// Placement of a `src` rectangle scaled to fit inside `dst`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Fit {
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Fit {
    fn new(src: (u32, u32), dst: (u32, u32)) -> Option<Self> {
        if src.0 == 0 || src.1 == 0 || dst.0 == 0 || dst.1 == 0 {
            return None;
        }
        let (sw, sh) = (f64::from(src.0), f64::from(src.1));
        let (dw, dh) = (f64::from(dst.0), f64::from(dst.1));
        let scale = (dw / sw).min(dh / sh);
        Some(Self {
            scale,
            offset_x: sw.mul_add(-scale, dw) / 2.0,
            offset_y: sh.mul_add(-scale, dh) / 2.0,
        })
    }
}

/// Render `document` as black strokes on white at `width` x `height`.
///
/// Returns a blank white image when either size is zero or the
/// document has nothing to draw.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn render_document(
    document: &VectorPathDocument,
    width: u32,
    height: u32,
    line_width: f32,
) -> RgbImage {
    let blank = || RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let dims = (document.dimensions.width, document.dimensions.height);
    let Some(fit) = Fit::new(dims, (width, height)) else {
        return blank();
    };
    let Some(mut pixmap) = Pixmap::new(width, height) else {
        return blank();
    };
    pixmap.fill(Color::WHITE);

    let mut pb = PathBuilder::new();
    for polyline in &document.paths {
        let points = polyline.points();
        let Some(first) = points.first() else {
            continue;
        };
        pb.move_to(first.x as f32, first.y as f32);
        if points.len() == 1 {
            // Zero-length segment so round caps draw a dot.
            pb.line_to(first.x as f32, first.y as f32);
        }
        for p in &points[1..] {
            pb.line_to(p.x as f32, p.y as f32);
        }
    }

    if let Some(path) = pb.finish() {
        let stroke = Stroke {
            width: line_width / fit.scale as f32,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        };
        let mut paint = Paint::default();
        paint.set_color_rgba8(0, 0, 0, 255);
        paint.anti_alias = true;

        let transform = Transform::from_row(
            fit.scale as f32,
            0.0,
            0.0,
            fit.scale as f32,
            fit.offset_x as f32,
            fit.offset_y as f32,
        );
        pixmap.stroke_path(&path, &paint, &stroke, transform, None);
    }

    // The background is opaque, so premultiplied channels are final.
    RgbImage::from_fn(width, height, |x, y| {
        let i = (y as usize * width as usize + x as usize) * 4;
        let data = pixmap.data();
        Rgb([data[i], data[i + 1], data[i + 2]])
    })
}

/// Scale `frame` to fit `width` x `height`, letterboxed on white.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fit_frame(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let Some(fit) = Fit::new(frame.dimensions(), (width, height)) else {
        return canvas;
    };
    let scaled_w = ((f64::from(frame.width()) * fit.scale).round() as u32).clamp(1, width);
    let scaled_h = ((f64::from(frame.height()) * fit.scale).round() as u32).clamp(1, height);
    let scaled = image::imageops::resize(
        frame,
        scaled_w,
        scaled_h,
        image::imageops::FilterType::Triangle,
    );
    let x = i64::from((width - scaled_w) / 2);
    let y = i64::from((height - scaled_h) / 2);
    image::imageops::replace(&mut canvas, &scaled, x, y);
    canvas
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use plotscan_pipeline::{Dimensions, Point, Polyline};

    fn dark(px: &Rgb<u8>) -> bool {
        px.0.iter().all(|&c| c < 128)
    }

    #[test]
    fn fit_letterboxes_wide_source() {
        let fit = Fit::new((200, 100), (100, 100)).unwrap();
        assert!((fit.scale - 0.5).abs() < 1e-12);
        assert!(fit.offset_x.abs() < 1e-12);
        assert!((fit.offset_y - 25.0).abs() < 1e-12);
        assert!(Fit::new((0, 10), (10, 10)).is_none());
    }

    #[test]
    fn empty_document_renders_white() {
        let doc = VectorPathDocument::new(Dimensions::new(10, 10), vec![]);
        let img = render_document(&doc, 20, 20, 2.0);
        assert_eq!(img.dimensions(), (20, 20));
        assert!(img.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn horizontal_line_is_drawn_through_centre() {
        let doc = VectorPathDocument::new(
            Dimensions::new(100, 50),
            vec![Polyline::new(vec![Point::new(0.0, 25.0), Point::new(100.0, 25.0)])],
        );
        let img = render_document(&doc, 200, 200, 3.0);
        // 2x scale, 50 px letterbox above: the line lands on row 100.
        assert!(dark(img.get_pixel(100, 100)));
        assert!(!dark(img.get_pixel(100, 20)));
        assert!(!dark(img.get_pixel(100, 180)));
    }

    #[test]
    fn frame_is_centred_with_white_bars() {
        let frame = RgbImage::from_pixel(40, 20, Rgb([0, 0, 0]));
        let out = fit_frame(&frame, 40, 40);
        assert_eq!(out.dimensions(), (40, 40));
        assert_eq!(out.get_pixel(20, 2).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(20, 20).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(20, 37).0, [255, 255, 255]);
    }
}
