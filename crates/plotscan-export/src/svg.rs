//! SVG path documents: emitting contours and reading paths back.
//!
//! Emission uses the [`svg`] crate for document construction and path
//! data formatting. Each contour becomes one `<path>` whose `d` is a
//! single absolute move-to carrying every coordinate pair; the pairs
//! after the first are implicit line-to commands.
//!
//! Parsing accepts any SVG the emitter or a vector editor might
//! produce: all path commands (`M L H V C S Q T A Z`, absolute and
//! relative) are read and curves are flattened into polylines whose
//! deviation from the true curve stays within a tolerance.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};
use svg::Document;
use svg::node::element::path::{Command, Data, Position};
use svg::node::element::{Path, tag};
use svg::parser::Event;

use plotscan_pipeline::{Contour, Dimensions, Point, Polyline};

/// Upper bound on segments produced for one curve.
const MAX_CURVE_SEGMENTS: usize = 1024;

/// Errors from reading an SVG document.
#[derive(Debug, thiserror::Error)]
pub enum SvgError {
    /// The document is not well-formed XML.
    #[error("failed to read SVG: {0}")]
    Read(String),

    /// No `<svg>` root element was found.
    #[error("SVG has no <svg> root element")]
    MissingRoot,

    /// The root has neither usable `width`/`height` nor a `viewBox`.
    #[error("SVG root has no usable width/height or viewBox")]
    MissingDimensions,

    /// A path `d` attribute could not be tokenized.
    #[error("invalid path data: {0}")]
    PathData(String),

    /// A path command has the wrong number of parameters.
    #[error("path command '{command}' expects parameters in groups of {arity}, got {count}")]
    Arity {
        /// Command letter as written.
        command: char,
        /// Parameters consumed per repetition.
        arity: usize,
        /// Parameters actually given.
        count: usize,
    },

    /// The flattening tolerance is zero, negative or not finite.
    #[error("curve tolerance must be positive, got {0}")]
    InvalidTolerance(f64),
}

/// Vector paths over a pixel canvas, drawn as black strokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPathDocument {
    /// Canvas size; path coordinates are in this pixel space.
    pub dimensions: Dimensions,
    /// Paths in drawing order. Point order within a path is the
    /// drawing direction.
    pub paths: Vec<Polyline>,
}

impl VectorPathDocument {
    /// Create a document from paths already in canvas coordinates.
    #[must_use]
    pub const fn new(dimensions: Dimensions, paths: Vec<Polyline>) -> Self {
        Self { dimensions, paths }
    }

    /// Total number of points across all paths.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.paths.iter().map(Polyline::len).sum()
    }

    /// Serialize to an SVG string.
    ///
    /// The root carries `width`, `height` and a matching `viewBox`.
    /// Every non-empty path becomes a `<path>` with `fill="none"` and
    /// `stroke="black"`.
    #[must_use]
    pub fn to_svg(&self) -> String {
        let Dimensions { width, height } = self.dimensions;
        let mut doc = Document::new()
            .set("width", width)
            .set("height", height)
            .set("viewBox", (0, 0, width, height));

        for polyline in &self.paths {
            let Some(d) = path_data(polyline) else {
                continue;
            };
            doc = doc.add(
                Path::new()
                    .set("fill", "none")
                    .set("stroke", "black")
                    .set("d", d),
            );
        }

        doc.to_string()
    }

    /// Parse an SVG string, flattening curves to within `tolerance`
    /// canvas pixels.
    ///
    /// # Errors
    ///
    /// Returns [`SvgError`] if the XML is malformed, the root has no
    /// size, a path's data is invalid, or `tolerance` is not positive.
    pub fn parse(text: &str, tolerance: f64) -> Result<Self, SvgError> {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(SvgError::InvalidTolerance(tolerance));
        }

        let parser = svg::Parser::new(text);
        let mut dimensions = None;
        let mut paths = Vec::new();

        for event in parser {
            match event {
                Event::Error(e) => return Err(SvgError::Read(e.to_string())),
                Event::Tag(_, tag::Type::End, _) => {}
                Event::Tag(name, _, attributes) if name == tag::SVG => {
                    if dimensions.is_none() {
                        dimensions = Some(root_dimensions(&attributes)?);
                    }
                }
                Event::Tag(name, _, attributes) if name == tag::Path => {
                    if let Some(d) = attributes.get("d") {
                        let data = Data::parse(d).map_err(|e| SvgError::PathData(e.to_string()))?;
                        paths.extend(flatten(&data, tolerance)?);
                    }
                }
                _ => {}
            }
        }

        let dimensions = dimensions.ok_or(SvgError::MissingRoot)?;
        Ok(Self { dimensions, paths })
    }
}

/// Build a document from traced contours, dropping empty ones.
#[must_use = "returns the vector path document"]
pub fn emit(contours: &[Contour], dimensions: Dimensions) -> VectorPathDocument {
    let paths = contours
        .iter()
        .filter(|c| !c.is_empty())
        .map(Contour::to_polyline)
        .collect();
    VectorPathDocument::new(dimensions, paths)
}

/// Build the `d` attribute for one polyline: a single absolute move-to
/// with every coordinate pair.
///
/// Returns `None` for an empty polyline.
///
/// # Examples
///
/// ```
/// use plotscan_pipeline::{Point, Polyline};
/// use plotscan_export::svg::path_data;
///
/// let polyline = Polyline::new(vec![
///     Point::new(0.0, 0.0),
///     Point::new(10.0, 0.0),
///     Point::new(10.0, 10.0),
/// ]);
/// assert_eq!(path_data(&polyline).unwrap(), "M0,0,10,0,10,10");
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn path_data(polyline: &Polyline) -> Option<String> {
    if polyline.is_empty() {
        return None;
    }
    let coords: Vec<f32> = polyline
        .points()
        .iter()
        .flat_map(|p| [p.x as f32, p.y as f32])
        .collect();
    Some(String::from(svg::node::Value::from(Data::new().move_to(coords))))
}

fn root_dimensions(attributes: &svg::node::Attributes) -> Result<Dimensions, SvgError> {
    let width = attributes.get("width").and_then(|v| parse_length(v));
    let height = attributes.get("height").and_then(|v| parse_length(v));
    if let (Some(w), Some(h)) = (width, height) {
        return Ok(Dimensions::new(w, h));
    }

    let view_box: Vec<f64> = attributes
        .get("viewBox")
        .map(|v| {
            v.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    match view_box.as_slice() {
        [_, _, w, h] => match (to_pixels(*w), to_pixels(*h)) {
            (Some(w), Some(h)) => Ok(Dimensions::new(w, h)),
            _ => Err(SvgError::MissingDimensions),
        },
        _ => Err(SvgError::MissingDimensions),
    }
}

/// Leading number of a length such as `"4200"`, `"210mm"` or `"12.5px"`.
fn parse_length(text: &str) -> Option<u32> {
    let text = text.trim();
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(text.len());
    to_pixels(text[..end].parse().ok()?)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_pixels(value: f64) -> Option<u32> {
    let rounded = value.round();
    (rounded.is_finite() && rounded >= 1.0 && rounded <= f64::from(u32::MAX))
        .then_some(rounded as u32)
}

/// Convert path commands into polylines, one per subpath.
fn flatten(data: &Data, tolerance: f64) -> Result<Vec<Polyline>, SvgError> {
    let mut pen = Pen::new(tolerance);
    for command in data.iter() {
        pen.apply(command)?;
    }
    Ok(pen.finish())
}

/// Path interpreter state.
struct Pen {
    tolerance: f64,
    current: Point,
    subpath_start: Point,
    last_cubic_control: Option<Point>,
    last_quad_control: Option<Point>,
    line: Vec<Point>,
    done: Vec<Polyline>,
}

impl Pen {
    const fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            current: Point::new(0.0, 0.0),
            subpath_start: Point::new(0.0, 0.0),
            last_cubic_control: None,
            last_quad_control: None,
            line: Vec::new(),
            done: Vec::new(),
        }
    }

    fn apply(&mut self, command: &Command) -> Result<(), SvgError> {
        let mut cubic_control = None;
        let mut quad_control = None;

        match command {
            Command::Move(pos, params) => {
                let letter = letter('M', pos);
                for (i, g) in groups(params, 2, letter)?.enumerate() {
                    let p = self.resolve(pos, g[0], g[1]);
                    if i == 0 {
                        self.move_to(p);
                    } else {
                        self.line_to(p);
                    }
                }
            }
            Command::Line(pos, params) => {
                for g in groups(params, 2, letter('L', pos))? {
                    let p = self.resolve(pos, g[0], g[1]);
                    self.line_to(p);
                }
            }
            Command::HorizontalLine(pos, params) => {
                for g in groups(params, 1, letter('H', pos))? {
                    let x = match pos {
                        Position::Absolute => f64::from(g[0]),
                        Position::Relative => self.current.x + f64::from(g[0]),
                    };
                    self.line_to(Point::new(x, self.current.y));
                }
            }
            Command::VerticalLine(pos, params) => {
                for g in groups(params, 1, letter('V', pos))? {
                    let y = match pos {
                        Position::Absolute => f64::from(g[0]),
                        Position::Relative => self.current.y + f64::from(g[0]),
                    };
                    self.line_to(Point::new(self.current.x, y));
                }
            }
            Command::CubicCurve(pos, params) => {
                for g in groups(params, 6, letter('C', pos))? {
                    let c1 = self.resolve(pos, g[0], g[1]);
                    let c2 = self.resolve(pos, g[2], g[3]);
                    let end = self.resolve(pos, g[4], g[5]);
                    self.cubic_to(c1, c2, end);
                    cubic_control = Some(c2);
                }
            }
            Command::SmoothCubicCurve(pos, params) => {
                for g in groups(params, 4, letter('S', pos))? {
                    let c1 = cubic_control
                        .or(self.last_cubic_control)
                        .map_or(self.current, |c| reflect(c, self.current));
                    let c2 = self.resolve(pos, g[0], g[1]);
                    let end = self.resolve(pos, g[2], g[3]);
                    self.cubic_to(c1, c2, end);
                    cubic_control = Some(c2);
                }
            }
            Command::QuadraticCurve(pos, params) => {
                for g in groups(params, 4, letter('Q', pos))? {
                    let c = self.resolve(pos, g[0], g[1]);
                    let end = self.resolve(pos, g[2], g[3]);
                    self.quad_to(c, end);
                    quad_control = Some(c);
                }
            }
            Command::SmoothQuadraticCurve(pos, params) => {
                for g in groups(params, 2, letter('T', pos))? {
                    let c = quad_control
                        .or(self.last_quad_control)
                        .map_or(self.current, |c| reflect(c, self.current));
                    let end = self.resolve(pos, g[0], g[1]);
                    self.quad_to(c, end);
                    quad_control = Some(c);
                }
            }
            Command::EllipticalArc(pos, params) => {
                for g in groups(params, 7, letter('A', pos))? {
                    let end = self.resolve(pos, g[5], g[6]);
                    let arc = Arc {
                        rx: f64::from(g[0]).abs(),
                        ry: f64::from(g[1]).abs(),
                        rotation: f64::from(g[2]).to_radians(),
                        large: g[3] != 0.0,
                        sweep: g[4] != 0.0,
                    };
                    self.arc_to(&arc, end);
                }
            }
            Command::Close => {
                if !self.line.is_empty() {
                    let start = self.subpath_start;
                    self.line_to(start);
                    self.end_subpath();
                }
                self.current = self.subpath_start;
            }
        }

        self.last_cubic_control = cubic_control;
        self.last_quad_control = quad_control;
        Ok(())
    }

    fn resolve(&self, pos: &Position, x: f32, y: f32) -> Point {
        let (x, y) = (f64::from(x), f64::from(y));
        match pos {
            Position::Absolute => Point::new(x, y),
            Position::Relative => Point::new(self.current.x + x, self.current.y + y),
        }
    }

    fn move_to(&mut self, p: Point) {
        self.end_subpath();
        self.line.push(p);
        self.current = p;
        self.subpath_start = p;
    }

    fn line_to(&mut self, p: Point) {
        if self.line.is_empty() {
            self.line.push(self.current);
            self.subpath_start = self.current;
        }
        self.line.push(p);
        self.current = p;
    }

    fn cubic_to(&mut self, c1: Point, c2: Point, end: Point) {
        let p0 = self.current;
        let bend = second_difference(p0, c1, c2).max(second_difference(c1, c2, end));
        let n = segment_count(6.0 * bend, self.tolerance);
        for i in 1..n {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 / n as f64;
            let u = 1.0 - t;
            let (a, b, c, d) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
            self.line_to(Point::new(
                a * p0.x + b * c1.x + c * c2.x + d * end.x,
                a * p0.y + b * c1.y + c * c2.y + d * end.y,
            ));
        }
        self.line_to(end);
    }

    fn quad_to(&mut self, c: Point, end: Point) {
        let p0 = self.current;
        let n = segment_count(2.0 * second_difference(p0, c, end), self.tolerance);
        for i in 1..n {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 / n as f64;
            let u = 1.0 - t;
            let (a, b, d) = (u * u, 2.0 * u * t, t * t);
            self.line_to(Point::new(
                a * p0.x + b * c.x + d * end.x,
                a * p0.y + b * c.y + d * end.y,
            ));
        }
        self.line_to(end);
    }

    /// Endpoint-to-centre conversion of an SVG elliptical arc, then
    /// uniform sampling in angle.
    fn arc_to(&mut self, arc: &Arc, end: Point) {
        let start = self.current;
        if start == end {
            return;
        }
        let (mut rx, mut ry) = (arc.rx, arc.ry);
        if rx == 0.0 || ry == 0.0 {
            self.line_to(end);
            return;
        }

        let (sin, cos) = arc.rotation.sin_cos();
        let hx = (start.x - end.x) / 2.0;
        let hy = (start.y - end.y) / 2.0;
        let x1 = cos * hx + sin * hy;
        let y1 = -sin * hx + cos * hy;

        let lambda = (x1 * x1) / (rx * rx) + (y1 * y1) / (ry * ry);
        if lambda > 1.0 {
            let s = lambda.sqrt();
            rx *= s;
            ry *= s;
        }

        let num = (rx * rx).mul_add(ry * ry, -(rx * rx * y1 * y1) - ry * ry * x1 * x1);
        let den = (rx * rx).mul_add(y1 * y1, ry * ry * x1 * x1);
        let mut coef = (num / den).max(0.0).sqrt();
        if arc.large == arc.sweep {
            coef = -coef;
        }
        let cx1 = coef * rx * y1 / ry;
        let cy1 = -coef * ry * x1 / rx;
        let cx = cos * cx1 - sin * cy1 + (start.x + end.x) / 2.0;
        let cy = sin * cx1 + cos * cy1 + (start.y + end.y) / 2.0;

        let u = ((x1 - cx1) / rx, (y1 - cy1) / ry);
        let v = ((-x1 - cx1) / rx, (-y1 - cy1) / ry);
        let theta = vector_angle((1.0, 0.0), u);
        let mut delta = vector_angle(u, v);
        if !arc.sweep && delta > 0.0 {
            delta -= TAU;
        } else if arc.sweep && delta < 0.0 {
            delta += TAU;
        }

        let radius = rx.max(ry);
        let step = if self.tolerance < radius {
            2.0 * (1.0 - self.tolerance / radius).acos()
        } else {
            PI / 2.0
        };
        let n = clamp_segments((delta.abs() / step).ceil());
        for i in 1..n {
            #[allow(clippy::cast_precision_loss)]
            let angle = theta + delta * (i as f64 / n as f64);
            let (s, c) = angle.sin_cos();
            self.line_to(Point::new(
                cx + rx * c * cos - ry * s * sin,
                cy + rx * c * sin + ry * s * cos,
            ));
        }
        self.line_to(end);
    }

    fn end_subpath(&mut self) {
        if !self.line.is_empty() {
            self.done.push(Polyline::new(std::mem::take(&mut self.line)));
        }
    }

    fn finish(mut self) -> Vec<Polyline> {
        self.end_subpath();
        self.done
    }
}

struct Arc {
    rx: f64,
    ry: f64,
    rotation: f64,
    large: bool,
    sweep: bool,
}

const fn letter(upper: char, pos: &Position) -> char {
    match pos {
        Position::Absolute => upper,
        Position::Relative => upper.to_ascii_lowercase(),
    }
}

fn groups(
    params: &[f32],
    arity: usize,
    command: char,
) -> Result<std::slice::ChunksExact<'_, f32>, SvgError> {
    if params.is_empty() || params.len() % arity != 0 {
        return Err(SvgError::Arity {
            command,
            arity,
            count: params.len(),
        });
    }
    Ok(params.chunks_exact(arity))
}

fn reflect(control: Point, about: Point) -> Point {
    Point::new(2.0f64.mul_add(about.x, -control.x), 2.0f64.mul_add(about.y, -control.y))
}

/// Length of `a - 2b + c`.
fn second_difference(a: Point, b: Point, c: Point) -> f64 {
    let x = 2.0f64.mul_add(-b.x, a.x) + c.x;
    let y = 2.0f64.mul_add(-b.y, a.y) + c.y;
    x.hypot(y)
}

/// Segments needed so uniform sampling stays within `tolerance` of a
/// curve whose second derivative is bounded by `max_second_derivative`.
fn segment_count(max_second_derivative: f64, tolerance: f64) -> usize {
    clamp_segments((max_second_derivative / (8.0 * tolerance)).sqrt().ceil())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_segments(n: f64) -> usize {
    if n.is_nan() {
        return 1;
    }
    n.clamp(1.0, MAX_CURVE_SEGMENTS as f64) as usize
}

fn vector_angle(u: (f64, f64), v: (f64, f64)) -> f64 {
    let cross = u.0 * v.1 - u.1 * v.0;
    let dot = u.0 * v.0 + u.1 * v.1;
    cross.atan2(dot)
}
