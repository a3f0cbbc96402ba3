//! G-code toolpath compiler.
//!
//! Turns a [`VectorPathDocument`] into a multi-pass cutting program:
//! every path is visited once per pass, each pass engaging one
//! `pass_depth` deeper than the previous one. Coordinates are converted
//! from canvas pixels to millimetres and, by default, flipped so that
//! the machine's Y axis points up.
//!
//! The program is held as typed [`ToolpathCommand`]s so callers can
//! inspect it; [`ToolpathProgram::to_gcode`] renders the text form.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use plotscan_pipeline::Point;

use crate::svg::{SvgError, VectorPathDocument};

/// Errors from compiling a toolpath.
#[derive(Debug, thiserror::Error)]
pub enum ToolpathError {
    /// The vector input could not be parsed.
    #[error("could not read vector paths: {0}")]
    Svg(#[from] SvgError),

    /// Compile options are out of range.
    #[error("invalid compile options: {0}")]
    InvalidOptions(String),

    /// The document contains no paths to cut.
    #[error("vector document contains no paths")]
    EmptyDocument,
}

/// Feed rates and cut depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedProfile {
    /// Feed for moves with the tool raised (mm/min).
    pub travel_feed: f64,
    /// Feed for engaging and cutting moves (mm/min).
    pub cut_feed: f64,
    /// Extra depth per pass (mm).
    pub pass_depth: f64,
}

impl SpeedProfile {
    /// Default travel feed.
    pub const DEFAULT_TRAVEL_FEED: f64 = 25_000.0;
    /// Default cutting feed.
    pub const DEFAULT_CUT_FEED: f64 = 10_000.0;
    /// Default depth per pass.
    pub const DEFAULT_PASS_DEPTH: f64 = 5.0;
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self {
            travel_feed: Self::DEFAULT_TRAVEL_FEED,
            cut_feed: Self::DEFAULT_CUT_FEED,
            pass_depth: Self::DEFAULT_PASS_DEPTH,
        }
    }
}

/// Parameters for [`compile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Maximum curve flattening error in canvas pixels.
    pub tolerance: f64,
    /// Feeds and depth.
    pub speeds: SpeedProfile,
    /// Number of times the full path set is cut.
    pub passes: u32,
    /// Safe Z height for travel moves (mm).
    pub clearance: f64,
    /// Millimetres per canvas pixel.
    pub mm_per_px: f64,
    /// Mirror Y against the canvas height.
    pub flip_y: bool,
}

impl CompileOptions {
    /// Default flattening tolerance.
    pub const DEFAULT_TOLERANCE: f64 = 0.3;
    /// Default pass count.
    pub const DEFAULT_PASSES: u32 = 2;
    /// Default clearance height.
    pub const DEFAULT_CLEARANCE: f64 = 5.0;
    /// Default scale: a 4200x2970 canvas covers A3.
    pub const DEFAULT_MM_PER_PX: f64 = 0.1;

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ToolpathError::InvalidOptions`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ToolpathError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ToolpathError::InvalidOptions(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };
        let non_negative = |name: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(ToolpathError::InvalidOptions(format!(
                    "{name} must be non-negative, got {v}"
                )))
            }
        };

        positive("tolerance", self.tolerance)?;
        positive("mm_per_px", self.mm_per_px)?;
        positive("speeds.travel_feed", self.speeds.travel_feed)?;
        positive("speeds.cut_feed", self.speeds.cut_feed)?;
        non_negative("speeds.pass_depth", self.speeds.pass_depth)?;
        non_negative("clearance", self.clearance)?;
        if self.passes == 0 {
            return Err(ToolpathError::InvalidOptions(
                "passes must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
            speeds: SpeedProfile::default(),
            passes: Self::DEFAULT_PASSES,
            clearance: Self::DEFAULT_CLEARANCE,
            mm_per_px: Self::DEFAULT_MM_PER_PX,
            flip_y: true,
        }
    }
}

/// Which feed a command runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedClass {
    /// Tool raised.
    Travel,
    /// Tool engaged.
    Cut,
}

/// One step of a toolpath. Coordinates are machine millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Motion {
    /// Non-executable annotation.
    Comment(String),
    /// Rapid XY move with the tool raised (`G0 X Y`).
    Travel {
        /// X in mm.
        x: f64,
        /// Y in mm.
        y: f64,
    },
    /// Rapid Z move (`G0 Z`), used to raise the tool.
    Retract {
        /// Z in mm.
        z: f64,
    },
    /// Controlled Z move into the work (`G1 Z`).
    Engage {
        /// Z in mm, negative below the surface.
        z: f64,
    },
    /// Controlled XY move with the tool engaged (`G1 X Y`).
    Cut {
        /// X in mm.
        x: f64,
        /// Y in mm.
        y: f64,
    },
}

/// A motion tagged with its feed class and pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolpathCommand {
    /// What the machine does.
    pub motion: Motion,
    /// Feed class the motion runs at.
    pub feed: FeedClass,
    /// Pass number, `1..=passes`; 0 for setup and trailer.
    pub pass: u32,
}

impl ToolpathCommand {
    const fn setup(motion: Motion, feed: FeedClass) -> Self {
        Self {
            motion,
            feed,
            pass: 0,
        }
    }
}

/// A compiled toolpath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolpathProgram {
    commands: Vec<ToolpathCommand>,
    speeds: SpeedProfile,
    passes: u32,
}

impl ToolpathProgram {
    /// All commands in execution order.
    #[must_use]
    pub fn commands(&self) -> &[ToolpathCommand] {
        &self.commands
    }

    /// Number of passes compiled.
    #[must_use]
    pub const fn passes(&self) -> u32 {
        self.passes
    }

    /// Commands belonging to one pass.
    pub fn pass_commands(&self, pass: u32) -> impl Iterator<Item = &ToolpathCommand> {
        self.commands.iter().filter(move |c| c.pass == pass)
    }

    /// Number of engage moves, one per path per pass.
    #[must_use]
    pub fn engage_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c.motion, Motion::Engage { .. }))
            .count()
    }

    /// Render as G-code text.
    ///
    /// Starts with `G21` (millimetres) and `G90` (absolute). A feed word
    /// is attached whenever the feed class changes from the previous
    /// executable line. Output is deterministic: the same program
    /// always renders the same bytes.
    #[must_use]
    pub fn to_gcode(&self) -> String {
        let mut out = String::new();
        out.push_str("; plotscan toolpath\n");
        out.push_str("G21 ; millimetres\n");
        out.push_str("G90 ; absolute positioning\n");

        let mut feed = None;
        for command in &self.commands {
            let rate = match command.feed {
                FeedClass::Travel => self.speeds.travel_feed,
                FeedClass::Cut => self.speeds.cut_feed,
            };
            let feed_word = if feed == Some(command.feed) {
                String::new()
            } else {
                format!(" F{}", number(rate))
            };

            let _ = match &command.motion {
                Motion::Comment(text) => writeln!(out, "; {text}"),
                Motion::Travel { x, y } => {
                    writeln!(out, "G0 X{} Y{}{feed_word}", number(*x), number(*y))
                }
                Motion::Retract { z } => writeln!(out, "G0 Z{}{feed_word}", number(*z)),
                Motion::Engage { z } => writeln!(out, "G1 Z{}{feed_word}", number(*z)),
                Motion::Cut { x, y } => {
                    writeln!(out, "G1 X{} Y{}{feed_word}", number(*x), number(*y))
                }
            };
            if !matches!(command.motion, Motion::Comment(_)) {
                feed = Some(command.feed);
            }
        }
        out
    }
}

/// Compile a vector document into a toolpath.
///
/// Each pass visits every path in document order: rapid to the first
/// point, engage to `-pass_depth * pass`, cut through the remaining
/// points, retract to `clearance`. After the last pass the trailer
/// raises the tool, returns to `X0 Y0` and lowers to `Z0`; it appears
/// exactly once.
///
/// # Errors
///
/// Returns [`ToolpathError::InvalidOptions`] if `options` fail
/// validation and [`ToolpathError::EmptyDocument`] if no path has any
/// points.
pub fn compile(
    document: &VectorPathDocument,
    options: &CompileOptions,
) -> Result<ToolpathProgram, ToolpathError> {
    options.validate()?;
    if document.paths.iter().all(plotscan_pipeline::Polyline::is_empty) {
        return Err(ToolpathError::EmptyDocument);
    }

    let height = f64::from(document.dimensions.height);
    let to_machine = |p: &Point| {
        let y = if options.flip_y { height - p.y } else { p.y };
        (p.x * options.mm_per_px, y * options.mm_per_px)
    };

    let mut commands = vec![ToolpathCommand::setup(
        Motion::Retract {
            z: options.clearance,
        },
        FeedClass::Travel,
    )];

    for pass in 1..=options.passes {
        let depth = -options.speeds.pass_depth * f64::from(pass);
        let tag = |motion, feed| ToolpathCommand { motion, feed, pass };

        commands.push(tag(
            Motion::Comment(format!("pass {pass} of {}", options.passes)),
            FeedClass::Travel,
        ));
        for path in &document.paths {
            let Some((first, rest)) = path.points().split_first() else {
                continue;
            };
            let (x, y) = to_machine(first);
            commands.push(tag(Motion::Travel { x, y }, FeedClass::Travel));
            commands.push(tag(Motion::Engage { z: depth }, FeedClass::Cut));
            for p in rest {
                let (x, y) = to_machine(p);
                commands.push(tag(Motion::Cut { x, y }, FeedClass::Cut));
            }
            commands.push(tag(
                Motion::Retract {
                    z: options.clearance,
                },
                FeedClass::Travel,
            ));
        }
    }

    commands.extend([
        ToolpathCommand::setup(
            Motion::Retract {
                z: options.clearance,
            },
            FeedClass::Travel,
        ),
        ToolpathCommand::setup(Motion::Travel { x: 0.0, y: 0.0 }, FeedClass::Travel),
        ToolpathCommand::setup(Motion::Retract { z: 0.0 }, FeedClass::Travel),
    ]);

    tracing::debug!(
        paths = document.paths.len(),
        passes = options.passes,
        commands = commands.len(),
        "toolpath compiled"
    );

    Ok(ToolpathProgram {
        commands,
        speeds: options.speeds,
        passes: options.passes,
    })
}

/// Parse SVG text and compile it, flattening curves at
/// `options.tolerance`.
///
/// # Errors
///
/// Returns [`ToolpathError::Svg`] if the text is not a usable SVG, or
/// any error from [`compile`].
pub fn compile_svg(text: &str, options: &CompileOptions) -> Result<ToolpathProgram, ToolpathError> {
    options.validate()?;
    let document = VectorPathDocument::parse(text, options.tolerance)?;
    compile(&document, options)
}

/// Format a coordinate or feed with at most three decimals and no
/// trailing zeros.
fn number(value: f64) -> String {
    let mut s = format!("{value:.3}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" { "0".to_owned() } else { s }
}
