//! plotscan-export: Pure format serializers (sans-IO)
//!
//! Converts traced contours into an SVG path document, compiles vector
//! paths into G-code, and renders raster previews. Every function here
//! works on in-memory values; writing files is left to `plotscan-io`.

pub mod gcode;
pub mod raster;
pub mod svg;

pub use gcode::{
    CompileOptions, FeedClass, Motion, SpeedProfile, ToolpathCommand, ToolpathError,
    ToolpathProgram, compile, compile_svg,
};
pub use raster::{fit_frame, render_document};
pub use svg::{SvgError, VectorPathDocument, emit};
