//! plotscan-io: everything that touches the outside world.
//!
//! - [`artifacts`]: atomic SVG / G-code files in the artifact directory
//! - [`frame`]: frame sources and the latest-frame slot
//! - [`stream`]: acknowledge-per-line serial streaming
//! - [`worker`]: single-flight background compile and stream lanes
//! - [`preview`]: preview rendering for a display surface
//! - [`config`]: the JSON application config

pub mod artifacts;
pub mod config;
pub mod frame;
pub mod preview;
pub mod stream;
pub mod worker;

pub use artifacts::{
    ArtifactError, ArtifactStore, DEFAULT_ARTIFACT_DIR, GCODE_FILE_NAME, SVG_FILE_NAME,
};
pub use config::{ConfigError, PlotConfig};
pub use frame::{FrameError, FramePump, FrameSlot, FrameSource, ImageFileSource};
pub use preview::{PreviewError, render_preview};
pub use stream::{
    Ack, ChannelObserver, Link, LogObserver, Progress, SerialLink, Session, SessionOutcome,
    SessionState, StreamConfig, StreamError, StreamEvents, StreamObserver, executable_lines,
    list_ports, stream, stream_to_port, timeout_message,
};
pub use worker::{
    CompileReport, DispatchError, Dispatcher, JobError, Lane, compile_frame, recompile,
};
