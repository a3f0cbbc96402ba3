//! Background dispatch of compile and streaming jobs.
//!
//! Two single-flight lanes, each running its job on a named thread:
//!
//! - **compile**: latest frame -> pipeline -> SVG -> G-code -> files
//! - **stream**: stored G-code -> serial session
//!
//! A request for a lane that is already running is rejected with
//! [`DispatchError::Busy`]. A stream is also rejected while a compile
//! runs, since it would pick up a toolpath about to be replaced. A
//! compile while streaming is fine: the session holds its own copy of
//! the program, read when the stream was submitted.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use plotscan_export::{CompileOptions, ToolpathError, VectorPathDocument, compile_svg};
use plotscan_pipeline::{PipelineConfig, PipelineError, RgbImage};

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::config::PlotConfig;
use crate::frame::FrameSlot;
use crate::stream::{
    Link, SerialLink, SessionOutcome, StreamConfig, StreamError, StreamObserver, stream,
};

/// A dispatch lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Vision and toolpath compilation.
    Compile,
    /// Serial streaming.
    Stream,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => f.write_str("compile"),
            Self::Stream => f.write_str("stream"),
        }
    }
}

/// Reasons a job was not started.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The lane (or a lane it waits on) is already running a job.
    #[error("{0} job already running")]
    Busy(Lane),

    /// Streaming was requested but no toolpath has been compiled.
    #[error("no compiled toolpath to stream")]
    NoToolpath,

    /// The stored toolpath could not be read.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The worker thread could not be spawned.
    #[error("could not start {lane} thread: {source}")]
    Spawn {
        /// Lane the thread was for.
        lane: Lane,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a compile job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// No frame has been captured yet.
    #[error("no frame captured yet")]
    NoFrame,

    /// No vector document has been written yet.
    #[error("no vector document to recompile")]
    NoVectorDocument,

    /// The vision pipeline failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Toolpath compilation failed.
    #[error(transparent)]
    Toolpath(#[from] ToolpathError),

    /// Writing or reading an artifact failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Summary of a successful compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    /// Written vector document.
    pub svg_path: PathBuf,
    /// Written toolpath.
    pub gcode_path: PathBuf,
    /// Number of vector paths.
    pub paths: usize,
    /// Whether a page outline was found in the frame; `None` when
    /// recompiling a stored document.
    pub document_found: Option<bool>,
    /// Number of toolpath commands.
    pub commands: usize,
}

/// Run the full compile chain on one frame and write both artifacts.
///
/// The SVG text is emitted and compiled in memory before anything is
/// written, so a failure at any stage leaves the previous artifacts
/// in place. The G-code is written first: a stored SVG is only replaced
/// once the toolpath compiled from it is on disk.
///
/// # Errors
///
/// Returns [`JobError`] from whichever stage failed.
pub fn compile_frame(
    frame: &RgbImage,
    pipeline: &PipelineConfig,
    options: &CompileOptions,
    store: &ArtifactStore,
) -> Result<CompileReport, JobError> {
    options.validate()?;
    let result = plotscan_pipeline::process(frame, pipeline)?;
    if !result.document_found {
        tracing::info!("no page outline found; using the whole frame");
    }

    let document = plotscan_export::emit(&result.contours, result.dimensions);
    let svg = document.to_svg();
    let program = compile_svg(&svg, options)?;
    let gcode = program.to_gcode();

    let gcode_path = store.write_gcode(&gcode)?;
    let svg_path = store.write_svg(&svg)?;

    let report = CompileReport {
        svg_path,
        gcode_path,
        paths: document.paths.len(),
        document_found: Some(result.document_found),
        commands: program.commands().len(),
    };
    tracing::info!(
        paths = report.paths,
        commands = report.commands,
        gcode = %report.gcode_path.display(),
        "compile finished"
    );
    Ok(report)
}

/// Recompile the stored vector document into a fresh toolpath.
///
/// # Errors
///
/// Returns [`JobError::NoVectorDocument`] if no SVG has been written,
/// otherwise as [`compile_frame`].
pub fn recompile(
    options: &CompileOptions,
    store: &ArtifactStore,
) -> Result<CompileReport, JobError> {
    let svg = store.read_svg()?.ok_or(JobError::NoVectorDocument)?;
    let document =
        VectorPathDocument::parse(&svg, options.tolerance).map_err(ToolpathError::from)?;
    let program = plotscan_export::compile(&document, options)?;
    let gcode_path = store.write_gcode(&program.to_gcode())?;
    tracing::info!(
        paths = document.paths.len(),
        gcode = %gcode_path.display(),
        "recompile finished"
    );
    Ok(CompileReport {
        svg_path: store.svg_path(),
        gcode_path,
        paths: document.paths.len(),
        document_found: None,
        commands: program.commands().len(),
    })
}

/// Clears a lane's busy flag when the job ends, including by panic.
struct LaneGuard(Arc<AtomicBool>);

impl LaneGuard {
    fn acquire(flag: &Arc<AtomicBool>, lane: Lane) -> Result<Self, DispatchError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DispatchError::Busy(lane))?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs compile and stream jobs on background threads.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    slot: Arc<FrameSlot>,
    store: ArtifactStore,
    pipeline: PipelineConfig,
    compile: CompileOptions,
    stream: StreamConfig,
    compiling: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Dispatcher reading frames from `slot`.
    #[must_use]
    pub fn new(config: &PlotConfig, slot: Arc<FrameSlot>) -> Self {
        Self {
            slot,
            store: config.artifact_store(),
            pipeline: config.pipeline.clone(),
            compile: config.compile.clone(),
            stream: config.stream.clone(),
            compiling: Arc::new(AtomicBool::new(false)),
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The artifact store jobs write to.
    #[must_use]
    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Whether `lane` is running a job.
    #[must_use]
    pub fn is_busy(&self, lane: Lane) -> bool {
        match lane {
            Lane::Compile => self.compiling.load(Ordering::Acquire),
            Lane::Stream => self.streaming.load(Ordering::Acquire),
        }
    }

    /// Compile the latest frame in the background.
    ///
    /// The frame is taken when the job starts running.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Busy`] if a compile is running, or
    /// [`DispatchError::Spawn`] if the thread cannot start.
    pub fn submit_compile(
        &self,
    ) -> Result<JoinHandle<Result<CompileReport, JobError>>, DispatchError> {
        let guard = LaneGuard::acquire(&self.compiling, Lane::Compile)?;
        let slot = Arc::clone(&self.slot);
        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let options = self.compile.clone();

        spawn(Lane::Compile, move || {
            let _guard = guard;
            let _span = tracing::info_span!("compile").entered();
            let frame = slot.latest().ok_or(JobError::NoFrame)?;
            compile_frame(&frame, &pipeline, &options, &store).inspect_err(|e| {
                tracing::error!(error = %e, "compile failed; previous artifacts kept");
            })
        })
    }

    /// Recompile the stored SVG in the background.
    ///
    /// # Errors
    ///
    /// As [`submit_compile`](Self::submit_compile).
    pub fn submit_recompile(
        &self,
    ) -> Result<JoinHandle<Result<CompileReport, JobError>>, DispatchError> {
        let guard = LaneGuard::acquire(&self.compiling, Lane::Compile)?;
        let store = self.store.clone();
        let options = self.compile.clone();

        spawn(Lane::Compile, move || {
            let _guard = guard;
            let _span = tracing::info_span!("recompile").entered();
            recompile(&options, &store).inspect_err(|e| {
                tracing::error!(error = %e, "recompile failed; previous toolpath kept");
            })
        })
    }

    /// Stream the stored toolpath over a link produced by `open`.
    ///
    /// The toolpath is read now; later compiles do not affect this
    /// session. If `open` fails, the observer receives a terminal
    /// `Failed` outcome and no `started` event.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Busy`] if a stream or compile is
    /// running, [`DispatchError::NoToolpath`] if nothing was compiled,
    /// [`DispatchError::Artifact`] if the toolpath cannot be read, or
    /// [`DispatchError::Spawn`] if the thread cannot start.
    pub fn submit_stream_with<L, F, O>(
        &self,
        open: F,
        mut observer: O,
    ) -> Result<JoinHandle<SessionOutcome>, DispatchError>
    where
        L: Link,
        F: FnOnce(&StreamConfig) -> Result<L, StreamError> + Send + 'static,
        O: StreamObserver + Send + 'static,
    {
        let guard = LaneGuard::acquire(&self.streaming, Lane::Stream)?;
        if self.is_busy(Lane::Compile) {
            return Err(DispatchError::Busy(Lane::Compile));
        }
        let program = self.store.read_gcode()?.ok_or(DispatchError::NoToolpath)?;
        let config = self.stream.clone();

        spawn(Lane::Stream, move || {
            let _guard = guard;
            let _span = tracing::info_span!("stream").entered();
            match open(&config) {
                Ok(link) => stream(link, &program, &config, &mut observer),
                Err(e) => {
                    tracing::error!(error = %e, "serial session not started");
                    let outcome = SessionOutcome::Failed {
                        reason: e.to_string(),
                    };
                    observer.stopped(&outcome);
                    outcome
                }
            }
        })
    }

    /// Stream the stored toolpath to serial `port`.
    ///
    /// # Errors
    ///
    /// As [`submit_stream_with`](Self::submit_stream_with).
    pub fn submit_stream<O>(
        &self,
        port: impl Into<String>,
        observer: O,
    ) -> Result<JoinHandle<SessionOutcome>, DispatchError>
    where
        O: StreamObserver + Send + 'static,
    {
        let port = port.into();
        self.submit_stream_with(move |config| SerialLink::open(&port, config), observer)
    }
}

fn spawn<T, F>(lane: Lane, job: F) -> Result<JoinHandle<T>, DispatchError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("plotscan-{lane}"))
        .spawn(job)
        .map_err(|source| DispatchError::Spawn { lane, source })?;
    tracing::debug!(%lane, "job dispatched");
    Ok(handle)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lane_guard_is_single_flight() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = LaneGuard::acquire(&flag, Lane::Compile).unwrap();
        assert!(matches!(
            LaneGuard::acquire(&flag, Lane::Compile),
            Err(DispatchError::Busy(Lane::Compile))
        ));
        drop(guard);
        assert!(LaneGuard::acquire(&flag, Lane::Compile).is_ok());
    }

    #[test]
    fn compile_without_frame_reports_no_frame() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = PlotConfig {
            artifact_dir: dir.path().to_path_buf(),
            ..PlotConfig::default()
        };
        let dispatcher = Dispatcher::new(&config, Arc::new(FrameSlot::new()));
        let result = dispatcher.submit_compile().unwrap().join().unwrap();
        assert!(matches!(result, Err(JobError::NoFrame)));
        assert!(!dispatcher.is_busy(Lane::Compile));
    }

    #[test]
    fn stream_without_toolpath_is_rejected() {
        struct Quiet;
        impl StreamObserver for Quiet {
            fn stopped(&mut self, _: &SessionOutcome) {}
        }

        let dir = tempfile::TempDir::new().unwrap();
        let config = PlotConfig {
            artifact_dir: dir.path().to_path_buf(),
            ..PlotConfig::default()
        };
        let dispatcher = Dispatcher::new(&config, Arc::new(FrameSlot::new()));
        assert!(matches!(
            dispatcher.submit_stream("/dev/null-port", Quiet),
            Err(DispatchError::NoToolpath)
        ));
        assert!(!dispatcher.is_busy(Lane::Stream));
    }

    #[test]
    fn recompile_without_svg_reports_missing_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            recompile(&CompileOptions::default(), &store),
            Err(JobError::NoVectorDocument)
        ));
    }
}
