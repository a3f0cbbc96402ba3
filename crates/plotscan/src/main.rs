//! plotscan: scan a page and plot it.
//!
//! Runs the document pipeline on a captured frame, writes the vector
//! document and toolpath into the artifact directory, and streams the
//! toolpath to a machine over a serial port.
//!
//! # Usage
//!
//! ```text
//! plotscan process frame.jpg            # frame -> SVG + G-code
//! plotscan compile --passes 3           # stored SVG -> G-code
//! plotscan ports                        # list serial ports
//! plotscan stream --port /dev/ttyUSB0   # send the stored G-code
//! plotscan preview --output preview.png
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use plotscan_io::{
    CompileReport, Dispatcher, FramePump, FrameSlot, ImageFileSource, LogObserver, PlotConfig,
    SessionOutcome,
};
use plotscan_pipeline::Dimensions;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Scan a page with a camera and plot it.
#[derive(Parser)]
#[command(name = "plotscan", version)]
struct Cli {
    /// JSON config file.
    #[arg(long, global = true, conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Full config as a JSON string.
    #[arg(long, global = true)]
    config_json: Option<String>,

    /// Artifact directory (overrides the config).
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rectify and trace a frame, then write the SVG and G-code.
    Process {
        /// Captured frame (PNG, JPEG, BMP, WebP).
        image: PathBuf,

        /// Size of the traced canvas, e.g. `4200x2970`.
        #[arg(long, value_parser = parse_dimensions)]
        canvas: Option<Dimensions>,

        #[command(flatten)]
        compile: CompileArgs,
    },

    /// Recompile the stored SVG into G-code.
    Compile {
        #[command(flatten)]
        compile: CompileArgs,
    },

    /// Stream the stored G-code to a serial port.
    Stream {
        /// Serial port name.
        #[arg(long)]
        port: String,

        /// Seconds to wait for each acknowledgement.
        #[arg(long)]
        timeout_secs: Option<f64>,

        /// On timeout, retract and return to the origin without waiting.
        #[arg(long)]
        park_on_timeout: bool,
    },

    /// List serial ports.
    Ports,

    /// Render the preview image to a file.
    Preview {
        /// Output image path.
        #[arg(long)]
        output: PathBuf,

        /// Frame to show when no SVG exists yet.
        #[arg(long)]
        frame: Option<PathBuf>,

        /// Preview width in pixels.
        #[arg(long, default_value_t = 800)]
        width: u32,

        /// Preview height in pixels.
        #[arg(long, default_value_t = 566)]
        height: u32,
    },
}

/// Toolpath overrides shared by `process` and `compile`.
#[derive(Args)]
struct CompileArgs {
    /// Number of passes.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    passes: Option<u32>,

    /// Cut depth per pass (mm).
    #[arg(long)]
    pass_depth: Option<f64>,

    /// Curve flattening tolerance (canvas pixels).
    #[arg(long)]
    tolerance: Option<f64>,

    /// Keep SVG y-down coordinates instead of flipping to machine y-up.
    #[arg(long)]
    no_flip: bool,
}

impl CompileArgs {
    fn apply(&self, config: &mut PlotConfig) {
        if let Some(passes) = self.passes {
            config.compile.passes = passes;
        }
        if let Some(depth) = self.pass_depth {
            config.compile.speeds.pass_depth = depth;
        }
        if let Some(tolerance) = self.tolerance {
            config.compile.tolerance = tolerance;
        }
        if self.no_flip {
            config.compile.flip_y = false;
        }
    }
}

fn parse_dimensions(s: &str) -> Result<Dimensions, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width = w.trim().parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
    let height = h.trim().parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
    Ok(Dimensions::new(width, height))
}

/// Build a [`PlotConfig`] from `--config` / `--config-json` plus global
/// overrides.
fn config_from_cli(cli: &Cli) -> Result<PlotConfig, String> {
    let mut config = if let Some(ref json) = cli.config_json {
        PlotConfig::from_json(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else if let Some(ref path) = cli.config {
        PlotConfig::load(path).map_err(|e| e.to_string())?
    } else {
        PlotConfig::default()
    };
    if let Some(ref dir) = cli.artifact_dir {
        config.artifact_dir.clone_from(dir);
    }
    Ok(config)
}

fn init_tracing(verbose: u8) {
    let default = if verbose > 0 { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "configuration loaded");

    let result = match cli.command {
        Command::Process {
            ref image,
            canvas,
            ref compile,
        } => {
            compile.apply(&mut config);
            if let Some(canvas) = canvas {
                config.pipeline.extract.output = canvas;
            }
            run_process(&config, image)
        }
        Command::Compile { ref compile } => {
            compile.apply(&mut config);
            run_compile(&config)
        }
        Command::Stream {
            ref port,
            timeout_secs,
            park_on_timeout,
        } => {
            if let Some(secs) = timeout_secs {
                match Duration::try_from_secs_f64(secs) {
                    Ok(timeout) => config.stream.ack_timeout = timeout,
                    Err(e) => {
                        eprintln!("Invalid --timeout-secs {secs}: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
            config.stream.park_on_timeout |= park_on_timeout;
            run_stream(&config, port)
        }
        Command::Ports => run_ports(),
        Command::Preview {
            ref output,
            ref frame,
            width,
            height,
        } => run_preview(&config, output, frame.as_deref(), width, height),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run_process(config: &PlotConfig, image: &Path) -> Result<(), String> {
    let slot = Arc::new(FrameSlot::new());
    FramePump::new(ImageFileSource::new(image))
        .pump(&slot)
        .map_err(|e| e.to_string())?;

    let dispatcher = Dispatcher::new(config, slot);
    let handle = dispatcher.submit_compile().map_err(|e| e.to_string())?;
    let report = handle
        .join()
        .map_err(|_| "compile thread panicked".to_owned())?
        .map_err(|e| format!("Compile failed: {e}"))?;
    print_report(&report);
    Ok(())
}

fn run_compile(config: &PlotConfig) -> Result<(), String> {
    let dispatcher = Dispatcher::new(config, Arc::new(FrameSlot::new()));
    let handle = dispatcher.submit_recompile().map_err(|e| e.to_string())?;
    let report = handle
        .join()
        .map_err(|_| "compile thread panicked".to_owned())?
        .map_err(|e| format!("Compile failed: {e}"))?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &CompileReport) {
    if report.document_found == Some(false) {
        println!("No page outline found; the whole frame was traced.");
    }
    println!(
        "{} paths, {} commands\n  {}\n  {}",
        report.paths,
        report.commands,
        report.svg_path.display(),
        report.gcode_path.display(),
    );
}

fn run_stream(config: &PlotConfig, port: &str) -> Result<(), String> {
    let dispatcher = Dispatcher::new(config, Arc::new(FrameSlot::new()));
    let handle = dispatcher
        .submit_stream(port, LogObserver)
        .map_err(|e| e.to_string())?;
    let outcome = handle
        .join()
        .map_err(|_| "stream thread panicked".to_owned())?;
    match outcome {
        SessionOutcome::Completed { acknowledged } => {
            println!("Done: {acknowledged} commands acknowledged.");
            Ok(())
        }
        other => Err(other.to_string()),
    }
}

fn run_ports() -> Result<(), String> {
    let ports = plotscan_io::list_ports().map_err(|e| e.to_string())?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn run_preview(
    config: &PlotConfig,
    output: &Path,
    frame: Option<&Path>,
    width: u32,
    height: u32,
) -> Result<(), String> {
    let slot = FrameSlot::new();
    if let Some(frame) = frame {
        FramePump::new(ImageFileSource::new(frame))
            .pump(&slot)
            .map_err(|e| e.to_string())?;
    }
    let image = plotscan_io::render_preview(&config.artifact_store(), &slot, width, height)
        .map_err(|e| e.to_string())?;
    image
        .save(output)
        .map_err(|e| format!("Error writing {}: {e}", output.display()))?;
    eprintln!("Preview written to {}", output.display());
    Ok(())
}
