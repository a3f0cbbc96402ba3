//! Integration tests: serial sessions over scripted links, and the
//! dispatcher lanes end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};
use plotscan_export::{CompileOptions, compile_svg};
use plotscan_io::{
    ArtifactStore, ChannelObserver, DispatchError, Dispatcher, FrameSlot, JobError, Lane, Link,
    PlotConfig, Progress, SessionOutcome, StreamConfig, StreamError, StreamEvents, compile_frame,
    executable_lines, stream,
};
use plotscan_pipeline::{Dimensions, ExtractConfig, PipelineConfig};

const TWO_PATHS: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
  <path d="M 0 0 10 0 10 10" fill="none" stroke="black"/>
  <path d="M 5 5 15 5" fill="none" stroke="black"/>
</svg>"#;

enum Reply {
    Line(&'static str),
    Silence,
    Fail,
}

/// In-memory link: records what was sent and answers each read with
/// `reply(commands_sent_so_far)`.
struct ScriptedLink<F> {
    sent: Arc<Mutex<Vec<String>>>,
    reply: F,
}

impl<F: FnMut(usize) -> Reply> ScriptedLink<F> {
    fn new(reply: F) -> (Self, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sent: Arc::clone(&sent),
                reply,
            },
            sent,
        )
    }
}

impl<F: FnMut(usize) -> Reply> Link for ScriptedLink<F> {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.sent.lock().unwrap().push(line.to_owned());
        Ok(())
    }

    fn read_ack(&mut self, _timeout: Duration) -> io::Result<Option<String>> {
        let count = self.sent.lock().unwrap().len();
        match (self.reply)(count) {
            Reply::Line(text) => Ok(Some(text.to_owned())),
            Reply::Silence => Ok(None),
            Reply::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn fast_config() -> StreamConfig {
    StreamConfig {
        settle_delay: Duration::ZERO,
        ack_timeout: Duration::from_millis(50),
        ..StreamConfig::default()
    }
}

fn program() -> String {
    compile_svg(TWO_PATHS, &CompileOptions::default())
        .unwrap()
        .to_gcode()
}

fn progress_events(events: &StreamEvents) -> Vec<Progress> {
    events.progress.try_iter().collect()
}

#[test]
fn silent_device_times_out_after_first_command() {
    let (link, sent) = ScriptedLink::new(|_: usize| Reply::Silence);
    let (mut observer, events) = ChannelObserver::new();
    let program = program();

    let outcome = stream(link, &program, &fast_config(), &mut observer);

    assert_eq!(
        outcome,
        SessionOutcome::TimedOut {
            timeout: Duration::from_millis(50),
            line: 1,
            acknowledged: 0,
        }
    );
    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(
        events.started.try_recv().unwrap(),
        executable_lines(&program).len()
    );
    assert!(progress_events(&events).is_empty());
    assert_eq!(
        events.timeout.try_iter().collect::<Vec<_>>(),
        vec!["Connection timed out after 0.05 seconds".to_owned()]
    );
    assert_eq!(events.stopped.try_iter().collect::<Vec<_>>(), vec![outcome]);
}

#[test]
fn every_acknowledged_command_reports_progress() {
    let (link, sent) = ScriptedLink::new(|_: usize| Reply::Line("ok"));
    let (mut observer, events) = ChannelObserver::new();
    let program = program();
    let total = executable_lines(&program).len();

    let outcome = stream(link, &program, &fast_config(), &mut observer);

    assert_eq!(outcome, SessionOutcome::Completed { acknowledged: total });
    assert_eq!(*sent.lock().unwrap(), executable_lines(&program));

    let progress = progress_events(&events);
    assert_eq!(progress.len(), total);
    assert!(progress.windows(2).all(|w| w[0].acknowledged < w[1].acknowledged));
    let last = progress.last().unwrap();
    assert_eq!(last.acknowledged, total);
    assert!((last.percent() - 100.0).abs() < 1e-9);

    assert!(events.timeout.try_recv().is_err());
    assert_eq!(events.stopped.try_iter().count(), 1);
}

#[test]
fn comments_and_blank_lines_are_never_sent() {
    let (link, sent) = ScriptedLink::new(|_: usize| Reply::Line("ok"));
    let (mut observer, events) = ChannelObserver::new();

    let outcome = stream(
        link,
        "; header only\n\nG21 ; mm\n   ;\nG0 X1 Y1\n",
        &fast_config(),
        &mut observer,
    );

    assert_eq!(outcome, SessionOutcome::Completed { acknowledged: 2 });
    assert_eq!(*sent.lock().unwrap(), vec!["G21", "G0 X1 Y1"]);
    assert_eq!(events.started.try_recv().unwrap(), 2);
}

#[test]
fn controller_errors_still_count_as_acknowledgements() {
    let (link, _sent) = ScriptedLink::new(|n: usize| {
        if n == 2 {
            Reply::Line("error:20")
        } else {
            Reply::Line("ok")
        }
    });
    let (mut observer, events) = ChannelObserver::new();

    let outcome = stream(link, "G21\nG5\nG90\n", &fast_config(), &mut observer);

    assert_eq!(outcome, SessionOutcome::Completed { acknowledged: 3 });
    assert_eq!(progress_events(&events).len(), 3);
}

#[test]
fn link_failure_ends_session_once() {
    let (link, sent) = ScriptedLink::new(|n: usize| {
        if n < 2 { Reply::Line("ok") } else { Reply::Fail }
    });
    let (mut observer, events) = ChannelObserver::new();

    let outcome = stream(link, "G21\nG90\nG0 X1\nG0 X2\n", &fast_config(), &mut observer);

    assert!(matches!(outcome, SessionOutcome::Failed { .. }));
    assert_eq!(sent.lock().unwrap().len(), 2);
    assert_eq!(progress_events(&events).len(), 1);
    assert!(events.timeout.try_recv().is_err());
    assert_eq!(events.stopped.try_iter().count(), 1);
}

#[test]
fn park_on_timeout_retracts_and_homes() {
    let (link, sent) = ScriptedLink::new(|n: usize| {
        if n == 1 { Reply::Line("ok") } else { Reply::Silence }
    });
    let (mut observer, _events) = ChannelObserver::new();
    let config = StreamConfig {
        park_on_timeout: true,
        ..fast_config()
    };

    let outcome = stream(
        link,
        "G0 X1\nG1 X2\nG0 Z5\nG0 X0 Y0\nG0 Z0\n",
        &config,
        &mut observer,
    );

    assert!(matches!(
        outcome,
        SessionOutcome::TimedOut {
            line: 2,
            acknowledged: 1,
            ..
        }
    ));
    assert_eq!(
        *sent.lock().unwrap(),
        vec!["G0 X1", "G1 X2", "G90", "G0 Z5", "G0 X0 Y0"]
    );
}

#[test]
fn park_never_replays_cutting_moves() {
    // The program ends mid-cut, with the tool down; parking must lift it
    // instead of repeating the last feeds.
    let (link, sent) = ScriptedLink::new(|_: usize| Reply::Silence);
    let (mut observer, _events) = ChannelObserver::new();
    let config = StreamConfig {
        park_on_timeout: true,
        park_clearance: 8.0,
        ..fast_config()
    };

    let outcome = stream(
        link,
        "G0 X1 Y1\nG1 Z-5 F1000\nG1 X2 Y2\nG1 X3 Y3\nG1 X4 Y4\n",
        &config,
        &mut observer,
    );

    assert!(matches!(outcome, SessionOutcome::TimedOut { line: 1, .. }));
    let sent = sent.lock().unwrap();
    assert_eq!(*sent, vec!["G0 X1 Y1", "G90", "G0 Z8", "G0 X0 Y0"]);
    assert!(sent.iter().all(|line| !line.starts_with("G1")));
}

fn dispatcher_config(dir: &std::path::Path) -> PlotConfig {
    PlotConfig {
        pipeline: PipelineConfig {
            extract: ExtractConfig {
                output: Dimensions::new(160, 120),
                ..ExtractConfig::default()
            },
            ..PipelineConfig::default()
        },
        stream: fast_config(),
        artifact_dir: dir.to_path_buf(),
        ..PlotConfig::default()
    }
}

/// A page on a dark desk with a dark diagonal stroke on it.
fn scene() -> RgbImage {
    let mut img = RgbImage::from_pixel(240, 180, Rgb([25, 25, 25]));
    for y in 30..150 {
        for x in 40..200 {
            img.put_pixel(x, y, Rgb([235, 235, 235]));
        }
    }
    for i in 0..80 {
        for t in 0..4 {
            img.put_pixel(80 + i, 60 + i / 2 + t, Rgb([30, 30, 30]));
        }
    }
    img
}

#[test]
fn dispatcher_compiles_frame_then_streams_it() {
    let dir = tempfile::TempDir::new().unwrap();
    let slot = Arc::new(FrameSlot::new());
    slot.publish(scene());
    let dispatcher = Dispatcher::new(&dispatcher_config(dir.path()), Arc::clone(&slot));

    let report = dispatcher.submit_compile().unwrap().join().unwrap().unwrap();
    assert_eq!(report.document_found, Some(true));
    assert!(report.paths > 0);
    assert!(report.svg_path.exists());
    let gcode = std::fs::read_to_string(&report.gcode_path).unwrap();
    let total = executable_lines(&gcode).len();

    let (link, sent) = ScriptedLink::new(|_: usize| Reply::Line("ok"));
    let (observer, events) = ChannelObserver::new();
    let outcome = dispatcher
        .submit_stream_with(move |_| Ok(link), observer)
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Completed { acknowledged: total });
    assert_eq!(sent.lock().unwrap().len(), total);
    assert_eq!(events.stopped.try_iter().count(), 1);
}

#[test]
fn unwritable_toolpath_keeps_previous_svg() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = ArtifactStore::new(dir.path());
    store.write_svg("<svg/>").unwrap();
    // A directory in the toolpath's place makes the final rename fail.
    std::fs::create_dir_all(store.gcode_path().join("blocker")).unwrap();

    let config = dispatcher_config(dir.path());
    let result = compile_frame(&scene(), &config.pipeline, &config.compile, &store);

    assert!(matches!(result, Err(JobError::Artifact(_))));
    assert_eq!(store.read_svg().unwrap().as_deref(), Some("<svg/>"));
}

#[test]
fn second_stream_is_rejected_while_first_runs() {
    let dir = tempfile::TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(&dispatcher_config(dir.path()), Arc::new(FrameSlot::new()));
    dispatcher.store().write_gcode(&program()).unwrap();

    // The first session blocks on its first acknowledgement until the
    // gate is dropped.
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let (link, _sent) = ScriptedLink::new(move |_: usize| {
        let _ = gate_rx.recv();
        Reply::Line("ok")
    });
    let (observer, events) = ChannelObserver::new();
    let first = dispatcher
        .submit_stream_with(move |_| Ok(link), observer)
        .unwrap();
    assert!(dispatcher.is_busy(Lane::Stream));

    let (other, _) = ChannelObserver::new();
    assert!(matches!(
        dispatcher.submit_stream_with(
            |_| Ok(ScriptedLink::new(|_: usize| Reply::Line("ok")).0),
            other
        ),
        Err(DispatchError::Busy(Lane::Stream))
    ));

    // Compiling while streaming is allowed.
    let compile = dispatcher.submit_compile().unwrap().join().unwrap();
    assert!(matches!(compile, Err(JobError::NoFrame)));

    drop(gate_tx);
    let outcome = first.join().unwrap();
    assert!(matches!(outcome, SessionOutcome::Completed { .. }));
    assert_eq!(events.started.try_iter().count(), 1);
    assert!(!dispatcher.is_busy(Lane::Stream));
}

#[test]
fn failed_open_reports_failure_without_starting() {
    let dir = tempfile::TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(&dispatcher_config(dir.path()), Arc::new(FrameSlot::new()));
    dispatcher.store().write_gcode(&program()).unwrap();

    let (observer, events) = ChannelObserver::new();
    let outcome = dispatcher
        .submit_stream_with(
            |_| -> Result<ScriptedLink<fn(usize) -> Reply>, StreamError> {
                Err(StreamError::Open {
                    port: "/dev/ttyPLOT".to_owned(),
                    source: serialport::Error::new(
                        serialport::ErrorKind::NoDevice,
                        "no such device",
                    ),
                })
            },
            observer,
        )
        .unwrap()
        .join()
        .unwrap();

    assert!(matches!(outcome, SessionOutcome::Failed { .. }));
    assert!(events.started.try_recv().is_err());
    assert_eq!(events.stopped.try_iter().count(), 1);
}
