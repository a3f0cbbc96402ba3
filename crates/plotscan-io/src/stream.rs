//! Streaming a toolpath to a machine over a serial link.
//!
//! The protocol is acknowledge-per-line: send one command terminated by
//! `\n`, wait for one response line, repeat. A response that does not
//! arrive within the acknowledgement timeout ends the session; nothing
//! is retried and nothing is resumed.
//!
//! Transport is abstracted by [`Link`] so sessions can run against a
//! real serial port ([`SerialLink`]) or an in-memory script in tests.
//! Session events go to a [`StreamObserver`]; [`ChannelObserver`]
//! forwards them onto channels for another thread to consume.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort};

/// Errors that stop a session before it starts.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The serial port could not be opened.
    #[error("could not open serial port {port}: {source}")]
    Open {
        /// Port name.
        port: String,
        /// Driver error.
        #[source]
        source: serialport::Error,
    },

    /// Serial ports could not be enumerated.
    #[error("could not list serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
}

/// Line-oriented, acknowledged transport.
pub trait Link {
    /// Write `line` followed by `\n`.
    ///
    /// # Errors
    ///
    /// Returns the transport's I/O error.
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Wait up to `timeout` for one complete response line.
    ///
    /// Returns `Ok(None)` if no full line arrived in time. The returned
    /// line has its terminator and surrounding whitespace removed.
    ///
    /// # Errors
    ///
    /// Returns the transport's I/O error.
    fn read_ack(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Drop any input received so far.
    ///
    /// # Errors
    ///
    /// Returns the transport's I/O error.
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Session parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Pause after opening the link, letting the controller reset.
    #[serde(with = "millis")]
    pub settle_delay: Duration,
    /// Longest wait for one acknowledgement.
    #[serde(with = "millis")]
    pub ack_timeout: Duration,
    /// After a timeout, retract to `park_clearance` and return to the
    /// origin without waiting for acknowledgements.
    pub park_on_timeout: bool,
    /// Absolute Z height (mm) the tool retracts to when parking.
    pub park_clearance: f64,
}

impl StreamConfig {
    /// Default baud rate.
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;
    /// Default settle delay.
    pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);
    /// Default acknowledgement timeout.
    pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(180);
    /// Default park clearance height (mm).
    pub const DEFAULT_PARK_CLEARANCE: f64 = 5.0;

    /// Commands written after a timeout when parking is enabled:
    /// absolute mode, retract, then rapid to the origin.
    #[must_use]
    pub fn park_commands(&self) -> [String; 3] {
        [
            "G90".to_owned(),
            format!("G0 Z{}", self.park_clearance),
            "G0 X0 Y0".to_owned(),
        ]
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            baud_rate: Self::DEFAULT_BAUD_RATE,
            settle_delay: Self::DEFAULT_SETTLE_DELAY,
            ack_timeout: Self::DEFAULT_ACK_TIMEOUT,
            park_on_timeout: false,
            park_clearance: Self::DEFAULT_PARK_CLEARANCE,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Acknowledgement progress after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Commands acknowledged so far.
    pub acknowledged: usize,
    /// Executable commands in the program.
    pub total: usize,
}

impl Progress {
    /// `acknowledged / total * 100`; 100 for an empty program.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.acknowledged as f64 / self.total as f64 * 100.0
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every command was acknowledged.
    Completed {
        /// Commands sent and acknowledged.
        acknowledged: usize,
    },
    /// A command went unacknowledged for the whole timeout.
    TimedOut {
        /// The timeout that expired.
        timeout: Duration,
        /// 1-based index of the unacknowledged command.
        line: usize,
        /// Commands acknowledged before it.
        acknowledged: usize,
    },
    /// The link failed to open or failed mid-session.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl SessionOutcome {
    /// The terminal state this outcome corresponds to.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        match self {
            Self::Completed { .. } => SessionState::Completed,
            Self::TimedOut { .. } => SessionState::TimedOut,
            Self::Failed { .. } => SessionState::Failed,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { acknowledged } => {
                write!(f, "completed, {acknowledged} commands acknowledged")
            }
            Self::TimedOut { timeout, line, .. } => {
                write!(f, "{} (command {line})", timeout_message(*timeout))
            }
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Session lifecycle.
///
/// `Idle -> Started -> (Sending <-> AwaitingAck)* -> Completed | TimedOut | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet run.
    Idle,
    /// Link settled, program counted.
    Started,
    /// Writing a command.
    Sending,
    /// Waiting for the command's acknowledgement.
    AwaitingAck,
    /// Terminal: all commands acknowledged.
    Completed,
    /// Terminal: an acknowledgement timed out.
    TimedOut,
    /// Terminal: the link failed.
    Failed,
}

impl SessionState {
    /// Whether no further transitions happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Failed)
    }
}

/// Receives session events.
///
/// For one session: at most one `started`, then progress updates in
/// strictly increasing order, at most one `connection_timeout`, and
/// exactly one `stopped`, always last.
pub trait StreamObserver {
    /// The session began; `total` executable commands will be sent.
    fn started(&mut self, total: usize) {
        let _ = total;
    }

    /// A command was acknowledged.
    fn progress(&mut self, progress: Progress) {
        let _ = progress;
    }

    /// An acknowledgement timed out; `message` is human-readable.
    fn connection_timeout(&mut self, message: &str) {
        let _ = message;
    }

    /// The session ended.
    fn stopped(&mut self, outcome: &SessionOutcome);
}

/// Forwards each event kind onto its own channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    started: Sender<usize>,
    progress: Sender<Progress>,
    timeout: Sender<String>,
    stopped: Sender<SessionOutcome>,
}

/// Receiving ends of a [`ChannelObserver`].
#[derive(Debug, Clone)]
pub struct StreamEvents {
    /// Session started, with the command total.
    pub started: Receiver<usize>,
    /// Progress after each acknowledgement.
    pub progress: Receiver<Progress>,
    /// Timeout messages.
    pub timeout: Receiver<String>,
    /// Terminal outcome.
    pub stopped: Receiver<SessionOutcome>,
}

impl ChannelObserver {
    /// Create an observer and the receivers for its events.
    #[must_use]
    pub fn new() -> (Self, StreamEvents) {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (progress_tx, progress_rx) = crossbeam_channel::unbounded();
        let (timeout_tx, timeout_rx) = crossbeam_channel::unbounded();
        let (stopped_tx, stopped_rx) = crossbeam_channel::unbounded();
        (
            Self {
                started: started_tx,
                progress: progress_tx,
                timeout: timeout_tx,
                stopped: stopped_tx,
            },
            StreamEvents {
                started: started_rx,
                progress: progress_rx,
                timeout: timeout_rx,
                stopped: stopped_rx,
            },
        )
    }
}

// Sends fail only when the receiver was dropped; nobody is listening then.
impl StreamObserver for ChannelObserver {
    fn started(&mut self, total: usize) {
        let _ = self.started.send(total);
    }

    fn progress(&mut self, progress: Progress) {
        let _ = self.progress.send(progress);
    }

    fn connection_timeout(&mut self, message: &str) {
        let _ = self.timeout.send(message.to_owned());
    }

    fn stopped(&mut self, outcome: &SessionOutcome) {
        let _ = self.stopped.send(outcome.clone());
    }
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl StreamObserver for LogObserver {
    fn started(&mut self, total: usize) {
        tracing::info!(total, "streaming started");
    }

    fn progress(&mut self, progress: Progress) {
        tracing::info!(
            acknowledged = progress.acknowledged,
            total = progress.total,
            "progress {:.1}%",
            progress.percent()
        );
    }

    fn connection_timeout(&mut self, message: &str) {
        tracing::error!("{message}");
    }

    fn stopped(&mut self, outcome: &SessionOutcome) {
        tracing::info!(%outcome, "streaming stopped");
    }
}

/// Kind of response line from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// `ok`
    Ok,
    /// `error:...`
    Error(String),
    /// `ALARM:...`
    Alarm(String),
    /// Anything else, still counted as an acknowledgement.
    Other(String),
}

impl Ack {
    /// Classify a response line (case-insensitive prefix match).
    #[must_use]
    pub fn classify(line: &str) -> Self {
        let lower = line.to_ascii_lowercase();
        if lower == "ok" {
            Self::Ok
        } else if lower.starts_with("error") {
            Self::Error(line.to_owned())
        } else if lower.starts_with("alarm") {
            Self::Alarm(line.to_owned())
        } else {
            Self::Other(line.to_owned())
        }
    }
}

/// The lines of `program` that are sent: text after the first `;` is
/// dropped, whitespace trimmed, empty lines skipped.
#[must_use]
pub fn executable_lines(program: &str) -> Vec<&str> {
    program
        .lines()
        .map(|line| line.split(';').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Human-readable timeout message.
#[must_use]
pub fn timeout_message(timeout: Duration) -> String {
    format!(
        "Connection timed out after {} seconds",
        timeout.as_secs_f64()
    )
}

/// One streaming attempt over an open link.
#[derive(Debug)]
pub struct Session<L> {
    link: L,
    config: StreamConfig,
    state: SessionState,
}

impl<L: Link> Session<L> {
    /// Prepare a session; nothing is sent until [`run`](Self::run).
    pub const fn new(link: L, config: StreamConfig) -> Self {
        Self {
            link,
            config,
            state: SessionState::Idle,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Stream `program` and report to `observer`.
    ///
    /// Waits the settle delay, discards stale input, then sends each
    /// executable line and waits for its acknowledgement. Emits one
    /// progress event per acknowledged command and exactly one
    /// `stopped` event at the end.
    pub fn run(&mut self, program: &str, observer: &mut dyn StreamObserver) -> SessionOutcome {
        let outcome = self.drive(program, observer);
        self.transition(outcome.state());
        observer.stopped(&outcome);
        outcome
    }

    fn drive(&mut self, program: &str, observer: &mut dyn StreamObserver) -> SessionOutcome {
        if !self.config.settle_delay.is_zero() {
            std::thread::sleep(self.config.settle_delay);
        }
        if let Err(e) = self.link.discard_input() {
            return fail("discarding stale input", &e);
        }

        let lines = executable_lines(program);
        let total = lines.len();
        self.transition(SessionState::Started);
        observer.started(total);

        for (index, line) in lines.iter().enumerate() {
            self.transition(SessionState::Sending);
            tracing::debug!(line = index + 1, command = line, "send");
            if let Err(e) = self.link.send_line(line) {
                return fail("sending", &e);
            }

            self.transition(SessionState::AwaitingAck);
            let response = match self.link.read_ack(self.config.ack_timeout) {
                Ok(Some(response)) => response,
                Ok(None) => {
                    let message = timeout_message(self.config.ack_timeout);
                    tracing::error!(line = index + 1, command = line, "{message}");
                    observer.connection_timeout(&message);
                    if self.config.park_on_timeout {
                        self.park();
                    }
                    return SessionOutcome::TimedOut {
                        timeout: self.config.ack_timeout,
                        line: index + 1,
                        acknowledged: index,
                    };
                }
                Err(e) => return fail("waiting for acknowledgement", &e),
            };

            match Ack::classify(&response) {
                Ack::Ok => tracing::trace!(line = index + 1, "ok"),
                Ack::Error(text) => {
                    tracing::warn!(line = index + 1, command = line, response = %text, "controller reported error");
                }
                Ack::Alarm(text) => {
                    tracing::warn!(line = index + 1, command = line, response = %text, "controller reported alarm");
                }
                Ack::Other(text) => {
                    tracing::debug!(line = index + 1, response = %text, "unrecognised acknowledgement");
                }
            }

            observer.progress(Progress {
                acknowledged: index + 1,
                total,
            });
        }

        SessionOutcome::Completed {
            acknowledged: total,
        }
    }

    /// Best-effort, unacknowledged retract and return to the origin.
    fn park(&mut self) {
        for command in &self.config.park_commands() {
            if let Err(e) = self.link.send_line(command) {
                tracing::warn!(command = %command, error = %e, "park command not sent");
                return;
            }
        }
        tracing::info!(clearance = self.config.park_clearance, "parked after timeout");
    }
}

fn fail(action: &str, error: &io::Error) -> SessionOutcome {
    tracing::error!(%error, "serial link failed while {action}");
    SessionOutcome::Failed {
        reason: format!("{action}: {error}"),
    }
}

/// Stream `program` over an already-open link.
pub fn stream<L: Link>(
    link: L,
    program: &str,
    config: &StreamConfig,
    observer: &mut dyn StreamObserver,
) -> SessionOutcome {
    Session::new(link, config.clone()).run(program, observer)
}

/// Open `port`, stream `program`, and release the port.
///
/// An open failure is reported as a `stopped(Failed)` event without a
/// preceding `started`.
pub fn stream_to_port(
    port: &str,
    program: &str,
    config: &StreamConfig,
    observer: &mut dyn StreamObserver,
) -> SessionOutcome {
    match SerialLink::open(port, config) {
        Ok(link) => stream(link, program, config, observer),
        Err(e) => {
            tracing::error!(error = %e, "serial session not started");
            let outcome = SessionOutcome::Failed {
                reason: e.to_string(),
            };
            observer.stopped(&outcome);
            outcome
        }
    }
}

/// Names of the serial ports the platform reports.
///
/// # Errors
///
/// Returns [`StreamError::Enumerate`] if enumeration fails.
pub fn list_ports() -> Result<Vec<String>, StreamError> {
    let ports = serialport::available_ports().map_err(StreamError::Enumerate)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Poll interval for reads; bounds how far a read overshoots its deadline.
const READ_POLL: Duration = Duration::from_millis(100);

/// A [`Link`] over a serial port.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port.name())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SerialLink {
    /// Open `port` at the configured baud rate.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Open`] if the port cannot be opened.
    pub fn open(port: &str, config: &StreamConfig) -> Result<Self, StreamError> {
        let handle = serialport::new(port, config.baud_rate)
            .timeout(READ_POLL)
            .open()
            .map_err(|source| StreamError::Open {
                port: port.to_owned(),
                source,
            })?;
        tracing::info!(port, baud = config.baud_rate, "serial port opened");
        Ok(Self::new(handle))
    }

    fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            pending: Vec::new(),
        }
    }

    /// Take one complete line out of the pending buffer.
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_owned())
    }
}

impl Link for SerialLink {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn read_ack(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0_u8; 256];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.port.set_timeout(remaining.min(READ_POLL))?;
            match self.port.read(&mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
