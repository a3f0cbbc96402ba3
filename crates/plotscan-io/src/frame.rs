//! Latest-frame cache and frame sources.
//!
//! A capture loop publishes frames into a [`FrameSlot`]; the compile
//! lane and the preview read the most recent one. The slot holds a
//! single `Arc`, so publishing replaces the frame atomically and
//! readers keep whatever frame they already took.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;

use plotscan_pipeline::PipelineError;

/// Errors acquiring a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The source cannot currently deliver frames.
    #[error("frame source {source_name} unavailable: {reason}")]
    Unavailable {
        /// Human-readable source name.
        source_name: String,
        /// Why no frame was produced.
        reason: String,
    },

    /// A frame was read but could not be decoded.
    #[error("frame from {source_name} could not be decoded: {source}")]
    Decode {
        /// Human-readable source name.
        source_name: String,
        /// Decoder error.
        #[source]
        source: PipelineError,
    },
}

/// Something that produces camera-like frames.
pub trait FrameSource {
    /// Name used in log messages and errors.
    fn name(&self) -> &str;

    /// Capture the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if no frame could be produced.
    fn next_frame(&mut self) -> Result<RgbImage, FrameError>;
}

/// A frame source that re-reads an image file on every capture.
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    path: PathBuf,
    name: String,
}

impl ImageFileSource {
    /// Source reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }
}

impl FrameSource for ImageFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<RgbImage, FrameError> {
        let bytes = std::fs::read(&self.path).map_err(|e| FrameError::Unavailable {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })?;
        plotscan_pipeline::decode_frame(&bytes).map_err(|source| FrameError::Decode {
            source_name: self.name.clone(),
            source,
        })
    }
}

/// Single-slot cache of the most recent frame.
#[derive(Debug)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<RgbImage>>>,
    generation: AtomicU64,
    ready_tx: Sender<u64>,
    ready_rx: Receiver<u64>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    /// Empty slot.
    #[must_use]
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        Self {
            latest: Mutex::new(None),
            generation: AtomicU64::new(0),
            ready_tx,
            ready_rx,
        }
    }

    /// Replace the cached frame and return its generation number
    /// (1 for the first frame).
    pub fn publish(&self, frame: RgbImage) -> u64 {
        let frame = Arc::new(frame);
        let generation = {
            let mut slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(frame);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        if let Err(TrySendError::Full(_)) = self.ready_tx.try_send(generation) {
            tracing::trace!(generation, "frame notification already pending");
        }
        generation
    }

    /// The most recent frame, if any was published.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<RgbImage>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation of the most recent frame, 0 before the first.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Notification channel: receives a generation number when a new
    /// frame arrives. Bursts coalesce into one pending notification.
    #[must_use]
    pub fn ready(&self) -> Receiver<u64> {
        self.ready_rx.clone()
    }
}

/// Pulls frames from a source into a slot, reporting a failing source
/// once rather than on every attempt.
#[derive(Debug)]
pub struct FramePump<S> {
    source: S,
    failing: bool,
}

impl<S: FrameSource> FramePump<S> {
    /// Pump from `source`.
    pub const fn new(source: S) -> Self {
        Self {
            source,
            failing: false,
        }
    }

    /// Capture one frame into `slot`.
    ///
    /// # Errors
    ///
    /// Returns the source's [`FrameError`]. The first error after a
    /// success is logged at `warn`; repeats are logged at `debug`.
    pub fn pump(&mut self, slot: &FrameSlot) -> Result<u64, FrameError> {
        match self.source.next_frame() {
            Ok(frame) => {
                if self.failing {
                    tracing::info!(source = self.source.name(), "frame source recovered");
                }
                self.failing = false;
                Ok(slot.publish(frame))
            }
            Err(e) => {
                if self.failing {
                    tracing::debug!(source = self.source.name(), error = %e, "frame source still failing");
                } else {
                    tracing::warn!(source = self.source.name(), error = %e, "frame source failed");
                }
                self.failing = true;
                Err(e)
            }
        }
    }

    /// Whether the last capture failed.
    #[must_use]
    pub const fn is_failing(&self) -> bool {
        self.failing
    }
}
