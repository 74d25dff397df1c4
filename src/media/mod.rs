//! Media collaborators driven by the playback thread.
//!
//! The driver only sees these traits: a frame source paced at its native
//! rate, an audio sink with volume and pause, and a display surface that
//! shows frames and yields key presses. Everything opened through a
//! [`MediaOpener`] lives and dies on the driver thread, so none of the
//! traits require `Send`.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::time::Time;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod headless;
pub mod synthetic;

pub use headless::HeadlessDisplay;
pub use synthetic::{SilentSink, SyntheticOpener, SyntheticSource};

/// Key code as reported by the display, already masked to one byte.
pub type KeyCode = u8;

/// Error type for media collaborators
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Cannot open {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Audio output error: {0}")]
    AudioOutput(String),
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl MediaError {
    pub fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MediaError::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Decoded video frame (RGBA8)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Time,
}

/// Decoded audio (interleaved PCM f32)
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Time,
}

/// Result of asking the source for its next frame.
#[derive(Debug)]
pub enum FramePull {
    /// A frame and the source's own position after decoding it.
    Frame { frame: VideoFrame, position: u64 },
    EndOfStream,
}

/// Result of asking the sink for its next decoded chunk.
#[derive(Debug)]
pub enum AudioPull {
    Chunk(AudioChunk),
    /// Nothing decoded this time round. Not an error.
    NotReady,
    EndOfStream,
}

/// Video frames at their native pace.
pub trait FrameSource {
    fn total_frame_count(&self) -> u64;

    /// Wall-clock time one frame stays on screen.
    fn native_frame_interval(&self) -> Duration;

    /// Pull the next frame. May block for up to one frame's worth of decode.
    fn pull_next_frame(&mut self) -> Result<FramePull, MediaError>;

    /// Reposition so the next pulled frame is at (or just before) `frame_index`.
    fn seek(&mut self, _frame_index: u64) -> Result<(), MediaError> {
        Err(MediaError::Unsupported("frame seek"))
    }

    fn close(&mut self);
}

/// Keep pulling from `next` until `full` reports the output queue is full or
/// `budget` pulls are spent. Returns the last chunk decoded, or whatever the
/// first non-chunk pull said when nothing was decoded.
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
pub(crate) fn fill_until_full<T>(
    target: &mut T,
    budget: usize,
    mut next: impl FnMut(&mut T) -> Result<AudioPull, MediaError>,
    full: impl Fn(&T) -> bool,
) -> Result<AudioPull, MediaError> {
    let mut last = None;
    for _ in 0..budget {
        if full(target) {
            break;
        }
        match next(target)? {
            AudioPull::Chunk(chunk) => last = Some(chunk),
            other => return Ok(last.map_or(other, AudioPull::Chunk)),
        }
    }
    Ok(last.map_or(AudioPull::NotReady, AudioPull::Chunk))
}

/// Audio playback with volume control.
pub trait AudioSink {
    fn volume(&self) -> f32;

    /// Set output volume; implementations clamp into `[0.0, 1.0]`.
    fn set_volume(&mut self, volume: f32);

    fn set_paused(&mut self, paused: bool);

    /// Decode and queue whatever is ready, without blocking.
    fn pull_decoded_chunk(&mut self) -> Result<AudioPull, MediaError>;

    fn seek(&mut self, _seconds: f64) -> Result<(), MediaError> {
        Err(MediaError::Unsupported("audio seek"))
    }

    fn close(&mut self);
}

/// Where frames are shown and keys come from.
pub trait DisplaySurface {
    fn show(&mut self, frame: &VideoFrame);

    /// Wait up to `timeout` for a key press. Must not return early without a
    /// key, since the driver uses this wait to pace playback. When several
    /// presses are pending, return the newest and discard the rest.
    fn poll_key(&mut self, timeout: Duration) -> Option<KeyCode>;

    fn close(&mut self);
}

/// Everything the driver owns once the media is open.
pub struct OpenedMedia<S, A, D> {
    pub source: S,
    pub sink: A,
    pub display: D,
}

impl<S: FrameSource, A: AudioSink, D: DisplaySurface> OpenedMedia<S, A, D> {
    /// Release source, sink and display. Consuming `self` makes this a
    /// one-shot operation.
    pub fn release(mut self) {
        self.sink.close();
        self.source.close();
        self.display.close();
    }
}

/// Opens the media on the driver thread.
pub trait MediaOpener: Send + 'static {
    type Source: FrameSource;
    type Sink: AudioSink;
    type Display: DisplaySurface;

    /// Open source, sink and display. On failure, anything already opened is
    /// closed before returning.
    fn open(self) -> Result<OpenedMedia<Self::Source, Self::Sink, Self::Display>, MediaError>;
}
