//! Deterministic in-memory media for tests and `--synthetic` runs.
//!
//! The source yields solid-color frames at a fixed interval; the sink
//! produces silence. Both report into a shared [`MediaProbe`] so callers can
//! check what the driver did with them from another thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::time;
use crate::media::{
    AudioChunk, AudioPull, AudioSink, FramePull, FrameSource, HeadlessDisplay, MediaError,
    MediaOpener, OpenedMedia, VideoFrame,
};

const FRAME_WIDTH: u32 = 16;
const FRAME_HEIGHT: u32 = 9;
const SAMPLE_RATE: u32 = 48_000;

/// Counters shared between synthetic media and whoever inspects it.
#[derive(Debug, Default)]
pub struct MediaProbe {
    frames_pulled: AtomicUsize,
    chunks_pulled: AtomicUsize,
    source_closes: AtomicUsize,
    sink_closes: AtomicUsize,
    seeks: Mutex<Vec<u64>>,
    volumes: Mutex<Vec<f32>>,
    paused: Mutex<Vec<bool>>,
}

impl MediaProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames_pulled(&self) -> usize {
        self.frames_pulled.load(Ordering::SeqCst)
    }

    pub fn chunks_pulled(&self) -> usize {
        self.chunks_pulled.load(Ordering::SeqCst)
    }

    pub fn source_closes(&self) -> usize {
        self.source_closes.load(Ordering::SeqCst)
    }

    pub fn sink_closes(&self) -> usize {
        self.sink_closes.load(Ordering::SeqCst)
    }

    /// Every frame index the source was asked to seek to.
    pub fn seeks(&self) -> Vec<u64> {
        self.seeks.lock().clone()
    }

    /// Every volume the sink was set to, in order.
    pub fn volumes(&self) -> Vec<f32> {
        self.volumes.lock().clone()
    }

    /// Every pause state the sink was put into, in order.
    pub fn pause_changes(&self) -> Vec<bool> {
        self.paused.lock().clone()
    }
}

/// Fixed-length source of solid frames.
pub struct SyntheticSource {
    total_frames: u64,
    interval: Duration,
    next_index: u64,
    probe: Arc<MediaProbe>,
}

impl SyntheticSource {
    pub fn new(total_frames: u64, interval: Duration, probe: Arc<MediaProbe>) -> Self {
        Self {
            total_frames,
            interval,
            next_index: 0,
            probe,
        }
    }

    fn fps(&self) -> f64 {
        1.0 / self.interval.as_secs_f64().max(f64::EPSILON)
    }

    fn render(&self, index: u64) -> VideoFrame {
        let shade = (index % 256) as u8;
        let pixels = (FRAME_WIDTH * FRAME_HEIGHT) as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&[shade, shade, shade, 255]);
        }
        VideoFrame {
            data,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            timestamp: time::from_frame_index(index, self.fps()),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn total_frame_count(&self) -> u64 {
        self.total_frames
    }

    fn native_frame_interval(&self) -> Duration {
        self.interval
    }

    fn pull_next_frame(&mut self) -> Result<FramePull, MediaError> {
        if self.next_index >= self.total_frames {
            return Ok(FramePull::EndOfStream);
        }
        let index = self.next_index;
        let frame = self.render(index);
        self.next_index += 1;
        self.probe.frames_pulled.fetch_add(1, Ordering::SeqCst);
        Ok(FramePull::Frame {
            frame,
            position: index,
        })
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), MediaError> {
        self.next_index = frame_index.min(self.total_frames);
        self.probe.seeks.lock().push(frame_index);
        Ok(())
    }

    fn close(&mut self) {
        self.probe.source_closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that decodes silence in step with the source.
pub struct SilentSink {
    volume: f32,
    paused: bool,
    chunk_samples: usize,
    remaining_chunks: u64,
    timestamp: time::Time,
    probe: Arc<MediaProbe>,
}

impl SilentSink {
    /// `chunks` is how many chunks decode before end of stream.
    pub fn new(chunks: u64, chunk_duration: Duration, probe: Arc<MediaProbe>) -> Self {
        let chunk_samples =
            ((SAMPLE_RATE as f64 * chunk_duration.as_secs_f64()).round() as usize).max(1);
        Self {
            volume: 1.0,
            paused: false,
            chunk_samples,
            remaining_chunks: chunks,
            timestamp: 0,
            probe,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl AudioSink for SilentSink {
    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.probe.volumes.lock().push(self.volume);
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.probe.paused.lock().push(paused);
    }

    fn pull_decoded_chunk(&mut self) -> Result<AudioPull, MediaError> {
        if self.paused {
            return Ok(AudioPull::NotReady);
        }
        if self.remaining_chunks == 0 {
            return Ok(AudioPull::EndOfStream);
        }
        self.remaining_chunks -= 1;
        self.probe.chunks_pulled.fetch_add(1, Ordering::SeqCst);

        let chunk = AudioChunk {
            data: vec![0.0; self.chunk_samples * 2],
            sample_rate: SAMPLE_RATE,
            channels: 2,
            timestamp: self.timestamp,
        };
        self.timestamp += time::from_seconds(self.chunk_samples as f64 / SAMPLE_RATE as f64);
        Ok(AudioPull::Chunk(chunk))
    }

    fn seek(&mut self, seconds: f64) -> Result<(), MediaError> {
        self.timestamp = time::from_seconds(seconds.max(0.0));
        Ok(())
    }

    fn close(&mut self) {
        self.probe.sink_closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens a synthetic source and sink onto a caller-supplied display.
pub struct SyntheticOpener {
    total_frames: u64,
    interval: Duration,
    display: HeadlessDisplay,
    probe: Arc<MediaProbe>,
}

impl SyntheticOpener {
    pub fn new(total_frames: u64, interval: Duration, display: HeadlessDisplay) -> Self {
        Self {
            total_frames,
            interval,
            display,
            probe: MediaProbe::new(),
        }
    }

    pub fn probe(&self) -> Arc<MediaProbe> {
        Arc::clone(&self.probe)
    }
}

impl MediaOpener for SyntheticOpener {
    type Source = SyntheticSource;
    type Sink = SilentSink;
    type Display = HeadlessDisplay;

    fn open(self) -> Result<OpenedMedia<SyntheticSource, SilentSink, HeadlessDisplay>, MediaError> {
        tracing::info!(
            "Opening synthetic media: {} frames at {:?}",
            self.total_frames,
            self.interval
        );
        Ok(OpenedMedia {
            source: SyntheticSource::new(self.total_frames, self.interval, Arc::clone(&self.probe)),
            sink: SilentSink::new(self.total_frames, self.interval, Arc::clone(&self.probe)),
            display: self.display,
        })
    }
}
