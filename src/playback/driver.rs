//! Playback driver: the loop that owns the media on its own thread.
//!
//! Each iteration either advances one frame and then checks for one pending
//! key, or, while paused, re-shows the cached frame and checks for one key
//! at the shorter pause interval. Keys are not queued: the display hands over
//! only the newest pending press, and one command is handled per iteration.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;

use crate::core::clock::PlaybackClock;
use crate::core::time;
use crate::media::{
    AudioPull, AudioSink, DisplaySurface, FramePull, FrameSource, MediaOpener, OpenedMedia,
    VideoFrame,
};
use crate::playback::command::Command;
use crate::playback::state::{DriverState, StopReason};

/// Tunables for the driver loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub initial_volume: f32,
    pub volume_step: f32,
    /// Key poll interval while paused.
    pub pause_poll: Duration,
    /// Bind a/d to seeking.
    pub seek_keys: bool,
    pub seek_seconds: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            initial_volume: 0.3,
            volume_step: 0.1,
            pause_poll: Duration::from_millis(10),
            seek_keys: false,
            seek_seconds: 1.0,
        }
    }
}

/// Progress notifications sent to whoever started the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Opened {
        total_frames: u64,
        frame_interval: Duration,
    },
    StateChanged(DriverState),
    Stopped(StopReason),
}

/// Summary returned when the driver loop ends.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverReport {
    pub reason: StopReason,
    pub frames_shown: u64,
    pub final_index: u64,
}

/// Sets quit on the clock however the driver exits, including by panic.
struct QuitOnExit(Arc<PlaybackClock>);

impl Drop for QuitOnExit {
    fn drop(&mut self) {
        self.0.request_quit();
    }
}

pub struct PlaybackDriver<O: MediaOpener> {
    opener: O,
    clock: Arc<PlaybackClock>,
    config: DriverConfig,
    events: Option<Sender<DriverEvent>>,
    state: DriverState,
    frames_shown: u64,
}

impl<O: MediaOpener> PlaybackDriver<O> {
    pub fn new(opener: O, clock: Arc<PlaybackClock>, config: DriverConfig) -> Self {
        Self {
            opener,
            clock,
            config,
            events: None,
            state: DriverState::Opening,
            frames_shown: 0,
        }
    }

    /// Report state changes on `events`. Send failures are ignored.
    pub fn with_events(mut self, events: Sender<DriverEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Open the media, play until stopped, release everything once.
    pub fn run(self) -> DriverReport {
        let PlaybackDriver {
            opener,
            clock,
            config,
            events,
            state,
            frames_shown,
        } = self;
        let _quit_guard = QuitOnExit(Arc::clone(&clock));

        let mut session = Session {
            clock,
            config,
            events,
            state,
            frames_shown,
            last_frame: None,
        };

        let mut media = match opener.open() {
            Ok(media) => media,
            Err(e) => {
                tracing::error!("Failed to open media: {}", e);
                return session.stop(StopReason::OpenFailed(e.to_string()));
            }
        };

        let total = media.source.total_frame_count();
        let interval = media.source.native_frame_interval();
        session
            .clock
            .set_total(i64::try_from(total).unwrap_or(i64::MAX));
        media.sink.set_volume(session.config.initial_volume);
        tracing::info!(
            "Media opened: {} frames, {:?} per frame, volume {:.1}",
            total,
            interval,
            media.sink.volume()
        );
        session.emit(DriverEvent::Opened {
            total_frames: total,
            frame_interval: interval,
        });
        session.transition(DriverState::Playing);

        let reason = session.play(&mut media, interval);
        media.release();
        session.stop(reason)
    }
}

struct Session {
    clock: Arc<PlaybackClock>,
    config: DriverConfig,
    events: Option<Sender<DriverEvent>>,
    state: DriverState,
    frames_shown: u64,
    /// Re-shown while paused.
    last_frame: Option<VideoFrame>,
}

impl Session {
    fn emit(&self, event: DriverEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            tracing::debug!("Driver state {:?} -> {:?}", self.state, next);
            self.state = next;
            self.emit(DriverEvent::StateChanged(next));
        }
    }

    fn stop(&mut self, reason: StopReason) -> DriverReport {
        self.clock.request_quit();
        self.transition(DriverState::Stopped);
        tracing::info!("Playback stopped: {}", reason);
        self.emit(DriverEvent::Stopped(reason.clone()));
        DriverReport {
            reason,
            frames_shown: self.frames_shown,
            final_index: self.clock.snapshot().frame_index,
        }
    }

    fn play<S, A, D>(&mut self, media: &mut OpenedMedia<S, A, D>, interval: Duration) -> StopReason
    where
        S: FrameSource,
        A: AudioSink,
        D: DisplaySurface,
    {
        loop {
            if self.clock.snapshot().quit {
                return StopReason::QuitRequested;
            }

            let paused = self.state.is_paused();
            if !paused {
                match media.source.pull_next_frame() {
                    Ok(FramePull::Frame { frame, position }) => {
                        media.display.show(&frame);
                        self.clock
                            .set_index(i64::try_from(position).unwrap_or(i64::MAX));
                        self.frames_shown += 1;
                        self.last_frame = Some(frame);
                    }
                    Ok(FramePull::EndOfStream) => return StopReason::EndOfStream,
                    Err(e) => {
                        tracing::error!("Frame source failed: {}", e);
                        return StopReason::SourceFailed(e.to_string());
                    }
                }

                match media.sink.pull_decoded_chunk() {
                    Ok(AudioPull::Chunk(chunk)) => {
                        tracing::trace!(
                            "audio chunk: {} samples at {}ns",
                            chunk.data.len(),
                            chunk.timestamp
                        );
                    }
                    Ok(AudioPull::NotReady) | Ok(AudioPull::EndOfStream) => {}
                    Err(e) => tracing::trace!("audio decode miss: {}", e),
                }
            } else if let Some(frame) = &self.last_frame {
                media.display.show(frame);
            }

            let wait = if paused { self.config.pause_poll } else { interval };
            let Some(command) = media.display.poll_key(wait).and_then(Command::from_key) else {
                continue;
            };
            if let Some(reason) = self.apply(command, media, interval) {
                return reason;
            }
        }
    }

    fn apply<S, A, D>(
        &mut self,
        command: Command,
        media: &mut OpenedMedia<S, A, D>,
        interval: Duration,
    ) -> Option<StopReason>
    where
        S: FrameSource,
        A: AudioSink,
        D: DisplaySurface,
    {
        tracing::debug!("Command: {:?}", command);
        match command {
            Command::Quit => return Some(StopReason::QuitCommand),
            Command::TogglePause => {
                let next = self.state.toggled();
                let paused = next.is_paused();
                self.clock.set_paused(paused);
                media.sink.set_paused(paused);
                self.transition(next);
            }
            Command::VolumeDown => self.nudge_volume(&mut media.sink, -self.config.volume_step),
            Command::VolumeUp => self.nudge_volume(&mut media.sink, self.config.volume_step),
            seek if seek.is_seek() && self.config.seek_keys => {
                let fps = 1.0 / interval.as_secs_f64().max(f64::EPSILON);
                let frames = time::frames_in(self.config.seek_seconds, fps);
                let delta = if seek == Command::SeekBack { -frames } else { frames };
                self.seek(media, delta, fps);
            }
            _ => {
                tracing::trace!("Seek keys disabled, ignoring {:?}", command);
            }
        }
        None
    }

    fn nudge_volume<A: AudioSink>(&self, sink: &mut A, delta: f32) {
        let volume = (sink.volume() + delta).clamp(0.0, 1.0);
        sink.set_volume(volume);
        tracing::info!("Volume: {:.1}", volume);
    }

    fn seek<S, A, D>(&mut self, media: &mut OpenedMedia<S, A, D>, delta: i64, fps: f64)
    where
        S: FrameSource,
        A: AudioSink,
        D: DisplaySurface,
    {
        let previous = self.clock.snapshot().frame_index;
        let target = self.clock.step(delta);
        if let Err(e) = media.source.seek(target) {
            tracing::warn!("Frame seek to {} failed: {}", target, e);
            self.clock
                .set_index(i64::try_from(previous).unwrap_or(i64::MAX));
            return;
        }

        let nanos = time::from_frame_index(target, fps);
        let paused = self.state.is_paused();
        media.sink.set_paused(true);
        if let Err(e) = media.sink.seek(time::to_seconds(nanos)) {
            tracing::warn!("Audio seek failed: {}", e);
        }
        media.sink.set_paused(paused);
        tracing::info!("Seek to {}", time::format_time(nanos));

        if paused {
            self.refresh_paused_frame(media);
        }
    }

    /// Decode and show the frame at the new position so the paused picture
    /// matches the clock.
    fn refresh_paused_frame<S, A, D>(&mut self, media: &mut OpenedMedia<S, A, D>)
    where
        S: FrameSource,
        A: AudioSink,
        D: DisplaySurface,
    {
        match media.source.pull_next_frame() {
            Ok(FramePull::Frame { frame, position }) => {
                media.display.show(&frame);
                self.clock
                    .set_index(i64::try_from(position).unwrap_or(i64::MAX));
                self.frames_shown += 1;
                self.last_frame = Some(frame);
            }
            Ok(FramePull::EndOfStream) => {
                tracing::debug!("Seek landed at end of stream, keeping the paused frame");
            }
            Err(e) => tracing::warn!("Frame decode after seek failed: {}", e),
        }
    }
}
