//! FFmpeg-backed media: RGBA video frames and f32 audio into cpal.
//!
//! Video and audio each get their own demuxer on the same file, so the two
//! can be pulled independently from the driver loop without buffering
//! packets for the other stream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next as ffmpeg;

use crate::audio::AudioOutput;
use crate::core::time::{self, Time};
use crate::media::{
    self, AudioChunk, AudioPull, AudioSink, DisplaySurface, FramePull, FrameSource, MediaError,
    MediaOpener, OpenedMedia, VideoFrame,
};

/// Packets fed, and chunks decoded, per audio pull.
const MAX_AUDIO_PACKETS_PER_PULL: usize = 8;

fn decode_err(context: &str, e: impl std::fmt::Display) -> MediaError {
    MediaError::Decode(format!("{}: {}", context, e))
}

fn seconds_of(ts: i64, time_base: ffmpeg::Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    ts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Stream start in its own time base. Unset (`AV_NOPTS_VALUE`, i.e.
/// `i64::MIN`) and negative starts count from zero.
fn start_pts(stream: &ffmpeg::format::stream::Stream) -> i64 {
    stream.start_time().max(0)
}

/// Seconds from the stream start to `ts`, never negative.
fn seconds_since_start(ts: i64, start: i64, time_base: ffmpeg::Rational) -> f64 {
    seconds_of(ts.saturating_sub(start), time_base).max(0.0)
}

/// Video frames converted to RGBA.
pub struct FfmpegFrameSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    time_base: ffmpeg::Rational,
    start_pts: i64,
    fps: f64,
    interval: Duration,
    total_frames: u64,
    next_position: u64,
    packets_done: bool,
    eof: bool,
}

impl FfmpegFrameSource {
    pub fn open(path: &Path, fallback_fps: f64) -> Result<Self, MediaError> {
        ffmpeg::init().map_err(|e| MediaError::open(path, format!("FFmpeg init failed: {e}")))?;
        let input = ffmpeg::format::input(&path).map_err(|e| MediaError::open(path, e))?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| MediaError::open(path, "no video stream"))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let start_pts = start_pts(&stream);

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| MediaError::open(path, format!("codec context: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| MediaError::open(path, format!("video decoder: {e}")))?;

        let reported_fps = f64::from(stream.avg_frame_rate());
        let fps = time::effective_fps(reported_fps, fallback_fps);
        let interval = time::frame_interval(reported_fps, fallback_fps);

        let total_frames = if stream.frames() > 0 {
            stream.frames() as u64
        } else if input.duration() > 0 {
            let seconds = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
            (seconds * fps).round().max(1.0) as u64
        } else {
            1
        };

        tracing::info!(
            "Video: {}x{}, {:.2} fps ({:?} per frame), {} frames",
            decoder.width(),
            decoder.height(),
            fps,
            interval,
            total_frames
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler: None,
            time_base,
            start_pts,
            fps,
            interval,
            total_frames,
            next_position: 0,
            packets_done: false,
            eof: false,
        })
    }

    fn to_rgba(&mut self, frame: &ffmpeg::frame::Video) -> Result<VideoFrame, MediaError> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        let stale = self.scaler.as_ref().map_or(true, |s| {
            let input = s.input();
            input.format != format || input.width != width || input.height != height
        });
        if stale {
            let scaler = ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::RGBA,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| decode_err("scaler", e))?;
            self.scaler = Some(scaler);
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(MediaError::Decode("scaler not initialized".into()));
        };

        let mut rgba = ffmpeg::frame::Video::empty();
        scaler.run(frame, &mut rgba).map_err(|e| decode_err("scaling", e))?;

        let stride = rgba.stride(0);
        let row_bytes = width as usize * 4;
        let plane = rgba.data(0);
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            data.extend_from_slice(&plane[start..start + row_bytes]);
        }

        let timestamp = frame
            .timestamp()
            .map(|ts| {
                time::from_seconds(seconds_since_start(ts, self.start_pts, self.time_base))
            })
            .unwrap_or_else(|| time::from_frame_index(self.next_position, self.fps));

        Ok(VideoFrame {
            data,
            width,
            height,
            timestamp,
        })
    }

    fn position_of(&self, timestamp: Time) -> u64 {
        time::to_frame_index(timestamp, self.fps).max(0) as u64
    }

    /// Feed one video packet, or signal end of input once packets run out.
    fn feed(&mut self) -> Result<(), MediaError> {
        if self.packets_done {
            return Ok(());
        }
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            return self
                .decoder
                .send_packet(&packet)
                .map_err(|e| decode_err("send packet", e));
        }
        self.packets_done = true;
        self.decoder.send_eof().map_err(|e| decode_err("send eof", e))
    }
}

impl FrameSource for FfmpegFrameSource {
    fn total_frame_count(&self) -> u64 {
        self.total_frames
    }

    fn native_frame_interval(&self) -> Duration {
        self.interval
    }

    fn pull_next_frame(&mut self) -> Result<FramePull, MediaError> {
        if self.eof {
            return Ok(FramePull::EndOfStream);
        }
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.to_rgba(&decoded)?;
                    let position = if decoded.timestamp().is_some() {
                        self.position_of(frame.timestamp)
                    } else {
                        self.next_position
                    };
                    self.next_position = position + 1;
                    tracing::trace!("Decoded frame {} at {}", position, time::format_time(frame.timestamp));
                    return Ok(FramePull::Frame { frame, position });
                }
                Err(ffmpeg::Error::Eof) => {
                    self.eof = true;
                    return Ok(FramePull::EndOfStream);
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    if self.packets_done {
                        // EAGAIN after EOF was sent means nothing more is coming
                        self.eof = true;
                        return Ok(FramePull::EndOfStream);
                    }
                    self.feed()?;
                }
                Err(e) => return Err(decode_err("decode", e)),
            }
        }
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), MediaError> {
        let seconds = frame_index as f64 / self.fps;
        let offset = seconds_of(self.start_pts, self.time_base);
        let micros = ((seconds + offset) * 1_000_000.0) as i64;
        self.input
            .seek(micros, ..micros)
            .map_err(|e| decode_err("seek", e))?;
        self.decoder.flush();
        self.next_position = frame_index;
        self.packets_done = false;
        self.eof = false;
        tracing::debug!("Video seek to frame {} ({:.3}s)", frame_index, seconds);
        Ok(())
    }

    fn close(&mut self) {
        self.scaler = None;
        self.eof = true;
        tracing::debug!("Video source closed");
    }
}

struct AudioDecode {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Audio,
    resampler: Option<ffmpeg::software::resampling::Context>,
    time_base: ffmpeg::Rational,
    start_pts: i64,
    packets_done: bool,
    eof: bool,
}

/// Audio decoded to interleaved f32 and played on the default device.
pub struct FfmpegAudioSink {
    decode: Option<AudioDecode>,
    output: AudioOutput,
    paused: bool,
}

impl FfmpegAudioSink {
    /// Open the audio stream of `path` onto the default output device. A file
    /// without audio yields a sink that is immediately at end of stream; a
    /// missing output device is an error.
    pub fn open(path: &Path, initial_volume: f32) -> Result<Self, MediaError> {
        ffmpeg::init().map_err(|e| MediaError::open(path, format!("FFmpeg init failed: {e}")))?;
        let input = ffmpeg::format::input(&path).map_err(|e| MediaError::open(path, e))?;

        let decode = match input.streams().best(ffmpeg::media::Type::Audio) {
            Some(stream) => {
                let stream_index = stream.index();
                let time_base = stream.time_base();
                let start_pts = start_pts(&stream);
                let context =
                    ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                        .map_err(|e| MediaError::open(path, format!("codec context: {e}")))?;
                let decoder = context
                    .decoder()
                    .audio()
                    .map_err(|e| MediaError::open(path, format!("audio decoder: {e}")))?;
                tracing::info!("Audio: {} Hz, {} channels", decoder.rate(), decoder.channels());
                Some(AudioDecode {
                    input,
                    stream_index,
                    decoder,
                    resampler: None,
                    time_base,
                    start_pts,
                    packets_done: false,
                    eof: false,
                })
            }
            None => {
                tracing::warn!("{} has no audio stream", path.display());
                None
            }
        };

        let output = AudioOutput::open(initial_volume)?;
        Ok(Self {
            decode,
            output,
            paused: false,
        })
    }

    fn convert(&mut self, frame: &ffmpeg::frame::Audio) -> Result<Option<AudioChunk>, MediaError> {
        let rate = self.output.sample_rate();
        let channels = self.output.channels();
        let Some(decode) = self.decode.as_mut() else {
            return Ok(None);
        };

        let dst_format = ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed);
        let stale = decode.resampler.as_ref().map_or(true, |r| {
            let input = r.input();
            input.format != frame.format()
                || input.rate != frame.rate()
                || input.channel_layout != frame.channel_layout()
        });
        if stale {
            let resampler = ffmpeg::software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                dst_format,
                ffmpeg::ChannelLayout::STEREO,
                rate,
            )
            .map_err(|e| decode_err("resampler", e))?;
            decode.resampler = Some(resampler);
        }
        let Some(resampler) = decode.resampler.as_mut() else {
            return Err(MediaError::Decode("resampler not initialized".into()));
        };

        let mut resampled = ffmpeg::frame::Audio::empty();
        resampler
            .run(frame, &mut resampled)
            .map_err(|e| decode_err("resampling", e))?;
        let samples = resampled.samples();
        if samples == 0 {
            return Ok(None);
        }

        let bytes = resampled.data(0);
        let count = (bytes.len() / 4).min(samples * 2);
        let stereo: Vec<f32> = bytes[..count * 4]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let timestamp = frame
            .timestamp()
            .map(|ts| {
                time::from_seconds(seconds_since_start(ts, decode.start_pts, decode.time_base))
            })
            .unwrap_or(0);

        Ok(Some(AudioChunk {
            data: remap_stereo(&stereo, channels),
            sample_rate: rate,
            channels,
            timestamp,
        }))
    }

    /// Decode one frame and queue it on the output. `fed` counts packets sent
    /// during the current pull and is shared across calls.
    fn decode_one(&mut self, fed: &mut usize) -> Result<AudioPull, MediaError> {
        let mut decoded = ffmpeg::frame::Audio::empty();
        loop {
            let Some(decode) = self.decode.as_mut() else {
                return Ok(AudioPull::EndOfStream);
            };
            if decode.eof {
                return Ok(AudioPull::EndOfStream);
            }
            match decode.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let Some(chunk) = self.convert(&decoded)? else {
                        continue;
                    };
                    if !self.output.push(chunk.data.clone()) {
                        tracing::trace!("Audio queue full, dropped chunk");
                    }
                    return Ok(AudioPull::Chunk(chunk));
                }
                Err(ffmpeg::Error::Eof) => {
                    decode.eof = true;
                    return Ok(AudioPull::EndOfStream);
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    if decode.packets_done {
                        decode.eof = true;
                        return Ok(AudioPull::EndOfStream);
                    }
                    if *fed == MAX_AUDIO_PACKETS_PER_PULL {
                        return Ok(AudioPull::NotReady);
                    }
                    *fed += 1;
                    let mut sent = false;
                    for (stream, packet) in decode.input.packets() {
                        if stream.index() != decode.stream_index {
                            continue;
                        }
                        decode
                            .decoder
                            .send_packet(&packet)
                            .map_err(|e| decode_err("send packet", e))?;
                        sent = true;
                        break;
                    }
                    if !sent {
                        decode.packets_done = true;
                        decode
                            .decoder
                            .send_eof()
                            .map_err(|e| decode_err("send eof", e))?;
                    }
                }
                Err(e) => return Err(decode_err("decode", e)),
            }
        }
    }
}

impl AudioSink for FfmpegAudioSink {
    fn volume(&self) -> f32 {
        self.output.volume()
    }

    fn set_volume(&mut self, volume: f32) {
        self.output.set_volume(volume);
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.output.set_paused(paused);
    }

    fn pull_decoded_chunk(&mut self) -> Result<AudioPull, MediaError> {
        if self.paused {
            return Ok(AudioPull::NotReady);
        }
        let mut fed = 0;
        media::fill_until_full(
            self,
            MAX_AUDIO_PACKETS_PER_PULL,
            |sink| sink.decode_one(&mut fed),
            |sink| sink.output.is_full(),
        )
    }

    fn seek(&mut self, seconds: f64) -> Result<(), MediaError> {
        let Some(decode) = self.decode.as_mut() else {
            return Ok(());
        };
        let offset = seconds_of(decode.start_pts, decode.time_base);
        let micros = ((seconds.max(0.0) + offset) * 1_000_000.0) as i64;
        decode
            .input
            .seek(micros, ..micros)
            .map_err(|e| decode_err("seek", e))?;
        decode.decoder.flush();
        decode.resampler = None;
        decode.packets_done = false;
        decode.eof = false;
        self.output.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.output.set_paused(true);
        self.output.clear();
        self.decode = None;
        tracing::debug!("Audio sink closed");
    }
}

/// Spread interleaved stereo over `channels` outputs: mono averages, extra
/// channels stay silent.
pub fn remap_stereo(stereo: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        2 => stereo.to_vec(),
        0 => Vec::new(),
        1 => stereo.chunks_exact(2).map(|lr| (lr[0] + lr[1]) * 0.5).collect(),
        n => {
            let n = n as usize;
            let mut out = vec![0.0; stereo.len() / 2 * n];
            for (frame, lr) in out.chunks_exact_mut(n).zip(stereo.chunks_exact(2)) {
                frame[0] = lr[0];
                frame[1] = lr[1];
            }
            out
        }
    }
}

/// Opens a media file with FFmpeg onto the given display.
pub struct FfmpegOpener<D> {
    path: PathBuf,
    fallback_fps: f64,
    initial_volume: f32,
    display: D,
}

impl<D> FfmpegOpener<D> {
    pub fn new(path: impl Into<PathBuf>, display: D) -> Self {
        Self {
            path: path.into(),
            fallback_fps: time::DEFAULT_FALLBACK_FPS,
            initial_volume: 1.0,
            display,
        }
    }

    pub fn with_fallback_fps(mut self, fps: f64) -> Self {
        self.fallback_fps = fps;
        self
    }

    pub fn with_initial_volume(mut self, volume: f32) -> Self {
        self.initial_volume = volume;
        self
    }
}

impl<D: DisplaySurface + Send + 'static> MediaOpener for FfmpegOpener<D> {
    type Source = FfmpegFrameSource;
    type Sink = FfmpegAudioSink;
    type Display = D;

    fn open(self) -> Result<OpenedMedia<FfmpegFrameSource, FfmpegAudioSink, D>, MediaError> {
        tracing::info!("Opening {}", self.path.display());
        let mut display = self.display;
        let mut source = match FfmpegFrameSource::open(&self.path, self.fallback_fps) {
            Ok(source) => source,
            Err(e) => {
                display.close();
                return Err(e);
            }
        };
        let sink = match FfmpegAudioSink::open(&self.path, self.initial_volume) {
            Ok(sink) => sink,
            Err(e) => {
                source.close();
                display.close();
                return Err(e);
            }
        };
        Ok(OpenedMedia {
            source,
            sink,
            display,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_stereo() {
        let stereo = [0.2, 0.4, -1.0, 1.0];
        assert_eq!(remap_stereo(&stereo, 2), stereo.to_vec());
        let mono = remap_stereo(&stereo, 1);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
        assert_eq!(
            remap_stereo(&stereo, 4),
            vec![0.2, 0.4, 0.0, 0.0, -1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_seconds_of_time_base() {
        assert_eq!(seconds_of(90_000, ffmpeg::Rational::new(1, 90_000)), 1.0);
        assert_eq!(seconds_of(5, ffmpeg::Rational::new(1, 0)), 0.0);
    }

    #[test]
    fn test_positions_count_from_stream_start() {
        let time_base = ffmpeg::Rational::new(1, 90_000);
        // MPEG-TS style start of 1.4s
        let start = 126_000;
        assert_eq!(seconds_since_start(126_000, start, time_base), 0.0);
        assert_eq!(seconds_since_start(216_000, start, time_base), 1.0);
        assert_eq!(seconds_since_start(90_000, start, time_base), 0.0);
        assert_eq!(seconds_since_start(90_000, 0, time_base), 1.0);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let err = FfmpegFrameSource::open(Path::new("/no/such/video.mp4"), 33.0).err();
        assert!(matches!(err, Some(MediaError::Open { .. })));
    }
}
