//! Time helpers shared by the media backends and the driver.
//! Media timestamps are nanoseconds (i64); pacing uses `Duration`.

use std::time::Duration;

/// Media timestamp in nanoseconds from stream start.
pub type Time = i64;

pub mod constants {
    use super::Time;

    pub const NANOS_PER_SECOND: Time = 1_000_000_000;
    pub const NANOS_PER_MILLI: Time = 1_000_000;
}

/// Frame rate assumed when a source cannot report one.
pub const DEFAULT_FALLBACK_FPS: f64 = 33.0;

#[inline]
pub fn from_seconds(seconds: f64) -> Time {
    (seconds * constants::NANOS_PER_SECOND as f64) as Time
}

#[inline]
pub fn to_seconds(nanos: Time) -> f64 {
    nanos as f64 / constants::NANOS_PER_SECOND as f64
}

#[inline]
pub fn to_millis(nanos: Time) -> i64 {
    nanos / constants::NANOS_PER_MILLI
}

/// Frame index containing `nanos` at `fps`, rounded to the nearest frame.
#[inline]
pub fn to_frame_index(nanos: Time, fps: f64) -> i64 {
    (to_seconds(nanos) * fps).round() as i64
}

#[inline]
pub fn from_frame_index(frame_index: u64, fps: f64) -> Time {
    from_seconds(frame_index as f64 / fps)
}

/// Pick a usable frame rate: `fps` when it is finite and positive, else `fallback`.
pub fn effective_fps(fps: f64, fallback: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        fallback
    }
}

/// Wall-clock interval between frames, never shorter than one millisecond.
pub fn frame_interval(fps: f64, fallback: f64) -> Duration {
    let fps = effective_fps(fps, fallback);
    let millis = (1000.0 / fps).floor().max(1.0);
    Duration::from_millis(millis as u64)
}

/// Whole frames covering `seconds` at `fps`, at least one.
pub fn frames_in(seconds: f64, fps: f64) -> i64 {
    ((seconds * fps).round() as i64).max(1)
}

/// Format time as HH:MM:SS.mmm
pub fn format_time(nanos: Time) -> String {
    let total_seconds = to_seconds(nanos);
    let hours = (total_seconds / 3600.0).floor() as i64;
    let minutes = ((total_seconds % 3600.0) / 60.0).floor() as i64;
    let seconds = (total_seconds % 60.0).floor() as i64;
    let millis = to_millis(nanos) % 1000;

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
