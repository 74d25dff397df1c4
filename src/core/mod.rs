//! Core types shared by every thread: the playback clock and time helpers.

pub mod clock;
pub mod time;

pub use clock::{ClockSnapshot, PlaybackClock};
pub use time::Time;
