//! avsync: video playback with a shared clock that external observers follow.
//!
//! The playback driver owns the media on its own thread and publishes the
//! frame position through [`core::PlaybackClock`]. Observers read only the
//! playback ratio from snapshots of that clock.

#[cfg(feature = "ffmpeg")]
pub mod audio;
pub mod config;
pub mod core;
pub mod media;
pub mod observer;
pub mod playback;
pub mod series;
