//! Playback driver state machine.

use std::fmt;

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Media not open yet
    Opening,
    /// Pulling frames at the native pace
    Playing,
    /// Holding the last frame, resources still open
    Paused,
    /// Terminal; resources released
    Stopped,
}

impl DriverState {
    pub fn is_paused(&self) -> bool {
        matches!(self, DriverState::Paused)
    }

    /// State after a pause/resume command. Only `Playing` and `Paused` toggle.
    pub fn toggled(self) -> Self {
        match self {
            DriverState::Playing => DriverState::Paused,
            DriverState::Paused => DriverState::Playing,
            other => other,
        }
    }
}

/// Why the driver reached `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Quit key pressed on the video surface
    QuitCommand,
    /// Another thread set the clock's quit flag
    QuitRequested,
    EndOfStream,
    /// Media could not be opened; playback never started
    OpenFailed(String),
    /// Frame source failed mid-playback
    SourceFailed(String),
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, StopReason::OpenFailed(_) | StopReason::SourceFailed(_))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::QuitCommand => write!(f, "quit command"),
            StopReason::QuitRequested => write!(f, "quit requested"),
            StopReason::EndOfStream => write!(f, "end of stream"),
            StopReason::OpenFailed(msg) => write!(f, "open failed: {}", msg),
            StopReason::SourceFailed(msg) => write!(f, "source failed: {}", msg),
        }
    }
}
