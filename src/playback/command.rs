//! User commands accepted by the playback driver.

use crate::media::headless::{KEY_ESCAPE, KEY_SPACE};
use crate::media::KeyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    TogglePause,
    VolumeDown,
    VolumeUp,
    /// Only honoured when seek keys are enabled.
    SeekBack,
    /// Only honoured when seek keys are enabled.
    SeekForward,
}

impl Command {
    /// Resolve a key code. Unbound keys yield `None`.
    pub fn from_key(key: KeyCode) -> Option<Self> {
        match key {
            KEY_ESCAPE | b'q' | b'Q' => Some(Command::Quit),
            KEY_SPACE | b'p' | b'P' => Some(Command::TogglePause),
            b's' | b'S' => Some(Command::VolumeDown),
            b'w' | b'W' => Some(Command::VolumeUp),
            b'a' | b'A' => Some(Command::SeekBack),
            b'd' | b'D' => Some(Command::SeekForward),
            _ => None,
        }
    }

    pub fn is_seek(self) -> bool {
        matches!(self, Command::SeekBack | Command::SeekForward)
    }
}

/// One-line key help shown at startup.
pub fn controls_help(seek_keys: bool) -> &'static str {
    if seek_keys {
        "Controls: space/p = pause/resume, w/s = volume up/down, a/d = seek -/+, q/Esc = quit"
    } else {
        "Controls: space/p = pause/resume, w/s = volume up/down, q/Esc = quit"
    }
}
