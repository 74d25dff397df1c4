//! Display surface without a window.
//!
//! Frames are counted rather than drawn; key presses arrive over a crossbeam
//! channel, either from a test or from a background stdin reader.

use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::core::time::Time;
use crate::media::{DisplaySurface, KeyCode, VideoFrame};

pub const KEY_ESCAPE: KeyCode = 27;
pub const KEY_SPACE: KeyCode = b' ';

/// What the display has been asked to do so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DisplayStats {
    pub frames_shown: u64,
    pub last_timestamp: Option<Time>,
    pub closes: u32,
}

pub struct HeadlessDisplay {
    keys: Receiver<KeyCode>,
    stats: Arc<Mutex<DisplayStats>>,
}

impl HeadlessDisplay {
    pub fn new(keys: Receiver<KeyCode>) -> Self {
        Self {
            keys,
            stats: Arc::new(Mutex::new(DisplayStats::default())),
        }
    }

    /// Display plus the sender that feeds it key presses.
    pub fn with_channel() -> (Self, Sender<KeyCode>) {
        let (tx, rx) = channel::unbounded();
        (Self::new(rx), tx)
    }

    /// Display fed by lines typed on stdin. The reader thread is detached and
    /// ends with stdin.
    pub fn stdin() -> std::io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        thread::Builder::new()
            .name("stdin-keys".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if let Some(key) = parse_key_line(&line) {
                        if tx.send(key).is_err() {
                            break;
                        }
                    }
                }
                tracing::debug!("stdin key reader finished");
            })?;
        Ok(Self::new(rx))
    }

    /// Shared view of the display counters, valid after the display moves
    /// to another thread.
    pub fn stats(&self) -> Arc<Mutex<DisplayStats>> {
        Arc::clone(&self.stats)
    }
}

/// Turn a typed line into a key code: `esc` and `space` by name, otherwise
/// the first character.
pub fn parse_key_line(line: &str) -> Option<KeyCode> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    match trimmed.trim().to_ascii_lowercase().as_str() {
        "esc" | "escape" => return Some(KEY_ESCAPE),
        "space" => return Some(KEY_SPACE),
        _ => {}
    }
    let first = trimmed.chars().next()?;
    first.is_ascii().then_some(first as u8)
}

impl DisplaySurface for HeadlessDisplay {
    fn show(&mut self, frame: &VideoFrame) {
        let mut stats = self.stats.lock();
        stats.frames_shown += 1;
        stats.last_timestamp = Some(frame.timestamp);
        tracing::trace!(
            "show {}x{} frame at {}ns",
            frame.width,
            frame.height,
            frame.timestamp
        );
    }

    fn poll_key(&mut self, timeout: Duration) -> Option<KeyCode> {
        match self.keys.recv_timeout(timeout) {
            // Only the newest pending key counts; older presses are dropped.
            Ok(key) => Some(self.keys.try_iter().last().unwrap_or(key)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // No more keys can arrive; still honour the pacing contract.
                thread::sleep(timeout);
                None
            }
        }
    }

    fn close(&mut self) {
        self.stats.lock().closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_parse_key_line() {
        assert_eq!(parse_key_line("q"), Some(b'q'));
        assert_eq!(parse_key_line("W\n"), Some(b'W'));
        assert_eq!(parse_key_line(" "), Some(KEY_SPACE));
        assert_eq!(parse_key_line("space"), Some(KEY_SPACE));
        assert_eq!(parse_key_line("Esc"), Some(KEY_ESCAPE));
        assert_eq!(parse_key_line(""), None);
        assert_eq!(parse_key_line("é"), None);
    }

    #[test]
    fn test_poll_key_returns_sent_key() {
        let (mut display, keys) = HeadlessDisplay::with_channel();
        keys.send(b'p').unwrap();
        assert_eq!(display.poll_key(Duration::from_millis(50)), Some(b'p'));
        assert_eq!(display.poll_key(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_poll_key_keeps_only_newest_pending_key() {
        let (mut display, keys) = HeadlessDisplay::with_channel();
        for key in [b'w', b'w', b'w', b's'] {
            keys.send(key).unwrap();
        }
        assert_eq!(display.poll_key(Duration::from_millis(50)), Some(b's'));
        assert_eq!(display.poll_key(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_poll_key_waits_after_disconnect() {
        let (mut display, keys) = HeadlessDisplay::with_channel();
        drop(keys);
        let started = Instant::now();
        assert_eq!(display.poll_key(Duration::from_millis(20)), None);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stats_track_shows_and_closes() {
        let (mut display, _keys) = HeadlessDisplay::with_channel();
        let stats = display.stats();
        let frame = VideoFrame {
            data: vec![0; 4],
            width: 1,
            height: 1,
            timestamp: 42,
        };
        display.show(&frame);
        display.show(&frame);
        display.close();

        let stats = stats.lock();
        assert_eq!(stats.frames_shown, 2);
        assert_eq!(stats.last_timestamp, Some(42));
        assert_eq!(stats.closes, 1);
    }
}
