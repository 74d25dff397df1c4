//! Shared playback clock.
//!
//! One record of "where is playback, is it paused, should everything stop",
//! written by the playback driver and read by any number of observers.
//! Every operation takes the lock for its whole duration and never blocks
//! while holding it.

use parking_lot::Mutex;

/// Point-in-time copy of the whole clock, taken under a single lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub frame_index: u64,
    pub total_frames: u64,
    pub paused: bool,
    pub quit: bool,
}

impl ClockSnapshot {
    /// Playback position as a fraction of the stream in `[0, 1]`.
    ///
    /// Defined as `0.0` when the stream has a single frame (or none known yet).
    pub fn ratio(&self) -> f64 {
        if self.total_frames <= 1 {
            return 0.0;
        }
        self.frame_index as f64 / (self.total_frames - 1) as f64
    }

    /// Highest valid frame index for this snapshot.
    pub fn last_index(&self) -> u64 {
        self.total_frames.saturating_sub(1)
    }
}

#[derive(Debug)]
struct ClockState {
    frame_index: u64,
    total_frames: u64,
    paused: bool,
    quit: bool,
}

impl ClockState {
    fn clamp(&self, index: i64) -> u64 {
        let last = self.total_frames.saturating_sub(1);
        if index <= 0 {
            0
        } else {
            (index as u64).min(last)
        }
    }
}

/// Thread-safe playback position shared between the driver and observers.
///
/// `quit` is monotonic: nothing can clear it once set.
#[derive(Debug)]
pub struct PlaybackClock {
    state: Mutex<ClockState>,
}

impl PlaybackClock {
    /// Create a clock with the placeholder total of one frame.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                frame_index: 0,
                total_frames: 1,
                paused: false,
                quit: false,
            }),
        }
    }

    /// Set the stream length. Values below one are stored as one.
    pub fn set_total(&self, total: i64) {
        let mut state = self.state.lock();
        state.total_frames = total.max(1) as u64;
        state.frame_index = state.frame_index.min(state.total_frames - 1);
    }

    /// Move to `index`, clamped into `[0, total_frames - 1]`.
    pub fn set_index(&self, index: i64) {
        let mut state = self.state.lock();
        state.frame_index = state.clamp(index);
    }

    /// Move by `delta` frames and return the new, clamped index.
    ///
    /// The read-modify-write happens under one lock acquisition, so concurrent
    /// steps never lose an update.
    pub fn step(&self, delta: i64) -> u64 {
        let mut state = self.state.lock();
        let target = (state.frame_index as i64).saturating_add(delta);
        state.frame_index = state.clamp(target);
        state.frame_index
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    /// Ask every thread to stop. Idempotent.
    pub fn request_quit(&self) {
        self.state.lock().quit = true;
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        let state = self.state.lock();
        ClockSnapshot {
            frame_index: state.frame_index,
            total_frames: state.total_frames,
            paused: state.paused,
            quit: state.quit,
        }
    }

    /// Playback ratio in `[0, 1]`; see [`ClockSnapshot::ratio`].
    pub fn ratio(&self) -> f64 {
        self.snapshot().ratio()
    }

    pub fn is_quit(&self) -> bool {
        self.state.lock().quit
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_clock_defaults() {
        let clock = PlaybackClock::new();
        let snap = clock.snapshot();
        assert_eq!(snap.frame_index, 0);
        assert_eq!(snap.total_frames, 1);
        assert!(!snap.paused);
        assert!(!snap.quit);
    }

    #[test]
    fn test_set_total_floor() {
        let clock = PlaybackClock::new();
        clock.set_total(0);
        assert_eq!(clock.snapshot().total_frames, 1);
        clock.set_total(-7);
        assert_eq!(clock.snapshot().total_frames, 1);
        clock.set_total(240);
        assert_eq!(clock.snapshot().total_frames, 240);
    }

    #[test]
    fn test_set_index_clamps() {
        let clock = PlaybackClock::new();
        clock.set_total(10);

        clock.set_index(-5);
        assert_eq!(clock.snapshot().frame_index, 0);

        clock.set_index(999);
        assert_eq!(clock.snapshot().frame_index, 9);

        clock.set_index(4);
        assert_eq!(clock.snapshot().frame_index, 4);
    }

    #[test]
    fn test_set_index_before_total_stays_at_zero() {
        let clock = PlaybackClock::new();
        clock.set_index(42);
        assert_eq!(clock.snapshot().frame_index, 0);
    }

    #[test]
    fn test_step_clamps_both_ends() {
        let clock = PlaybackClock::new();
        clock.set_total(10);
        clock.set_index(5);

        assert_eq!(clock.step(3), 8);
        assert_eq!(clock.step(30), 9);
        assert_eq!(clock.step(-4), 5);
        assert_eq!(clock.step(-100), 0);
        assert_eq!(clock.step(i64::MIN), 0);
        clock.set_index(9);
        assert_eq!(clock.step(i64::MAX), 9);
    }

    #[test]
    fn test_shrinking_total_reclamps_index() {
        let clock = PlaybackClock::new();
        clock.set_total(100);
        clock.set_index(80);
        clock.set_total(20);
        assert_eq!(clock.snapshot().frame_index, 19);
    }

    #[test]
    fn test_concurrent_steps_lose_nothing() {
        let clock = Arc::new(PlaybackClock::new());
        clock.set_total(100);
        clock.set_index(50);

        let threads = 8;
        let steps_per_thread = 5;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    for _ in 0..steps_per_thread {
                        clock.step(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(clock.snapshot().frame_index, 50 + threads * steps_per_thread);
    }

    #[test]
    fn test_concurrent_steps_saturate_at_last_frame() {
        let clock = Arc::new(PlaybackClock::new());
        clock.set_total(100);
        clock.set_index(50);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        clock.step(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(clock.snapshot().frame_index, 99);
    }

    #[test]
    fn test_mixed_direction_steps_balance() {
        let clock = Arc::new(PlaybackClock::new());
        clock.set_total(1_000_000);
        clock.set_index(500_000);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let clock = Arc::clone(&clock);
                let delta = if i % 2 == 0 { 1 } else { -1 };
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        clock.step(delta);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(clock.snapshot().frame_index, 500_000);
    }

    #[test]
    fn test_ratio_boundaries() {
        let clock = PlaybackClock::new();
        clock.set_index(0);
        assert_eq!(clock.ratio(), 0.0);

        clock.set_total(1);
        clock.set_index(100);
        assert_eq!(clock.ratio(), 0.0);

        clock.set_total(5);
        clock.set_index(2);
        assert_eq!(clock.ratio(), 0.5);

        clock.set_index(4);
        assert_eq!(clock.ratio(), 1.0);
    }

    #[test]
    fn test_quit_is_monotonic() {
        let clock = PlaybackClock::new();
        clock.request_quit();
        clock.request_quit();

        clock.set_paused(true);
        clock.set_paused(false);
        clock.set_total(30);
        clock.set_index(12);
        clock.step(-3);

        assert!(clock.snapshot().quit);
        assert!(clock.is_quit());
    }

    #[test]
    fn test_paused_snapshot_is_frozen() {
        let clock = Arc::new(PlaybackClock::new());
        clock.set_total(300);
        clock.set_index(123);
        clock.set_paused(true);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let snap = clock.snapshot();
                        assert!(snap.paused);
                        assert_eq!(snap.frame_index, 123);
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_snapshot_never_torn() {
        let clock = Arc::new(PlaybackClock::new());
        let writer = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                for total in 2..5_000i64 {
                    clock.set_total(total);
                    clock.set_index(total - 1);
                }
                clock.request_quit();
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || loop {
                    let snap = clock.snapshot();
                    assert!(snap.total_frames >= 1);
                    assert!(snap.frame_index <= snap.last_index());
                    let ratio = snap.ratio();
                    assert!((0.0..=1.0).contains(&ratio));
                    if snap.quit {
                        break;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
