//! Observers: consumers that follow playback by ratio alone.
//!
//! An observer never sees frame counts or media. On each tick the loop takes
//! one snapshot of the clock, stops if quit is set, and otherwise hands the
//! playback ratio to the observer. Ticks and frame advances are not
//! correlated; an observer may see the same ratio several times or skip
//! intermediate positions.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use crossbeam::channel::{self, Receiver};

use crate::core::clock::PlaybackClock;

pub mod marker;

pub use marker::MarkerObserver;

/// Presentation that tracks the playback ratio.
pub trait Observer {
    /// Move the presentation to `ratio` in `[0, 1]`.
    fn redraw(&mut self, ratio: f64);

    /// Terminal redraw once quit has been seen. No ticks follow.
    fn finish(&mut self);
}

impl<O: Observer + ?Sized> Observer for Box<O> {
    fn redraw(&mut self, ratio: f64) {
        (**self).redraw(ratio);
    }

    fn finish(&mut self) {
        (**self).finish();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Finished,
}

/// Why an observer loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Quit was seen on the clock
    Quit,
    /// The UI side closed first and requested quit
    Closed,
}

/// Observer plus the reason its loop ended.
pub struct ObserverExit<O> {
    pub observer: O,
    pub reason: LoopExit,
}

/// Drives one observer from the shared clock.
pub struct ObserverLoop<O> {
    clock: Arc<PlaybackClock>,
    observer: O,
    interval: Duration,
    finished: bool,
}

impl<O: Observer> ObserverLoop<O> {
    pub fn new(clock: Arc<PlaybackClock>, observer: O, interval: Duration) -> Self {
        Self {
            clock,
            observer,
            interval,
            finished: false,
        }
    }

    /// One redraw tick. After `Finished` further calls do nothing.
    pub fn tick(&mut self) -> Tick {
        if self.finished {
            return Tick::Finished;
        }
        let snapshot = self.clock.snapshot();
        if snapshot.quit {
            self.observer.finish();
            self.finished = true;
            return Tick::Finished;
        }
        self.observer.redraw(snapshot.ratio());
        Tick::Continue
    }

    /// Tick every interval until quit, or until `close` yields a message or
    /// disconnects. Pass `channel::never()` when nothing can close the loop.
    pub fn run(mut self, close: &Receiver<()>) -> ObserverExit<O> {
        let reason = self.drive(close);
        ObserverExit {
            observer: self.observer,
            reason,
        }
    }

    fn drive(&mut self, close: &Receiver<()>) -> LoopExit {
        let ticker = channel::tick(self.interval);
        loop {
            crossbeam::select! {
                recv(ticker) -> _ => {
                    if self.tick() == Tick::Finished {
                        return LoopExit::Quit;
                    }
                }
                recv(close) -> _ => {
                    tracing::debug!("Observer closed by UI, requesting quit");
                    self.clock.request_quit();
                    self.tick();
                    return LoopExit::Closed;
                }
            }
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }
}

/// Maps a playback ratio onto a timestamp range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAxis {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeAxis {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// `start + (end - start) * ratio`, with `ratio` clamped to `[0, 1]`.
    pub fn at(&self, ratio: f64) -> NaiveDateTime {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        let span = self.end.signed_duration_since(self.start);
        let offset = match span.num_nanoseconds() {
            Some(nanos) => chrono::Duration::nanoseconds((nanos as f64 * ratio).round() as i64),
            None => chrono::Duration::milliseconds(
                (span.num_milliseconds() as f64 * ratio).round() as i64,
            ),
        };
        self.start + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        ratios: Vec<f64>,
        finishes: usize,
    }

    impl Observer for Recorder {
        fn redraw(&mut self, ratio: f64) {
            self.ratios.push(ratio);
        }

        fn finish(&mut self) {
            self.finishes += 1;
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_tick_reports_ratio() {
        let clock = Arc::new(PlaybackClock::new());
        clock.set_total(5);
        clock.set_index(2);
        let mut observer_loop =
            ObserverLoop::new(Arc::clone(&clock), Recorder::default(), Duration::from_millis(1));

        assert_eq!(observer_loop.tick(), Tick::Continue);
        clock.set_index(4);
        assert_eq!(observer_loop.tick(), Tick::Continue);
        assert_eq!(observer_loop.observer().ratios, vec![0.5, 1.0]);
    }

    #[test]
    fn test_tick_finishes_once_on_quit() {
        let clock = Arc::new(PlaybackClock::new());
        let mut observer_loop =
            ObserverLoop::new(Arc::clone(&clock), Recorder::default(), Duration::from_millis(1));

        clock.request_quit();
        assert_eq!(observer_loop.tick(), Tick::Finished);
        assert_eq!(observer_loop.tick(), Tick::Finished);
        assert_eq!(observer_loop.observer().finishes, 1);
        assert!(observer_loop.observer().ratios.is_empty());
    }

    #[test]
    fn test_run_stops_when_clock_quits() {
        let clock = Arc::new(PlaybackClock::new());
        clock.set_total(101);
        let writer = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                for i in 0..=100 {
                    clock.set_index(i);
                    thread::sleep(Duration::from_millis(1));
                }
                clock.request_quit();
            })
        };

        let exit = ObserverLoop::new(Arc::clone(&clock), Recorder::default(), Duration::from_millis(2))
            .run(&channel::never());
        writer.join().unwrap();

        assert_eq!(exit.reason, LoopExit::Quit);
        assert_eq!(exit.observer.finishes, 1);
        let ratios = &exit.observer.ratios;
        assert!(!ratios.is_empty());
        assert!(ratios.windows(2).all(|w| w[0] <= w[1]));
        assert!(ratios.iter().all(|r| (0.0..=1.0).contains(r)));
    }

    #[test]
    fn test_run_close_requests_quit() {
        let clock = Arc::new(PlaybackClock::new());
        let (close_tx, close_rx) = channel::bounded(1);
        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            close_tx.send(()).unwrap();
        });

        let started = Instant::now();
        let exit = ObserverLoop::new(Arc::clone(&clock), Recorder::default(), Duration::from_millis(5))
            .run(&close_rx);
        closer.join().unwrap();

        assert_eq!(exit.reason, LoopExit::Closed);
        assert_eq!(exit.observer.finishes, 1);
        assert!(clock.is_quit());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_time_axis_mapping() {
        let axis = TimeAxis::new(at(10, 0, 0), at(10, 0, 10));
        assert_eq!(axis.at(0.0), at(10, 0, 0));
        assert_eq!(axis.at(0.5), at(10, 0, 5));
        assert_eq!(axis.at(1.0), at(10, 0, 10));
        assert_eq!(axis.at(7.0), at(10, 0, 10));
        assert_eq!(axis.at(-1.0), at(10, 0, 0));
        assert_eq!(axis.at(f64::NAN), at(10, 0, 0));
    }

    #[test]
    fn test_time_axis_degenerate_range() {
        let axis = TimeAxis::new(at(8, 30, 0), at(8, 30, 0));
        assert_eq!(axis.at(0.7), at(8, 30, 0));
    }
}
