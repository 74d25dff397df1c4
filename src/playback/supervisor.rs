//! Thread lifecycle: start the driver and observers, stop and join them.
//!
//! `std::thread::JoinHandle` has no timed join, so every worker carries a
//! one-shot done channel. The thread signals it on the way out (or drops it
//! while unwinding), and `join_timeout` waits on that before joining.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};

use crate::core::clock::PlaybackClock;
use crate::media::MediaOpener;
use crate::observer::{LoopExit, Observer, ObserverLoop};
use crate::playback::driver::{DriverConfig, DriverEvent, DriverReport, PlaybackDriver};

/// Error type for the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Media could not be opened: {0}")]
    OpenFailed(String),
    #[error("Media did not open within {0:?}")]
    OpenTimeout(Duration),
    #[error("Playback driver exited before opening media")]
    DriverExited,
}

/// Timeouts used by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub join_timeout: Duration,
    pub open_timeout: Duration,
    pub tick_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(2),
            open_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_millis(10),
        }
    }
}

/// How a timed join ended.
#[derive(Debug)]
pub enum JoinOutcome<T> {
    Finished(T),
    Panicked,
    /// Thread still running; it was left detached.
    TimedOut,
}

impl<T> JoinOutcome<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, JoinOutcome::TimedOut)
    }

    pub fn finished(self) -> Option<T> {
        match self {
            JoinOutcome::Finished(value) => Some(value),
            _ => None,
        }
    }
}

/// A named thread that can be joined with a timeout.
pub struct WorkerHandle<T> {
    name: String,
    handle: JoinHandle<T>,
    done: Receiver<()>,
}

impl<T: Send + 'static> WorkerHandle<T> {
    pub fn spawn<F>(name: &str, work: F) -> Result<Self, SupervisorError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done_rx) = channel::bounded(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let output = work();
                let _ = done_tx.send(());
                output
            })
            .map_err(|source| SupervisorError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            handle,
            done: done_rx,
        })
    }
}

impl<T> WorkerHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the thread to finish, then join it.
    ///
    /// On timeout the thread is detached and logged, never killed.
    pub fn join_timeout(self, timeout: Duration) -> JoinOutcome<T> {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.join() {
                Ok(value) => JoinOutcome::Finished(value),
                Err(_) => {
                    tracing::error!("{} thread panicked", self.name);
                    JoinOutcome::Panicked
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "{} thread did not stop within {:?}; leaving it detached",
                    self.name,
                    timeout
                );
                JoinOutcome::TimedOut
            }
        }
    }
}

/// What the driver reported once its media was open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenInfo {
    pub total_frames: u64,
    pub frame_interval: Duration,
}

/// Handle to a running playback driver.
pub struct DriverHandle {
    worker: WorkerHandle<DriverReport>,
    events: Receiver<DriverEvent>,
}

impl DriverHandle {
    /// Block until the driver has opened its media or given up.
    pub fn wait_opened(&self, timeout: Duration) -> Result<OpenInfo, SupervisorError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(DriverEvent::Opened {
                    total_frames,
                    frame_interval,
                }) => {
                    return Ok(OpenInfo {
                        total_frames,
                        frame_interval,
                    })
                }
                Ok(DriverEvent::Stopped(reason)) => {
                    return Err(SupervisorError::OpenFailed(reason.to_string()))
                }
                Ok(DriverEvent::StateChanged(_)) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(SupervisorError::OpenTimeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(SupervisorError::DriverExited),
            }
        }
    }
}

/// Outcome of [`Supervisor::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    pub driver: JoinOutcome<DriverReport>,
    pub observers_timed_out: usize,
}

/// Owns the clock and every thread that touches it.
pub struct Supervisor {
    clock: Arc<PlaybackClock>,
    config: SupervisorConfig,
    observers: Vec<WorkerHandle<()>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            clock: Arc::new(PlaybackClock::new()),
            config,
            observers: Vec::new(),
        }
    }

    pub fn clock(&self) -> Arc<PlaybackClock> {
        Arc::clone(&self.clock)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start the playback driver on a dedicated thread.
    pub fn spawn_driver<O: MediaOpener>(
        &self,
        opener: O,
        config: DriverConfig,
    ) -> Result<DriverHandle, SupervisorError> {
        let (events_tx, events_rx) = channel::unbounded();
        let driver = PlaybackDriver::new(opener, self.clock(), config).with_events(events_tx);
        let worker = WorkerHandle::spawn("playback-driver", move || driver.run())?;
        tracing::info!("Playback driver started");
        Ok(DriverHandle {
            worker,
            events: events_rx,
        })
    }

    /// Run an observer on its own thread until quit is set.
    pub fn spawn_observer<O>(&mut self, name: &str, observer: O) -> Result<(), SupervisorError>
    where
        O: Observer + Send + 'static,
    {
        let observer_loop = ObserverLoop::new(self.clock(), observer, self.config.tick_interval);
        let worker = WorkerHandle::spawn(name, move || {
            observer_loop.run(&channel::never());
        })?;
        self.observers.push(worker);
        Ok(())
    }

    /// Run an observer on the calling thread until quit is set or `close`
    /// fires. A close from the UI side requests quit for everyone.
    pub fn run_observer<O: Observer>(&self, observer: O, close: &Receiver<()>) -> LoopExit {
        ObserverLoop::new(self.clock(), observer, self.config.tick_interval)
            .run(close)
            .reason
    }

    /// Block the calling thread until quit is set or `close` fires; used
    /// when no observer runs on this thread.
    pub fn wait_for_quit(&self, close: &Receiver<()>) -> LoopExit {
        let ticker = channel::tick(self.config.tick_interval);
        loop {
            crossbeam::select! {
                recv(ticker) -> _ => {
                    if self.clock.is_quit() {
                        return LoopExit::Quit;
                    }
                }
                recv(close) -> _ => {
                    self.clock.request_quit();
                    return LoopExit::Closed;
                }
            }
        }
    }

    /// Request quit and join the driver, then any spawned observers, each
    /// within the configured timeout.
    pub fn shutdown(self, driver: DriverHandle) -> ShutdownReport {
        self.clock.request_quit();

        let outcome = driver.worker.join_timeout(self.config.join_timeout);
        match &outcome {
            JoinOutcome::Finished(report) => tracing::info!(
                "Playback driver joined ({}; {} frames shown)",
                report.reason,
                report.frames_shown
            ),
            JoinOutcome::Panicked => tracing::error!("Playback driver panicked"),
            JoinOutcome::TimedOut => {}
        }

        let observers_timed_out = self
            .observers
            .into_iter()
            .map(|worker| worker.join_timeout(self.config.join_timeout))
            .filter(JoinOutcome::is_timed_out)
            .count();

        ShutdownReport {
            driver: outcome,
            observers_timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::{MediaProbe, SilentSink, SyntheticSource};
    use crate::media::{FramePull, FrameSource, HeadlessDisplay, MediaError, OpenedMedia};
    use crate::media::SyntheticOpener;
    use crate::playback::state::StopReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            join_timeout: Duration::from_secs(2),
            open_timeout: Duration::from_secs(2),
            tick_interval: Duration::from_millis(2),
        }
    }

    #[derive(Clone, Default)]
    struct CountingObserver {
        redraws: Arc<AtomicUsize>,
        finishes: Arc<AtomicUsize>,
    }

    impl Observer for CountingObserver {
        fn redraw(&mut self, _ratio: f64) {
            self.redraws.fetch_add(1, Ordering::SeqCst);
        }

        fn finish(&mut self) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_worker_join_returns_value() {
        let worker = WorkerHandle::spawn("adder", || 2 + 2).unwrap();
        assert_eq!(worker.name(), "adder");
        assert_eq!(worker.join_timeout(Duration::from_secs(1)).finished(), Some(4));
    }

    #[test]
    fn test_worker_join_times_out() {
        let worker = WorkerHandle::spawn("sleeper", || {
            thread::sleep(Duration::from_millis(500));
        })
        .unwrap();
        let started = Instant::now();
        let outcome = worker.join_timeout(Duration::from_millis(20));
        assert!(outcome.is_timed_out());
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let worker: WorkerHandle<()> =
            WorkerHandle::spawn("boom", || panic!("driver exploded")).unwrap();
        assert!(matches!(
            worker.join_timeout(Duration::from_secs(1)),
            JoinOutcome::Panicked
        ));
    }

    #[test]
    fn test_full_lifecycle_to_end_of_stream() {
        let mut supervisor = Supervisor::new(fast_config());
        let (display, _keys) = HeadlessDisplay::with_channel();
        let opener = SyntheticOpener::new(10, Duration::from_millis(5), display);
        let probe = opener.probe();

        let driver = supervisor
            .spawn_driver(opener, DriverConfig::default())
            .unwrap();
        let info = driver.wait_opened(Duration::from_secs(2)).unwrap();
        assert_eq!(info.total_frames, 10);
        assert_eq!(info.frame_interval, Duration::from_millis(5));

        let background = CountingObserver::default();
        supervisor
            .spawn_observer("observer-bg", background.clone())
            .unwrap();

        let foreground = CountingObserver::default();
        let exit = supervisor.run_observer(foreground.clone(), &channel::never());
        assert_eq!(exit, LoopExit::Quit);
        assert_eq!(foreground.finishes.load(Ordering::SeqCst), 1);

        let report = supervisor.shutdown(driver);
        let driver_report = report.driver.finished().unwrap();
        assert_eq!(driver_report.reason, StopReason::EndOfStream);
        assert_eq!(driver_report.final_index, 9);
        assert_eq!(report.observers_timed_out, 0);
        assert_eq!(background.finishes.load(Ordering::SeqCst), 1);
        assert_eq!(probe.source_closes(), 1);
    }

    #[test]
    fn test_ui_close_stops_driver() {
        let supervisor = Supervisor::new(fast_config());
        let (display, _keys) = HeadlessDisplay::with_channel();
        let opener = SyntheticOpener::new(1_000_000, Duration::from_millis(5), display);
        let driver = supervisor
            .spawn_driver(opener, DriverConfig::default())
            .unwrap();
        driver.wait_opened(Duration::from_secs(2)).unwrap();

        let (close_tx, close_rx) = channel::bounded(1);
        close_tx.send(()).unwrap();
        let observer = CountingObserver::default();
        let exit = supervisor.run_observer(observer.clone(), &close_rx);
        assert_eq!(exit, LoopExit::Closed);
        assert_eq!(observer.finishes.load(Ordering::SeqCst), 1);
        assert!(supervisor.clock().is_quit());

        let report = supervisor.shutdown(driver);
        let driver_report = report.driver.finished().unwrap();
        assert_eq!(driver_report.reason, StopReason::QuitRequested);
    }

    #[test]
    fn test_wait_for_quit_without_observers() {
        let supervisor = Supervisor::new(fast_config());
        let (display, keys) = HeadlessDisplay::with_channel();
        let opener = SyntheticOpener::new(1_000_000, Duration::from_millis(5), display);
        let driver = supervisor
            .spawn_driver(opener, DriverConfig::default())
            .unwrap();
        driver.wait_opened(Duration::from_secs(2)).unwrap();

        keys.send(b'q').unwrap();
        assert_eq!(supervisor.wait_for_quit(&channel::never()), LoopExit::Quit);

        let report = supervisor.shutdown(driver);
        assert_eq!(
            report.driver.finished().map(|r| r.reason),
            Some(StopReason::QuitCommand)
        );
    }

    struct MissingFileOpener;

    impl MediaOpener for MissingFileOpener {
        type Source = SyntheticSource;
        type Sink = SilentSink;
        type Display = HeadlessDisplay;

        fn open(
            self,
        ) -> Result<OpenedMedia<SyntheticSource, SilentSink, HeadlessDisplay>, MediaError> {
            Err(MediaError::open("./testvideo.mp4", "No such file or directory"))
        }
    }

    #[test]
    fn test_open_failure_reported_before_observers_start() {
        let supervisor = Supervisor::new(fast_config());
        let driver = supervisor
            .spawn_driver(MissingFileOpener, DriverConfig::default())
            .unwrap();

        let err = driver.wait_opened(Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, SupervisorError::OpenFailed(_)));
        assert!(err.to_string().contains("testvideo.mp4"));
        assert!(supervisor.clock().is_quit());

        let report = supervisor.shutdown(driver);
        assert!(matches!(
            report.driver.finished().map(|r| r.reason),
            Some(StopReason::OpenFailed(_))
        ));
    }

    /// Source whose first pull blocks far longer than any join timeout.
    struct WedgedSource {
        inner: SyntheticSource,
    }

    impl FrameSource for WedgedSource {
        fn total_frame_count(&self) -> u64 {
            self.inner.total_frame_count()
        }

        fn native_frame_interval(&self) -> Duration {
            self.inner.native_frame_interval()
        }

        fn pull_next_frame(&mut self) -> Result<FramePull, MediaError> {
            thread::sleep(Duration::from_millis(600));
            self.inner.pull_next_frame()
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    struct WedgedOpener {
        display: HeadlessDisplay,
    }

    impl MediaOpener for WedgedOpener {
        type Source = WedgedSource;
        type Sink = SilentSink;
        type Display = HeadlessDisplay;

        fn open(self) -> Result<OpenedMedia<WedgedSource, SilentSink, HeadlessDisplay>, MediaError> {
            let probe = MediaProbe::new();
            let interval = Duration::from_millis(5);
            Ok(OpenedMedia {
                source: WedgedSource {
                    inner: SyntheticSource::new(10, interval, Arc::clone(&probe)),
                },
                sink: SilentSink::new(10, interval, probe),
                display: self.display,
            })
        }
    }

    #[test]
    fn test_join_timeout_is_not_fatal() {
        let supervisor = Supervisor::new(SupervisorConfig {
            join_timeout: Duration::from_millis(30),
            ..fast_config()
        });
        let (display, _keys) = HeadlessDisplay::with_channel();
        let driver = supervisor
            .spawn_driver(WedgedOpener { display }, DriverConfig::default())
            .unwrap();
        driver.wait_opened(Duration::from_secs(2)).unwrap();

        let started = Instant::now();
        let report = supervisor.shutdown(driver);
        assert!(report.driver.is_timed_out());
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
