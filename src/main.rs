//! avsync command line player.
//!
//! Plays a video (or a synthetic stream) on the playback driver thread and,
//! when a CSV log is given, follows it with a dashboard marker on the main
//! thread. Keys are typed on stdin, one per line.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam::channel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avsync::config::PlayerConfig;
use avsync::core::time;
use avsync::media::{HeadlessDisplay, MediaOpener, SyntheticOpener};
use avsync::observer::MarkerObserver;
use avsync::playback::{command, JoinOutcome, Supervisor};
use avsync::series::{self, SeriesTable};

#[derive(Parser, Debug)]
#[command(name = "avsync")]
#[command(about = "Video player with a synchronized time-series marker")]
#[command(version)]
struct Args {
    /// Video file to play
    video: Option<PathBuf>,

    /// Logger CSV to follow with the dashboard marker
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Comma-separated 1-based column numbers; prompts when omitted
    #[arg(long)]
    columns: Option<String>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Play a generated stream of this many frames instead of a file
    #[arg(long, value_name = "FRAMES")]
    synthetic: Option<u64>,

    /// Frame rate for --synthetic
    #[arg(long, default_value_t = 25.0)]
    fps: f64,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let config = PlayerConfig::load(args.config.as_deref()).context("Failed to load config")?;

    let marker = match &args.csv {
        Some(path) => Some(build_marker(path, args.columns.as_deref(), &config)?),
        None => None,
    };

    let display = HeadlessDisplay::stdin().context("Failed to start key reader")?;

    if let Some(frames) = args.synthetic {
        let interval = time::frame_interval(args.fps, config.playback.fallback_fps);
        return play(SyntheticOpener::new(frames, interval, display), &config, marker);
    }

    let Some(video) = args.video else {
        bail!("No video given; pass a file or --synthetic <FRAMES>");
    };
    open_video(video, display, &config, marker)
}

#[cfg(feature = "ffmpeg")]
fn open_video(
    video: PathBuf,
    display: HeadlessDisplay,
    config: &PlayerConfig,
    marker: Option<MarkerObserver<io::Stdout>>,
) -> Result<ExitCode> {
    let opener = avsync::media::ffmpeg::FfmpegOpener::new(video, display)
        .with_fallback_fps(config.playback.fallback_fps)
        .with_initial_volume(config.playback.initial_volume);
    play(opener, config, marker)
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video(
    video: PathBuf,
    _display: HeadlessDisplay,
    _config: &PlayerConfig,
    _marker: Option<MarkerObserver<io::Stdout>>,
) -> Result<ExitCode> {
    bail!(
        "Cannot play {}: built without the `ffmpeg` feature",
        video.display()
    )
}

fn play<O: MediaOpener>(
    opener: O,
    config: &PlayerConfig,
    marker: Option<MarkerObserver<io::Stdout>>,
) -> Result<ExitCode> {
    let supervisor = Supervisor::new(config.supervisor_config());
    let driver = supervisor
        .spawn_driver(opener, config.driver_config())
        .context("Failed to start playback")?;

    let info = match driver.wait_opened(supervisor.config().open_timeout) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("{}", e);
            supervisor.shutdown(driver);
            return Ok(ExitCode::FAILURE);
        }
    };
    tracing::info!(
        "Playing {} frames at {:?} per frame",
        info.total_frames,
        info.frame_interval
    );
    eprintln!("{}", command::controls_help(config.playback.seek_keys));

    let exit = match marker {
        Some(marker) => supervisor.run_observer(marker, &channel::never()),
        None => supervisor.wait_for_quit(&channel::never()),
    };
    tracing::debug!("Main loop ended: {:?}", exit);

    let report = supervisor.shutdown(driver);
    match report.driver {
        JoinOutcome::Finished(driver) if driver.reason.is_failure() => {
            eprintln!("Playback stopped: {}", driver.reason);
            Ok(ExitCode::FAILURE)
        }
        JoinOutcome::Finished(_) => Ok(ExitCode::SUCCESS),
        JoinOutcome::Panicked => bail!("Playback driver panicked"),
        JoinOutcome::TimedOut => {
            tracing::warn!("Exiting with the playback driver still running");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_marker(
    path: &Path,
    columns: Option<&str>,
    config: &PlayerConfig,
) -> Result<MarkerObserver<io::Stdout>> {
    let table = SeriesTable::load(path, &config.series.time_column)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let numeric = table.numeric_columns();

    let input = match columns {
        Some(columns) => columns.to_string(),
        None => prompt_columns(&numeric)?,
    };
    let mut selected = series::select_columns(&numeric, &input);
    if selected.is_empty() {
        selected = config
            .series
            .default_columns
            .iter()
            .filter(|name| numeric.contains(&name.as_str()))
            .cloned()
            .collect();
        tracing::warn!("No valid columns selected, using defaults: {:?}", selected);
    }
    tracing::info!("Following columns {:?}", selected);

    MarkerObserver::new(table, &selected, io::stdout()).context("Failed to set up dashboard")
}

fn prompt_columns(numeric: &[&str]) -> Result<String> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "Available columns:")?;
    for (i, name) in numeric.iter().enumerate() {
        writeln!(stdout, "  {}: {}", i + 1, name)?;
    }
    write!(stdout, "Select columns (e.g. 1,3,7): ")?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read column selection")?;
    Ok(line)
}
