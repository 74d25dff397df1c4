//! Player configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::time::DEFAULT_FALLBACK_FPS;
use crate::playback::{DriverConfig, SupervisorConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for '{field}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("config file {} does not exist", path.display())]
    NotFound { path: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub playback: PlaybackSection,
    pub supervisor: SupervisorSection,
    pub observer: ObserverSection,
    pub series: SeriesSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybackSection {
    pub initial_volume: f32,
    pub volume_step: f32,
    pub pause_poll_ms: u64,
    /// Used when the source reports no frame rate.
    pub fallback_fps: f64,
    pub seek_keys: bool,
    pub seek_seconds: f64,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            initial_volume: 0.3,
            volume_step: 0.1,
            pause_poll_ms: 10,
            fallback_fps: DEFAULT_FALLBACK_FPS,
            seek_keys: false,
            seek_seconds: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub join_timeout_ms: u64,
    pub open_timeout_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            join_timeout_ms: 2000,
            open_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObserverSection {
    pub tick_interval_ms: u64,
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SeriesSection {
    pub time_column: String,
    /// Columns plotted when the selection prompt yields nothing usable.
    pub default_columns: Vec<String>,
}

impl Default for SeriesSection {
    fn default() -> Self {
        Self {
            time_column: "Year_Date_Time".to_string(),
            default_columns: vec!["rpm".into(), "Motor Temp".into(), "Pedal".into()],
        }
    }
}

impl PlayerConfig {
    /// Load from `path`, or defaults when no path is given. The result is
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.playback;
        if !(0.0..=1.0).contains(&p.initial_volume) {
            return Err(invalid("playback.initial_volume", p.initial_volume));
        }
        if p.volume_step.is_nan() || p.volume_step <= 0.0 {
            return Err(invalid("playback.volume_step", p.volume_step));
        }
        if p.pause_poll_ms == 0 {
            return Err(invalid("playback.pause_poll_ms", p.pause_poll_ms));
        }
        if !p.fallback_fps.is_finite() || p.fallback_fps <= 0.0 {
            return Err(invalid("playback.fallback_fps", p.fallback_fps));
        }
        if p.seek_seconds.is_nan() || p.seek_seconds <= 0.0 {
            return Err(invalid("playback.seek_seconds", p.seek_seconds));
        }
        if self.observer.tick_interval_ms == 0 {
            return Err(invalid(
                "observer.tick_interval_ms",
                self.observer.tick_interval_ms,
            ));
        }
        if self.series.time_column.trim().is_empty() {
            return Err(invalid("series.time_column", "\"\""));
        }
        Ok(())
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            initial_volume: self.playback.initial_volume,
            volume_step: self.playback.volume_step,
            pause_poll: Duration::from_millis(self.playback.pause_poll_ms),
            seek_keys: self.playback.seek_keys,
            seek_seconds: self.playback.seek_seconds,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            join_timeout: Duration::from_millis(self.supervisor.join_timeout_ms),
            open_timeout: Duration::from_millis(self.supervisor.open_timeout_ms),
            tick_interval: Duration::from_millis(self.observer.tick_interval_ms),
        }
    }
}

fn invalid(field: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    }
}
