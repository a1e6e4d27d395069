//! Session configuration loaded from ~/.scorelive/config.yaml.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::EngineConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A remote display client opened at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    #[serde(default = "ClientConfig::default_host")]
    pub host: String,
    pub port: u16,
}

impl ClientConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sleep between scheduler ticks, in microseconds.
    pub tick_interval_us: u64,
    /// Beats counted in before playing.
    pub countdown: u32,
    pub midi_clock_ppqn: u32,
    pub gliss_interval_ms: u64,
    /// Interval of `framerate` bindings; 0 disables them.
    pub frame_interval_ms: u32,
    /// Natural-sign suppression only looks at the same octave.
    pub correct_on_same_octave_only: bool,
    /// Quarter-note BPM of the default bar.
    pub default_tempo: f64,
    pub command_queue_capacity: usize,
    pub clients: Vec<ClientConfig>,
    pub listen_port: Option<u16>,
    pub midi_port: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_us: 250,
            countdown: 0,
            midi_clock_ppqn: 24,
            gliss_interval_ms: 10,
            frame_interval_ms: 0,
            correct_on_same_octave_only: true,
            default_tempo: 120.0,
            command_queue_capacity: 1024,
            clients: Vec::new(),
            listen_port: None,
            midi_port: None,
        }
    }
}

impl SessionConfig {
    /// Default path (~/.scorelive/config.yaml).
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".scorelive");
        path.push("config.yaml");
        path
    }

    /// Load from the default path, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring config file");
                Self::default()
            }
        }
    }

    /// Load an explicit file; a missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let yaml = serde_yaml::to_string(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, yaml).map_err(write_err)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_us)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            countdown: self.countdown,
            midi_clock: false,
            midi_clock_ppqn: self.midi_clock_ppqn,
            gliss_interval: Duration::from_millis(self.gliss_interval_ms),
            frame_interval: (self.frame_interval_ms > 0)
                .then(|| Duration::from_millis(u64::from(self.frame_interval_ms))),
        }
    }
}
