//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/ctr_daq.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `CTR_DAQ_`, sections split by `__`
//!
//! Every field has a default, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use ctr_daq::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // CTR_DAQ_ACQUISITION__GATE_LENGTH=0.5 overrides [acquisition] gate_length
//! let config = Config::load()?;
//! config.validate()?;
//! println!("Board {}", config.board.index);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use ctr_driver::{InputSource, N_CHANNELS};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/ctr_daq.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CTR_DAQ_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validation failures of a loaded [`Config`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log_level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Application name must not be empty")]
    EmptyName,

    #[error("Invalid channel {0}. Must be 0-3")]
    InvalidChannel(u32),

    #[error("Invalid gate_length {0}. Must be a positive number of seconds")]
    InvalidGateLength(f64),

    #[error("Invalid wait_seconds: NaN")]
    InvalidWait,

    #[error("samples must be at least 1")]
    NoSamples,

    #[error("Invalid source: {0}")]
    InvalidSource(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// Which board to open
    pub board: BoardConfig,
    /// Acquisition parameters for the CLI commands
    pub acquisition: AcquisitionConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed with colors
    #[default]
    Pretty,
    /// Single line, no colors
    Compact,
    /// One JSON object per event
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Logging output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "ctr_daq".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Board selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Board index in the registry
    pub index: u32,
    /// Attach a simulated board at `index` before opening it
    pub simulated: bool,
    /// Seed for the simulated event generator (random when absent)
    pub seed: Option<u64>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            index: 0,
            simulated: true,
            seed: None,
        }
    }
}

/// Acquisition parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Counter channel (0-3)
    pub channel: u32,
    /// Gate length in seconds
    pub gate_length: f64,
    /// Counter input
    pub source: InputSource,
    /// Buffered session capacity in samples; 0 sizes a continuous ring from
    /// the gate length and a bounded one from `samples`
    pub capacity: usize,
    /// Continuous (wrapping) buffered session
    pub continuous: bool,
    /// Read wait: negative polls, 0 blocks, positive is a timeout in seconds
    pub wait_seconds: f64,
    /// Return partial results when interrupted instead of resuming
    pub quit_on_signal: bool,
    /// Number of buffered samples to collect
    pub samples: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            gate_length: 0.01,
            source: InputSource::Default,
            capacity: 0,
            continuous: false,
            wait_seconds: 1.0,
            quit_on_signal: true,
            samples: 100,
        }
    }
}

impl Config {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment
    ///
    /// A missing file is not an error; defaults fill every absent field.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(
                self.application.log_level.clone(),
            ));
        }
        if self.application.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let acq = &self.acquisition;
        if acq.channel >= N_CHANNELS {
            return Err(ConfigError::InvalidChannel(acq.channel));
        }
        if !acq.gate_length.is_finite() || acq.gate_length <= 0.0 {
            return Err(ConfigError::InvalidGateLength(acq.gate_length));
        }
        if acq.wait_seconds.is_nan() {
            return Err(ConfigError::InvalidWait);
        }
        if acq.samples == 0 {
            return Err(ConfigError::NoSamples);
        }
        acq.source
            .validate()
            .map_err(|e| ConfigError::InvalidSource(e.to_string()))?;

        Ok(())
    }

    /// Render as TOML, e.g. to seed a configuration file
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
