//! Defines all configuration structures for the deltacycle engine.
//!
//! These structs are deserialized with `serde` and layered with the `config`
//! crate: built-in defaults, then an optional TOML file, then environment
//! variables prefixed `DELTACYCLE_` (e.g. `DELTACYCLE_MAX_DELTAS=500`).

use crate::error::{SimError, SimResult};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

/// The top-level configuration for a `Simulator`.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// The time unit of one tick.
    #[serde(default = "default_precision")]
    pub precision: TimeUnit,

    /// The last tick the engine may enter. `None` runs until idle.
    #[serde(default)]
    pub max_time: Option<u64>,

    /// Delta iterations allowed within one instant before the run aborts.
    #[serde(default = "default_max_deltas")]
    pub max_deltas: u32,

    /// Capacity of the `SimEvent` broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Whether `Context::observe` calls are kept in the observation log.
    #[serde(default = "default_true")]
    pub record_observations: bool,
}

/// The resolution of simulated time, from femtoseconds to seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Fs,
    Ps,
    Ns,
    Us,
    Ms,
    S,
}

impl TimeUnit {
    /// Power-of-ten exponent of this unit relative to one second.
    pub fn exponent(self) -> i32 {
        match self {
            TimeUnit::Fs => -15,
            TimeUnit::Ps => -12,
            TimeUnit::Ns => -9,
            TimeUnit::Us => -6,
            TimeUnit::Ms => -3,
            TimeUnit::S => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::S => "s",
        }
    }

    /// Converts `amount` of this unit into ticks of `precision`.
    ///
    /// Fails when the amount is finer than the precision can represent or
    /// does not fit in `u64` ticks.
    pub fn to_ticks(self, amount: u64, precision: TimeUnit) -> SimResult<u64> {
        let invalid = || SimError::InvalidTime {
            amount,
            unit: self.label(),
            precision: precision.label(),
        };
        let shift = self.exponent() - precision.exponent();
        if shift >= 0 {
            10u64
                .checked_pow(shift as u32)
                .and_then(|scale| amount.checked_mul(scale))
                .ok_or(SimError::TimeOverflow)
        } else {
            let scale = 10u64.pow((-shift) as u32);
            if amount % scale == 0 {
                Ok(amount / scale)
            } else {
                Err(invalid())
            }
        }
    }

    /// Expresses `ticks` of `precision` in this unit.
    pub fn from_ticks(self, ticks: u64, precision: TimeUnit) -> f64 {
        let shift = precision.exponent() - self.exponent();
        if shift >= 0 {
            ticks as f64 * 10f64.powi(shift)
        } else {
            ticks as f64 / 10f64.powi(-shift)
        }
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fs" => Ok(TimeUnit::Fs),
            "ps" => Ok(TimeUnit::Ps),
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            "s" => Ok(TimeUnit::S),
            _ => Err(SimError::Config(config::ConfigError::Message(format!(
                "unknown time unit `{}`",
                s
            )))),
        }
    }
}

impl SimConfig {
    /// Loads the configuration from defaults, an optional TOML file and the
    /// `DELTACYCLE_` environment.
    pub fn load(path: Option<&Path>) -> SimResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        let config = builder
            .add_source(Environment::with_prefix("DELTACYCLE").try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parses a TOML document on top of the defaults, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> SimResult<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Returns a copy bounded to `max_time` ticks.
    pub fn with_max_time(mut self, max_time: u64) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            precision: default_precision(),
            max_time: None,
            max_deltas: default_max_deltas(),
            event_capacity: default_event_capacity(),
            record_observations: true,
        }
    }
}

// --- Default value functions for serde ---

fn default_precision() -> TimeUnit {
    TimeUnit::Ps
}

fn default_max_deltas() -> u32 {
    10_000
}

fn default_event_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}
