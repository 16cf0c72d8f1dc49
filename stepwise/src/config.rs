//! Step meter configuration
//!
//! Configuration arrives as plain integers, typically from YAML, and is
//! validated once into [`Settings`] whose sizes are non-zero by type. A zero
//! step is a programming error that would otherwise surface as a division by
//! zero on some reporter thread much later; here it fails loudly, up front.

use std::{
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::time::TimeUnit;

/// Errors produced by [`StepConfig`] validation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// The step duration is zero.
    #[error("step_millis must be greater than zero")]
    ZeroStep,
    /// The decaying max sub-window is zero.
    #[error("max.expiry_millis must be greater than zero")]
    ZeroExpiry,
    /// The decaying max ring is empty.
    #[error("max.buffer_length must be greater than zero")]
    ZeroBufferLength,
    /// The clock drift detector would spin.
    #[error("pause.clock_drift.sleep_interval_millis must be greater than zero")]
    ZeroSleepInterval,
    /// A distribution summary scale that is not finite and positive.
    #[error("distribution summary scale must be finite and positive, got {scale}")]
    Scale {
        /// The rejected scale
        scale: f64,
    },
}

fn default_step_millis() -> u64 {
    60_000
}

fn default_buffer_length() -> usize {
    3
}

/// Configuration of step meters.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    /// The length of a reporting step, in milliseconds.
    #[serde(default = "default_step_millis")]
    pub step_millis: u64,
    /// The unit timers report in.
    #[serde(default)]
    pub base_time_unit: TimeUnit,
    /// The decaying maximum of timers and summaries.
    #[serde(default)]
    pub max: MaxConfig,
    /// Pause compensation for timers.
    #[serde(default)]
    pub pause: PauseConfig,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            step_millis: default_step_millis(),
            base_time_unit: TimeUnit::default(),
            max: MaxConfig::default(),
            pause: PauseConfig::default(),
        }
    }
}

/// Configuration of the decaying maximum.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct MaxConfig {
    /// The length of one sub-window, in milliseconds. Defaults to the step.
    #[serde(default)]
    pub expiry_millis: Option<u64>,
    /// The number of sub-windows retained.
    #[serde(default = "default_buffer_length")]
    pub buffer_length: usize,
}

impl Default for MaxConfig {
    fn default() -> Self {
        Self {
            expiry_millis: None,
            buffer_length: default_buffer_length(),
        }
    }
}

/// Configuration of pause detection.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub enum PauseConfig {
    /// Pauses are not detected.
    #[default]
    None,
    /// Detect pauses by oversleeping a background thread.
    ClockDrift {
        /// How long the detector sleeps between checks, in milliseconds.
        sleep_interval_millis: u64,
        /// Oversleep beyond which a pause is reported, in milliseconds.
        pause_threshold_millis: u64,
    },
}

/// Validated pause detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseSettings {
    /// Pauses are not detected.
    None,
    /// Detect pauses by oversleeping a background thread.
    ClockDrift {
        /// How long the detector sleeps between checks.
        sleep_interval: Duration,
        /// Oversleep beyond which a pause is reported.
        pause_threshold: Duration,
    },
}

/// A validated [`StepConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// The length of a reporting step, in milliseconds.
    pub step_millis: NonZeroU64,
    /// The unit timers report in.
    pub base_time_unit: TimeUnit,
    /// The length of one decaying max sub-window, in milliseconds.
    pub max_expiry_millis: NonZeroU64,
    /// The number of decaying max sub-windows.
    pub max_buffer_length: NonZeroUsize,
    /// Pause detection.
    pub pause: PauseSettings,
}

impl Settings {
    /// Settings stepping every `step_millis` with every other knob at its
    /// default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroStep`] if `step_millis` is zero.
    pub fn with_step_millis(step_millis: u64) -> Result<Self, Error> {
        StepConfig {
            step_millis,
            ..StepConfig::default()
        }
        .validate()
    }
}

impl StepConfig {
    /// Validate this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any duration or size is zero. See [`Error`].
    pub fn validate(&self) -> Result<Settings, Error> {
        let step_millis = NonZeroU64::new(self.step_millis).ok_or(Error::ZeroStep)?;
        let max_expiry_millis = match self.max.expiry_millis {
            Some(expiry) => NonZeroU64::new(expiry).ok_or(Error::ZeroExpiry)?,
            None => step_millis,
        };
        let max_buffer_length =
            NonZeroUsize::new(self.max.buffer_length).ok_or(Error::ZeroBufferLength)?;
        let pause = match self.pause {
            PauseConfig::None => PauseSettings::None,
            PauseConfig::ClockDrift {
                sleep_interval_millis,
                pause_threshold_millis,
            } => {
                if sleep_interval_millis == 0 {
                    return Err(Error::ZeroSleepInterval);
                }
                PauseSettings::ClockDrift {
                    sleep_interval: Duration::from_millis(sleep_interval_millis),
                    pause_threshold: Duration::from_millis(pause_threshold_millis),
                }
            }
        };
        Ok(Settings {
            step_millis,
            base_time_unit: self.base_time_unit,
            max_expiry_millis,
            max_buffer_length,
            pause,
        })
    }
}
