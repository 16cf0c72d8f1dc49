//! Time unit conversion that keeps fractional precision.
//!
//! Timers store nanoseconds and report in whatever unit the caller asks for.
//! Conversions go through `f64` so that, say, 1_500 nanoseconds reads as 1.5
//! microseconds rather than truncating to 1.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const NANOS_PER_MICRO: f64 = 1_000.0;
const NANOS_PER_MILLI: f64 = NANOS_PER_MICRO * 1_000.0;
const NANOS_PER_SECOND: f64 = NANOS_PER_MILLI * 1_000.0;
const NANOS_PER_MINUTE: f64 = NANOS_PER_SECOND * 60.0;
const NANOS_PER_HOUR: f64 = NANOS_PER_MINUTE * 60.0;
const NANOS_PER_DAY: f64 = NANOS_PER_HOUR * 24.0;

/// A unit of time, from nanoseconds to days.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// 10^-9 seconds
    Nanoseconds,
    /// 10^-6 seconds
    Microseconds,
    /// 10^-3 seconds
    Milliseconds,
    /// The SI second, and the default base unit of timers.
    #[default]
    Seconds,
    /// 60 seconds
    Minutes,
    /// 60 minutes
    Hours,
    /// 24 hours
    Days,
}

impl TimeUnit {
    /// Nanoseconds in one of this unit.
    #[must_use]
    pub const fn nanos_per_unit(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => NANOS_PER_MICRO,
            TimeUnit::Milliseconds => NANOS_PER_MILLI,
            TimeUnit::Seconds => NANOS_PER_SECOND,
            TimeUnit::Minutes => NANOS_PER_MINUTE,
            TimeUnit::Hours => NANOS_PER_HOUR,
            TimeUnit::Days => NANOS_PER_DAY,
        }
    }

    /// Convert `amount` of this unit into `destination` units.
    #[must_use]
    pub fn convert(self, amount: f64, destination: TimeUnit) -> f64 {
        if self == destination {
            return amount;
        }
        amount * self.nanos_per_unit() / destination.nanos_per_unit()
    }

    /// Convert `nanos` into this unit.
    #[must_use]
    pub fn from_nanos(self, nanos: f64) -> f64 {
        TimeUnit::Nanoseconds.convert(nanos, self)
    }

    /// Convert a whole `amount` of this unit to nanoseconds, saturating at
    /// `u64::MAX`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_nanos(self, amount: u64) -> u64 {
        match self {
            TimeUnit::Nanoseconds => amount,
            // Every multiplier is a whole number of nanoseconds.
            unit => amount.saturating_mul(unit.nanos_per_unit() as u64),
        }
    }
}

/// Nanoseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn duration_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u128::from(u64::MAX)) as u64
}
