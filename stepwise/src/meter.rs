//! Step meters
//!
//! Meters compose the step primitives into the shapes a metrics registry
//! hands out: a timer is a count and a total that co-rotate plus a decaying
//! maximum, a counter is one windowed total, and so on. Every read returns
//! the step that closed most recently. Every write lands in the open step
//! and never fails: values a meter cannot accept, negative durations say,
//! are dropped without comment.
//!
//! Readers, exporters chiefly, go through the [`Counter`], [`Timer`] and
//! [`DistributionSummary`] traits.

use crate::time::TimeUnit;

pub mod counter;
pub mod function_counter;
pub mod function_timer;
pub mod summary;
pub mod timer;

pub use counter::StepCounter;
pub use function_counter::StepFunctionCounter;
pub use function_timer::StepFunctionTimer;
pub use summary::StepDistributionSummary;
pub use timer::StepTimer;

/// Count, total, maximum and mean of one step, read together.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Snapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations.
    pub total: f64,
    /// Decaying maximum. Not windowed by step.
    pub max: f64,
    /// `total / count`, zero when nothing was observed.
    pub mean: f64,
}

impl Snapshot {
    /// Create a new `Snapshot`, deriving the mean.
    #[must_use]
    pub fn new(count: u64, total: f64, max: f64) -> Self {
        let mean = if count == 0 {
            0.0
        } else {
            total / count as f64
        };
        Self {
            count,
            total,
            max,
            mean,
        }
    }
}

/// A monotonically increasing count, reported per step.
pub trait Counter {
    /// Total of the step that closed most recently.
    fn count(&self) -> f64;
}

/// Latencies, reported per step.
pub trait Timer {
    /// Observations in the step that closed most recently.
    fn count(&self) -> u64;
    /// Summed latency of the step that closed most recently, in `unit`.
    fn total_time(&self, unit: TimeUnit) -> f64;
    /// Decaying maximum latency in `unit`.
    fn max(&self, unit: TimeUnit) -> f64;
    /// The unit this timer is naturally reported in.
    fn base_time_unit(&self) -> TimeUnit;

    /// Mean latency of the step that closed most recently, in `unit`. Zero
    /// when the step saw nothing.
    fn mean(&self, unit: TimeUnit) -> f64 {
        self.snapshot(unit).mean
    }

    /// Count, total and maximum in `unit`.
    ///
    /// The default reads count and total separately. Implementations that
    /// co-rotate them override this to read both from one step.
    fn snapshot(&self, unit: TimeUnit) -> Snapshot {
        Snapshot::new(self.count(), self.total_time(unit), self.max(unit))
    }
}

/// Amounts of anything, reported per step.
pub trait DistributionSummary {
    /// Observations in the step that closed most recently.
    fn count(&self) -> u64;
    /// Summed amount of the step that closed most recently.
    fn total_amount(&self) -> f64;
    /// Decaying maximum amount.
    fn max(&self) -> f64;

    /// Mean amount of the step that closed most recently.
    fn mean(&self) -> f64 {
        self.snapshot().mean
    }

    /// Count, total and maximum.
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.count(), self.total_amount(), self.max())
    }
}

#[cfg(test)]
mod tests {
    use super::Snapshot;

    #[test]
    fn mean_of_nothing_is_zero() {
        assert_eq!(Snapshot::new(0, 0.0, 0.0).mean, 0.0);
        assert!((Snapshot::new(4, 10.0, 5.0).mean - 2.5).abs() < f64::EPSILON);
    }
}
