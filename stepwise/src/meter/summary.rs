//! Step distribution summary

use std::{fmt, sync::Arc};

use stepwise_clock::{Clock, SystemClock};

use super::{DistributionSummary, Snapshot};
use crate::{
    adder::{F64Adder, U64Adder},
    config::{Error, Settings},
    max::TimeWindowMax,
    step::StepTuple2,
};

/// Tracks the distribution of amounts per step: payload sizes, batch
/// lengths, anything that is not a duration.
pub struct StepDistributionSummary<C = SystemClock> {
    scale: f64,
    count: Arc<U64Adder>,
    total: Arc<F64Adder>,
    step: StepTuple2<u64, f64, C>,
    max: TimeWindowMax<C>,
}

impl<C> fmt::Debug for StepDistributionSummary<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDistributionSummary")
            .field("scale", &self.scale)
            .field("step", &self.step)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl<C> StepDistributionSummary<C>
where
    C: Clock + Clone,
{
    /// Create a new `StepDistributionSummary`. Every recorded amount is
    /// multiplied by `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scale`] if `scale` is not finite and positive.
    pub fn new(clock: C, settings: &Settings, scale: f64) -> Result<Self, Error> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(Error::Scale { scale });
        }
        let count = Arc::new(U64Adder::default());
        let total = Arc::new(F64Adder::default());
        let step = {
            let count = Arc::clone(&count);
            let total = Arc::clone(&total);
            StepTuple2::pair(
                clock.clone(),
                settings.step_millis,
                (0, 0.0),
                move || count.sum_then_reset(),
                move || total.sum_then_reset(),
            )
        };
        let max = TimeWindowMax::new(clock, settings.max_expiry_millis, settings.max_buffer_length);
        Ok(Self {
            scale,
            count,
            total,
            step,
            max,
        })
    }

    /// Record `amount`. Negative and NaN amounts are dropped.
    pub fn record(&self, amount: f64) {
        if amount.is_nan() || amount < 0.0 {
            return;
        }
        let scaled = amount * self.scale;
        self.count.add(1);
        self.total.add(scaled);
        self.max.record(scaled);
    }

    /// Freeze the open step and stop stepping.
    pub fn close_step(&self) {
        self.step.close_step();
    }
}

impl<C> DistributionSummary for StepDistributionSummary<C>
where
    C: Clock + Clone,
{
    fn count(&self) -> u64 {
        self.step.poll1()
    }

    fn total_amount(&self) -> f64 {
        self.step.poll2()
    }

    fn max(&self) -> f64 {
        self.max.poll()
    }

    fn snapshot(&self) -> Snapshot {
        let (count, total) = self.step.poll();
        Snapshot::new(count, total, self.max.poll())
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use proptest::{collection, prelude::*};
    use stepwise_clock::MockClock;

    use super::StepDistributionSummary;
    use crate::{
        config::{Error, Settings},
        meter::DistributionSummary,
    };

    const STEP: u64 = 10;

    fn summary(clock: &MockClock, scale: f64) -> StepDistributionSummary<MockClock> {
        StepDistributionSummary::new(
            clock.clone(),
            &Settings::with_step_millis(STEP).unwrap(),
            scale,
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_scale() {
        let clock = MockClock::new();
        let settings = Settings::with_step_millis(STEP).unwrap();
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let res = StepDistributionSummary::new(clock.clone(), &settings, scale);
            assert!(matches!(res, Err(Error::Scale { .. })));
        }
    }

    #[test]
    fn scaled_step_snapshot() {
        let clock = MockClock::new();
        let summary = summary(&clock, 2.0);
        summary.record(1.0);
        summary.record(4.0);
        summary.record(-3.0);
        summary.record(f64::NAN);
        assert_eq!(summary.count(), 0);
        clock.add_millis(STEP);
        let snapshot = summary.snapshot();
        assert_eq!(snapshot.count, 2);
        assert!((snapshot.total - 10.0).abs() < f64::EPSILON);
        assert!((snapshot.max - 8.0).abs() < f64::EPSILON);
        assert!((snapshot.mean - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn idle_steps_report_nothing() {
        let clock = MockClock::new();
        let summary = summary(&clock, 1.0);
        summary.record(3.0);
        clock.add_millis(STEP * 2);
        assert_eq!(summary.count(), 0);
        assert!(summary.mean() == 0.0);
    }

    proptest! {
        #[test]
        fn step_totals_match_records(amounts in collection::vec(0u32..10_000, 0..100)) {
            let clock = MockClock::new();
            let summary = summary(&clock, 1.0);
            for amount in &amounts {
                summary.record(f64::from(*amount));
            }
            clock.add_millis(STEP);
            let snapshot = summary.snapshot();
            let total: f64 = amounts.iter().map(|a| f64::from(*a)).sum();
            prop_assert_eq!(snapshot.count, amounts.len() as u64);
            prop_assert!((snapshot.total - total).abs() < 1e-6);
        }
    }
}
