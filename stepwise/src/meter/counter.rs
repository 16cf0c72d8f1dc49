//! Step counter

use std::num::NonZeroU64;

use stepwise_clock::{Clock, SystemClock};

use super::Counter;
use crate::step::StepDouble;

/// Counts increments per step.
#[derive(Debug)]
pub struct StepCounter<C = SystemClock> {
    value: StepDouble<C>,
}

impl<C> StepCounter<C>
where
    C: Clock,
{
    /// Create a new `StepCounter` stepping every `step_millis`.
    pub fn new(clock: C, step_millis: NonZeroU64) -> Self {
        Self {
            value: StepDouble::new(clock, step_millis),
        }
    }

    /// Increment by one.
    #[inline]
    pub fn increment(&self) {
        self.value.add(1.0);
    }

    /// Increment by `amount`. Negative and NaN amounts are dropped.
    #[inline]
    pub fn increment_by(&self, amount: f64) {
        if amount.is_nan() || amount < 0.0 {
            return;
        }
        self.value.add(amount);
    }

    /// Freeze the open step and stop stepping.
    pub fn close_step(&self) {
        self.value.close_step();
    }
}

impl<C> Counter for StepCounter<C>
where
    C: Clock,
{
    fn count(&self) -> f64 {
        self.value.poll()
    }
}
