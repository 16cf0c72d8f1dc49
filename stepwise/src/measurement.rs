//! Per-step deltas of an external absolute counter
//!
//! Plenty of libraries expose only a running total: bytes written since
//! start, requests served since start. [`StepMeasurement`] samples such a
//! total whenever it is read, feeds the increase since the previous sample
//! into a [`StepDouble`] and reports the step that closed most recently.
//!
//! A total that goes down, because the library reset or wrapped its counter,
//! contributes nothing for that sample and becomes the new baseline. The
//! clamp is one-sided: a step never reports a negative delta.

use std::{fmt, num::NonZeroU64};

use stepwise_clock::{Clock, SystemClock};

use crate::{adder::F64Adder, step::StepDouble};

/// Converts successive absolute readings into per-step deltas.
pub struct StepMeasurement<F, C = SystemClock> {
    supplier: F,
    /// The absolute value seen by the most recent sample.
    last: F64Adder,
    value: StepDouble<C>,
}

impl<F, C> fmt::Debug for StepMeasurement<F, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepMeasurement")
            .field("last", &self.last)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl<F, C> StepMeasurement<F, C>
where
    F: Fn() -> f64 + Send + Sync,
    C: Clock,
{
    /// Create a new `StepMeasurement` over `supplier`. The baseline before the
    /// first sample is zero.
    pub fn new(clock: C, step_millis: NonZeroU64, supplier: F) -> Self {
        Self {
            supplier,
            last: F64Adder::default(),
            value: StepDouble::new(clock, step_millis),
        }
    }

    /// Sample the supplier, then return the delta of the step that closed most
    /// recently.
    pub fn value(&self) -> f64 {
        self.sample();
        self.value.poll()
    }

    /// Sample the supplier into the open step without polling.
    ///
    /// The exchange makes concurrent samplers partition the increase: each
    /// one is credited with the distance from the reading it replaced.
    pub fn sample(&self) {
        let absolute = (self.supplier)();
        if absolute.is_nan() {
            return;
        }
        let previous = self.last.swap(absolute);
        let delta = absolute - previous;
        if delta > 0.0 {
            self.value.add(delta);
        }
    }

    /// Take a final sample and freeze the open step.
    pub fn close_step(&self) {
        self.sample();
        self.value.close_step();
    }
}
