//! Step counter over an object that keeps its own running total

use std::{fmt, num::NonZeroU64, sync::Weak};

use stepwise_clock::{Clock, SystemClock};

use super::Counter;
use crate::measurement::StepMeasurement;

type Supplier = Box<dyn Fn() -> f64 + Send + Sync>;

/// Reports per-step increases of a total owned by someone else.
///
/// Only a weak reference to the observed object is held. Once it is dropped
/// the counter stops increasing.
pub struct StepFunctionCounter<C = SystemClock> {
    measurement: StepMeasurement<Supplier, C>,
}

impl<C> fmt::Debug for StepFunctionCounter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepFunctionCounter")
            .field("measurement", &self.measurement)
            .finish()
    }
}

impl<C> StepFunctionCounter<C>
where
    C: Clock,
{
    /// Create a new `StepFunctionCounter` reading the running total of
    /// `target` through `total`.
    pub fn new<T, F>(clock: C, step_millis: NonZeroU64, target: Weak<T>, total: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        // A dropped target reads as NaN, which the measurement skips.
        let supplier: Supplier = Box::new(move || target.upgrade().map_or(f64::NAN, |t| total(&t)));
        Self {
            measurement: StepMeasurement::new(clock, step_millis, supplier),
        }
    }

    /// Take a final sample and freeze the open step.
    pub fn close_step(&self) {
        self.measurement.close_step();
    }
}

impl<C> Counter for StepFunctionCounter<C>
where
    C: Clock,
{
    fn count(&self) -> f64 {
        self.measurement.value()
    }
}
