//! Step timer over an object that keeps its own count and total time
//!
//! Both absolute readings are taken together on every read, turned into
//! deltas against the previous readings and fed into two streams of one
//! [`StepTuple2`], so the count and total reported always belong to the same
//! step.

use std::{
    fmt,
    num::NonZeroU64,
    sync::{Arc, Weak},
};

use stepwise_clock::{Clock, SystemClock};

use super::{Snapshot, Timer};
use crate::{adder::F64Adder, step::StepTuple2, time::TimeUnit};

type Reading = Box<dyn Fn() -> Option<(f64, f64)> + Send + Sync>;

/// Reports per-step deltas of a count and a total time owned by someone
/// else.
pub struct StepFunctionTimer<C = SystemClock> {
    read: Reading,
    total_time_unit: TimeUnit,
    base_time_unit: TimeUnit,
    last_count: F64Adder,
    last_total: F64Adder,
    count: Arc<F64Adder>,
    total_nanos: Arc<F64Adder>,
    step: StepTuple2<f64, f64, C>,
}

impl<C> fmt::Debug for StepFunctionTimer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepFunctionTimer")
            .field("total_time_unit", &self.total_time_unit)
            .field("base_time_unit", &self.base_time_unit)
            .field("last_count", &self.last_count)
            .field("last_total", &self.last_total)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl<C> StepFunctionTimer<C>
where
    C: Clock,
{
    /// Create a new `StepFunctionTimer` over `target`. `total_time` reports
    /// in `total_time_unit`.
    pub fn new<T, FC, FT>(
        clock: C,
        step_millis: NonZeroU64,
        target: Weak<T>,
        count: FC,
        total_time: FT,
        total_time_unit: TimeUnit,
        base_time_unit: TimeUnit,
    ) -> Self
    where
        T: Send + Sync + 'static,
        FC: Fn(&T) -> f64 + Send + Sync + 'static,
        FT: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let read: Reading = Box::new(move || {
            target
                .upgrade()
                .map(|target| (count(&target), total_time(&target)))
        });
        let count = Arc::new(F64Adder::default());
        let total_nanos = Arc::new(F64Adder::default());
        let step = {
            let count = Arc::clone(&count);
            let total_nanos = Arc::clone(&total_nanos);
            StepTuple2::pair(
                clock,
                step_millis,
                (0.0, 0.0),
                move || count.sum_then_reset(),
                move || total_nanos.sum_then_reset(),
            )
        };
        Self {
            read,
            total_time_unit,
            base_time_unit,
            last_count: F64Adder::default(),
            last_total: F64Adder::default(),
            count,
            total_nanos,
            step,
        }
    }

    fn sample(&self) {
        let Some((count, total)) = (self.read)() else {
            return;
        };
        if !count.is_nan() {
            let delta = count - self.last_count.swap(count);
            if delta > 0.0 {
                self.count.add(delta);
            }
        }
        if !total.is_nan() {
            let delta = total - self.last_total.swap(total);
            if delta > 0.0 {
                self.total_nanos
                    .add(self.total_time_unit.convert(delta, TimeUnit::Nanoseconds));
            }
        }
    }

    /// Observations in the step that closed most recently, with the
    /// fractional part the observed object may report.
    pub fn fractional_count(&self) -> f64 {
        self.poll().0
    }

    fn poll(&self) -> (f64, f64) {
        self.sample();
        self.step.poll()
    }

    /// Take a final sample and freeze the open step.
    pub fn close_step(&self) {
        self.sample();
        self.step.close_step();
    }
}

impl<C> Timer for StepFunctionTimer<C>
where
    C: Clock,
{
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(&self) -> u64 {
        self.fractional_count().round() as u64
    }

    fn total_time(&self, unit: TimeUnit) -> f64 {
        unit.from_nanos(self.poll().1)
    }

    /// Function timers observe no individual latencies.
    fn max(&self, _unit: TimeUnit) -> f64 {
        0.0
    }

    fn base_time_unit(&self) -> TimeUnit {
        self.base_time_unit
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn snapshot(&self, unit: TimeUnit) -> Snapshot {
        let (count, total_nanos) = self.poll();
        let mut snapshot = Snapshot::new(count.round() as u64, unit.from_nanos(total_nanos), 0.0);
        // The mean uses the unrounded count.
        snapshot.mean = if count > 0.0 {
            snapshot.total / count
        } else {
            0.0
        };
        snapshot
    }
}
