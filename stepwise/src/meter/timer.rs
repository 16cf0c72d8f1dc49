//! Step timer
//!
//! Count and total nanoseconds co-rotate in one [`StepTuple2`] so that a
//! reader never divides the total of one step by the count of another. The
//! maximum is a [`TimeWindowMax`] with its own retention, independent of the
//! step.
//!
//! A timer can also be told about process pauses, see [`crate::pause`]. The
//! operations that would have been timed during a pause never start, so on a
//! pause report the timer records the latency those operations would have
//! seen: the pause less one expected interval, then one expected interval
//! less, and so on down to the expected interval itself.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use stepwise_clock::{Clock, SystemClock};
use tracing::trace;

use super::{Snapshot, Timer};
use crate::{
    adder::U64Adder,
    config::Settings,
    max::TimeWindowMax,
    pause::{IntervalEstimator, PauseDetector, PauseListener},
    step::StepTuple2,
    time::{TimeUnit, duration_nanos},
};

/// A timer reporting the step that closed most recently.
pub struct StepTimer<C = SystemClock> {
    clock: C,
    base_time_unit: TimeUnit,
    count: Arc<U64Adder>,
    total_nanos: Arc<U64Adder>,
    step: StepTuple2<u64, u64, C>,
    max: TimeWindowMax<C>,
    intervals: IntervalEstimator,
}

impl<C> fmt::Debug for StepTimer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepTimer")
            .field("base_time_unit", &self.base_time_unit)
            .field("step", &self.step)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl<C> StepTimer<C>
where
    C: Clock + Clone,
{
    /// Create a new `StepTimer`.
    pub fn new(clock: C, settings: &Settings) -> Self {
        let count = Arc::new(U64Adder::default());
        let total_nanos = Arc::new(U64Adder::default());
        let step = {
            let count = Arc::clone(&count);
            let total_nanos = Arc::clone(&total_nanos);
            StepTuple2::pair(
                clock.clone(),
                settings.step_millis,
                (0, 0),
                move || count.sum_then_reset(),
                move || total_nanos.sum_then_reset(),
            )
        };
        let max = TimeWindowMax::new(
            clock.clone(),
            settings.max_expiry_millis,
            settings.max_buffer_length,
        );
        Self {
            clock,
            base_time_unit: settings.base_time_unit,
            count,
            total_nanos,
            step,
            max,
            intervals: IntervalEstimator::default(),
        }
    }

    /// Record `amount` of `unit`. Negative amounts are dropped.
    #[allow(clippy::cast_sign_loss)]
    pub fn record(&self, amount: i64, unit: TimeUnit) {
        if amount < 0 {
            return;
        }
        self.record_nanos(unit.to_nanos(amount as u64));
    }

    /// Record `duration`.
    pub fn record_duration(&self, duration: Duration) {
        self.record_nanos(duration_nanos(duration));
    }

    /// Run `f`, recording how long it took on the monotonic clock.
    pub fn time<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start = self.clock.monotonic_time();
        let result = f();
        let end = self.clock.monotonic_time();
        self.record_nanos(end.saturating_sub(start));
        result
    }

    /// Freeze the open step and stop stepping. The decaying maximum keeps
    /// decaying.
    pub fn close_step(&self) {
        self.step.close_step();
    }

    fn record_nanos(&self, nanos: u64) {
        self.intervals.record_interval(self.clock.monotonic_time());
        self.record_observation(nanos);
    }

    fn record_observation(&self, nanos: u64) {
        self.count.add(1);
        self.total_nanos.add(nanos);
        self.max.record(nanos as f64);
    }

    /// Record `nanos` and the observations missed while it was being
    /// measured, assuming one observation every `expected_interval`.
    pub fn record_with_expected_interval(&self, nanos: u64, expected_interval: u64) {
        self.record_observation(nanos);
        if expected_interval == 0 {
            return;
        }
        let mut missing = nanos.saturating_sub(expected_interval);
        while missing >= expected_interval {
            self.record_observation(missing);
            missing -= expected_interval;
        }
    }
}

impl<C> StepTimer<C>
where
    C: Clock + Clone + 'static,
{
    /// Subscribe this timer to pause reports from `detector`. The
    /// subscription ends when the timer is dropped.
    pub fn watch_pauses(self: &Arc<Self>, detector: &dyn PauseDetector) {
        let listener: Weak<dyn PauseListener> = Arc::downgrade(self) as Weak<dyn PauseListener>;
        detector.add_listener(listener);
    }
}

impl<C> PauseListener for StepTimer<C>
where
    C: Clock + Clone,
{
    fn on_pause(&self, pause_nanos: u64, pause_end_nanos: u64) {
        let Some(expected) = self.intervals.estimate(pause_end_nanos) else {
            return;
        };
        let observed = pause_nanos.saturating_sub(expected);
        if observed >= expected {
            trace!(
                pause_nanos,
                expected_interval_nanos = expected,
                "compensating timer for pause"
            );
            self.record_with_expected_interval(observed, expected);
        }
    }
}

impl<C> Timer for StepTimer<C>
where
    C: Clock + Clone,
{
    fn count(&self) -> u64 {
        self.step.poll1()
    }

    fn total_time(&self, unit: TimeUnit) -> f64 {
        unit.from_nanos(self.step.poll2() as f64)
    }

    fn max(&self, unit: TimeUnit) -> f64 {
        unit.from_nanos(self.max.poll())
    }

    fn base_time_unit(&self) -> TimeUnit {
        self.base_time_unit
    }

    fn snapshot(&self, unit: TimeUnit) -> Snapshot {
        let (count, total_nanos) = self.step.poll();
        Snapshot::new(
            count,
            unit.from_nanos(total_nanos as f64),
            self.max(unit),
        )
    }
}
