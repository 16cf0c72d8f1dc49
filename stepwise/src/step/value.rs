//! A single windowed accumulator.

use std::{fmt, num::NonZeroU64};

use stepwise_clock::{Clock, SystemClock};
use tracing::debug;

use super::{Roll, Rollover};
use crate::adder::{F64Adder, StepAccumulator, U64Adder};

/// A windowed `f64` total.
pub type StepDouble<C = SystemClock> = StepValue<F64Adder, C>;
/// A windowed `u64` total.
pub type StepLong<C = SystemClock> = StepValue<U64Adder, C>;

/// Accumulates into the open step and reports the step that closed last.
///
/// Writes never block. Reads return the identity until the first boundary
/// passes, and again after any idle gap spanning more than one step.
pub struct StepValue<A, C = SystemClock> {
    rollover: Rollover<C>,
    current: A,
    previous: A,
}

impl<A, C> fmt::Debug for StepValue<A, C>
where
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepValue")
            .field("rollover", &self.rollover)
            .field("current", &self.current)
            .field("previous", &self.previous)
            .finish()
    }
}

impl<A, C> StepValue<A, C>
where
    A: StepAccumulator,
    C: Clock,
{
    /// Create a new `StepValue` stepping every `step_millis` milliseconds.
    pub fn new(clock: C, step_millis: NonZeroU64) -> Self {
        Self {
            rollover: Rollover::new(clock, step_millis),
            current: A::default(),
            previous: A::default(),
        }
    }

    /// Add `delta` to the open step.
    #[inline]
    pub fn add(&self, delta: A::Value) {
        self.current.add(delta);
    }

    /// The running total of the open step. Not frozen, may change between
    /// calls.
    pub fn current(&self) -> A::Value {
        self.current.peek()
    }

    /// The total of the step that closed most recently.
    pub fn poll(&self) -> A::Value {
        self.roll();
        self.previous.peek()
    }

    /// Freeze the open step as the previous one and stop stepping. Every later
    /// poll returns the frozen partial step.
    pub fn close_step(&self) {
        self.rollover.close_with(|| {
            let partial = self.current.take();
            debug!(?partial, "closing step rollover");
            self.previous.set(partial);
        });
    }

    /// The rotation guard of this value.
    pub fn rollover(&self) -> &Rollover<C> {
        &self.rollover
    }

    fn roll(&self) {
        self.rollover.roll_with(|roll| {
            let taken = self.current.take();
            match roll {
                Roll::Adjacent => self.previous.set(taken),
                Roll::Skipped { .. } => self.previous.set(A::IDENTITY),
            }
        });
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use std::num::NonZeroU64;

    use loom::{sync::Arc, thread};
    use stepwise_clock::MockClock;

    use super::StepLong;

    // A write racing the freeze lands in exactly one of the two steps.
    #[test]
    fn add_racing_poll() {
        loom::model(|| {
            let clock = MockClock::new();
            let value = Arc::new(StepLong::new(clock.clone(), NonZeroU64::new(10).unwrap()));
            clock.add_millis(10);
            let writer = {
                let value = Arc::clone(&value);
                thread::spawn(move || value.add(1))
            };
            let first = value.poll();
            writer.join().unwrap();
            clock.add_millis(10);
            let second = value.poll();
            assert_eq!(first + second, 1);
        });
    }

    // Two pollers racing one boundary freeze it once and agree on the value.
    #[test]
    fn racing_polls_agree() {
        loom::model(|| {
            let clock = MockClock::new();
            let value = Arc::new(StepLong::new(clock.clone(), NonZeroU64::new(10).unwrap()));
            value.add(5);
            clock.add_millis(10);
            let other = {
                let value = Arc::clone(&value);
                thread::spawn(move || value.poll())
            };
            let mine = value.poll();
            let theirs = other.join().unwrap();
            // The loser waits for the winner to publish.
            assert_eq!(mine, 5);
            assert_eq!(theirs, 5);
        });
    }
}
