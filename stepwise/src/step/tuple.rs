//! Several windowed streams that rotate together.
//!
//! A timer's count and total are two streams that a reader must see from the
//! same step: a count from step K next to a total from step K+1 makes for a
//! nonsense mean. [`StepTuple`] freezes all of its streams under a single
//! [`Rollover`] and publishes them as one snapshot behind one atomic pointer,
//! so a single load observes every stream of one step.
//!
//! Each stream is owned by the caller and exposed to the tuple as a 'reset
//! and return' closure that must take the stream's running total atomically,
//! see [`crate::adder::StepAccumulator::take`].

use std::{fmt, num::NonZeroU64, sync::Arc};

use arc_swap::ArcSwap;
use stepwise_clock::{Clock, SystemClock};
use tracing::debug;

use super::{Roll, Rollover};

type Reset<S> = Box<dyn Fn() -> S + Send + Sync>;

/// Two co-rotating streams.
pub type StepTuple2<T1, T2, C = SystemClock> = StepTuple<(T1, T2), C>;
/// Three co-rotating streams.
pub type StepTuple3<T1, T2, T3, C = SystemClock> = StepTuple<(T1, T2, T3), C>;

/// Co-rotating step streams with snapshot `S`.
pub struct StepTuple<S, C = SystemClock> {
    rollover: Rollover<C>,
    reset: Reset<S>,
    initial: S,
    previous: ArcSwap<S>,
}

impl<S, C> fmt::Debug for StepTuple<S, C>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepTuple")
            .field("rollover", &self.rollover)
            .field("initial", &self.initial)
            .field("previous", &self.previous.load())
            .finish_non_exhaustive()
    }
}

impl<S, C> StepTuple<S, C>
where
    S: Clone + Send + Sync,
    C: Clock,
{
    /// Create a new `StepTuple` from one composite reset closure. `initial`
    /// is reported before the first boundary and after idle gaps.
    pub fn new<F>(clock: C, step_millis: NonZeroU64, initial: S, reset: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            rollover: Rollover::new(clock, step_millis),
            reset: Box::new(reset),
            previous: ArcSwap::from_pointee(initial.clone()),
            initial,
        }
    }

    /// Every stream of the step that closed most recently.
    pub fn poll(&self) -> S {
        self.roll();
        S::clone(&self.previous.load())
    }

    /// Freeze the open step of every stream and stop stepping.
    pub fn close_step(&self) {
        self.rollover.close_with(|| {
            debug!("closing step tuple rollover");
            self.previous.store(Arc::new((self.reset)()));
        });
    }

    /// The rotation guard of this tuple.
    pub fn rollover(&self) -> &Rollover<C> {
        &self.rollover
    }

    fn roll(&self) {
        self.rollover.roll_with(|roll| {
            // Every stream is reset even when the totals are discarded, the
            // open step must start from the identity either way.
            let taken = (self.reset)();
            let frozen = match roll {
                Roll::Adjacent => taken,
                Roll::Skipped { .. } => self.initial.clone(),
            };
            self.previous.store(Arc::new(frozen));
        });
    }
}

impl<T1, T2, C> StepTuple<(T1, T2), C>
where
    T1: Copy + Send + Sync + 'static,
    T2: Copy + Send + Sync + 'static,
    C: Clock,
{
    /// Create a tuple of two streams from their reset closures.
    pub fn pair<F1, F2>(
        clock: C,
        step_millis: NonZeroU64,
        initial: (T1, T2),
        reset1: F1,
        reset2: F2,
    ) -> Self
    where
        F1: Fn() -> T1 + Send + Sync + 'static,
        F2: Fn() -> T2 + Send + Sync + 'static,
    {
        Self::new(clock, step_millis, initial, move || (reset1(), reset2()))
    }

    /// The first stream of the step that closed most recently.
    pub fn poll1(&self) -> T1 {
        self.poll().0
    }

    /// The second stream of the step that closed most recently.
    pub fn poll2(&self) -> T2 {
        self.poll().1
    }
}

impl<T1, T2, T3, C> StepTuple<(T1, T2, T3), C>
where
    T1: Copy + Send + Sync + 'static,
    T2: Copy + Send + Sync + 'static,
    T3: Copy + Send + Sync + 'static,
    C: Clock,
{
    /// Create a tuple of three streams from their reset closures.
    pub fn triple<F1, F2, F3>(
        clock: C,
        step_millis: NonZeroU64,
        initial: (T1, T2, T3),
        reset1: F1,
        reset2: F2,
        reset3: F3,
    ) -> Self
    where
        F1: Fn() -> T1 + Send + Sync + 'static,
        F2: Fn() -> T2 + Send + Sync + 'static,
        F3: Fn() -> T3 + Send + Sync + 'static,
    {
        Self::new(clock, step_millis, initial, move || {
            (reset1(), reset2(), reset3())
        })
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::{num::NonZeroU64, sync::Arc};

    use proptest::{collection, prelude::*};
    use stepwise_clock::MockClock;

    use super::{StepTuple2, StepTuple3};
    use crate::adder::{F64Adder, U64Adder};

    const STEP: u64 = 10;

    struct Pair {
        count: Arc<U64Adder>,
        total: Arc<F64Adder>,
        tuple: StepTuple2<u64, f64, MockClock>,
    }

    fn pair(clock: &MockClock) -> Pair {
        let count = Arc::new(U64Adder::default());
        let total = Arc::new(F64Adder::default());
        let tuple = {
            let count = Arc::clone(&count);
            let total = Arc::clone(&total);
            StepTuple2::pair(
                clock.clone(),
                NonZeroU64::new(STEP).unwrap(),
                (0, 0.0),
                move || count.sum_then_reset(),
                move || total.sum_then_reset(),
            )
        };
        Pair {
            count,
            total,
            tuple,
        }
    }

    #[test]
    fn initial_before_first_boundary() {
        let clock = MockClock::new();
        let pair = pair(&clock);
        pair.count.add(1);
        pair.total.add(2.0);
        assert_eq!(pair.tuple.poll(), (0, 0.0));
    }

    #[test]
    fn streams_rotate_together() {
        let clock = MockClock::new();
        let pair = pair(&clock);
        pair.count.add(2);
        pair.total.add(150.0);
        clock.add_millis(STEP);
        assert_eq!(pair.tuple.poll1(), 2);
        pair.count.add(1);
        pair.total.add(1.0);
        assert!((pair.tuple.poll2() - 150.0).abs() < f64::EPSILON);
        clock.add_millis(STEP);
        assert_eq!(pair.tuple.poll(), (1, 1.0));
    }

    #[test]
    fn idle_gap_reports_initial_and_resets_every_stream() {
        let clock = MockClock::new();
        let count = Arc::new(U64Adder::default());
        let tuple = {
            let count = Arc::clone(&count);
            StepTuple3::triple(
                clock.clone(),
                NonZeroU64::new(STEP).unwrap(),
                (0u64, 0u64, 0u64),
                move || count.sum_then_reset(),
                || 1,
                || 2,
            )
        };
        count.add(9);
        clock.add_millis(STEP * 2);
        assert_eq!(tuple.poll(), (0, 0, 0));
        assert_eq!(count.sum(), 0);
        clock.add_millis(STEP);
        assert_eq!(tuple.poll(), (0, 1, 2));
    }

    #[test]
    fn close_step_freezes_partial() {
        let clock = MockClock::new();
        let pair = pair(&clock);
        pair.count.add(3);
        pair.total.add(4.5);
        pair.tuple.close_step();
        assert_eq!(pair.tuple.poll(), (3, 4.5));
        clock.add_millis(STEP * 4);
        assert_eq!(pair.tuple.poll(), (3, 4.5));
    }

    proptest! {
        // Back-to-back polls of each stream come from the same step.
        #[test]
        fn back_to_back_polls_agree(
            steps in collection::vec(collection::vec((0u64..100, 0u32..100), 0..20), 1..10),
        ) {
            let clock = MockClock::new();
            let pair = pair(&clock);
            for writes in steps {
                let mut count = 0;
                let mut total = 0.0;
                for (c, t) in writes {
                    pair.count.add(c);
                    pair.total.add(f64::from(t));
                    count += c;
                    total += f64::from(t);
                }
                clock.add_millis(STEP);
                let first = pair.tuple.poll1();
                let second = pair.tuple.poll2();
                prop_assert_eq!(first, count);
                prop_assert!((second - total).abs() < 1e-6);
            }
        }
    }
}
