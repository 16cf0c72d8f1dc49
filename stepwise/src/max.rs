//! Decaying maximum
//!
//! A maximum over all time is useless for a long-running process: one early
//! spike pins it forever. [`TimeWindowMax`] keeps a ring of `buffer_length`
//! sub-window maxima, each `sub_window` milliseconds long, and reports the
//! largest of them. As time passes the oldest sub-window is reset to zero and
//! reused for the newest, so a value is forgotten between `(buffer_length -
//! 1) * sub_window` and `buffer_length * sub_window` milliseconds after it was
//! recorded.
//!
//! Sub-windows are anchored at construction time, not at the epoch. The
//! retention of a max is configured independently of the step of the meter
//! that owns it, commonly a few steps long to smooth out one-step spikes.
//!
//! Recording is a `fetch_max` on the bit pattern of the value. For
//! non-negative floats the bit patterns order the same way the floats do, so
//! negative and NaN values are refused at the door.

use std::{
    fmt,
    num::{NonZeroU64, NonZeroUsize},
};

use stepwise_clock::{Clock, SystemClock};

use crate::sync::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// The maximum value recorded over a trailing retention window.
pub struct TimeWindowMax<C = SystemClock> {
    clock: C,
    sub_window_millis: NonZeroU64,
    /// Bit patterns of the non-negative maximum of each sub-window.
    ring: Box<[AtomicU64]>,
    /// Index of the sub-window currently accepting records.
    current: AtomicUsize,
    /// Wall time, in milliseconds, at which the current sub-window opened.
    last_rotate: AtomicU64,
    /// Held by the single thread performing decay.
    rotating: AtomicBool,
}

impl<C> fmt::Debug for TimeWindowMax<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring: Vec<f64> = self
            .ring
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Relaxed)))
            .collect();
        f.debug_struct("TimeWindowMax")
            .field("sub_window_millis", &self.sub_window_millis)
            .field("ring", &ring)
            .field("current", &self.current.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C> TimeWindowMax<C>
where
    C: Clock,
{
    /// Create a new `TimeWindowMax` retaining values for `buffer_length`
    /// sub-windows of `sub_window_millis` each.
    pub fn new(clock: C, sub_window_millis: NonZeroU64, buffer_length: NonZeroUsize) -> Self {
        let ring = (0..buffer_length.get())
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let now = clock.wall_time();
        Self {
            clock,
            sub_window_millis,
            ring,
            current: AtomicUsize::new(0),
            last_rotate: AtomicU64::new(now),
            rotating: AtomicBool::new(false),
        }
    }

    /// Total retention in milliseconds.
    #[must_use]
    pub fn retention_millis(&self) -> u64 {
        self.sub_window_millis
            .get()
            .saturating_mul(self.ring.len() as u64)
    }

    /// Record `value`. Negative and NaN values are ignored.
    pub fn record(&self, value: f64) {
        if value.is_nan() || value < 0.0 {
            return;
        }
        self.rotate();
        let current = self.current.load(Ordering::Acquire);
        // -0.0 has the sign bit set and would order above every positive
        // value, normalize it.
        let bits = if value == 0.0 { 0 } else { value.to_bits() };
        self.ring[current].fetch_max(bits, Ordering::AcqRel);
    }

    /// The largest value recorded in any sub-window still retained.
    pub fn poll(&self) -> f64 {
        self.rotate();
        let max = self
            .ring
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .max()
            .unwrap_or(0);
        f64::from_bits(max)
    }

    fn rotate(&self) {
        let now = self.clock.wall_time();
        let sub_window = self.sub_window_millis.get();
        if now.saturating_sub(self.last_rotate.load(Ordering::Acquire)) < sub_window {
            return;
        }
        if self
            .rotating
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Another thread is decaying the ring. Records arriving meanwhile
            // land in the sub-window that was current a moment ago, which is
            // still within retention.
            return;
        }

        // Re-read under the flag: another thread may have finished a rotation
        // between our check and acquiring the flag.
        let last = self.last_rotate.load(Ordering::Acquire);
        let elapsed = now.saturating_sub(last) / sub_window;
        if elapsed > 0 {
            let len = self.ring.len();
            let mut current = self.current.load(Ordering::Acquire);
            if elapsed >= len as u64 {
                for slot in &*self.ring {
                    slot.store(0, Ordering::Release);
                }
                #[allow(clippy::cast_possible_truncation)]
                let advance = (elapsed % len as u64) as usize;
                current = (current + advance) % len;
            } else {
                for _ in 0..elapsed {
                    current = (current + 1) % len;
                    // Clear the reused slot before publishing it as current.
                    self.ring[current].store(0, Ordering::Release);
                }
            }
            self.current.store(current, Ordering::Release);
            self.last_rotate
                .store(last + elapsed * sub_window, Ordering::Release);
        }
        self.rotating.store(false, Ordering::Release);
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::{
        num::{NonZeroU64, NonZeroUsize},
        sync::Arc,
        thread,
    };

    use proptest::{collection, prelude::*};
    use stepwise_clock::MockClock;

    use super::TimeWindowMax;

    fn max(clock: &MockClock, sub_window: u64, buffer_length: usize) -> TimeWindowMax<MockClock> {
        TimeWindowMax::new(
            clock.clone(),
            NonZeroU64::new(sub_window).unwrap(),
            NonZeroUsize::new(buffer_length).unwrap(),
        )
    }

    #[test]
    fn starts_at_zero() {
        let clock = MockClock::new();
        let max = max(&clock, 10, 3);
        assert!(max.poll() == 0.0);
        assert_eq!(max.retention_millis(), 30);
    }

    #[test]
    fn ignores_negative_and_nan() {
        let clock = MockClock::new();
        let max = max(&clock, 10, 3);
        max.record(-1.0);
        max.record(f64::NAN);
        max.record(-0.0);
        assert!(max.poll() == 0.0);
        max.record(2.0);
        max.record(-0.0);
        assert!((max.poll() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn smaller_values_never_lower_the_max() {
        let clock = MockClock::new();
        let max = max(&clock, 10, 3);
        max.record(100.0);
        max.record(5.0);
        max.record(99.9);
        assert!((max.poll() - 100.0).abs() < f64::EPSILON);
        clock.add_millis(9);
        max.record(1.0);
        assert!((max.poll() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn decays_sub_window_by_sub_window() {
        let clock = MockClock::new();
        let max = max(&clock, 10, 3);
        max.record(30.0);
        clock.add_millis(10);
        max.record(20.0);
        clock.add_millis(10);
        max.record(10.0);
        assert!((max.poll() - 30.0).abs() < f64::EPSILON);
        clock.add_millis(10);
        assert!((max.poll() - 20.0).abs() < f64::EPSILON);
        clock.add_millis(10);
        assert!((max.poll() - 10.0).abs() < f64::EPSILON);
        clock.add_millis(10);
        assert!(max.poll() == 0.0);
    }

    #[test]
    fn long_idle_clears_everything() {
        let clock = MockClock::new();
        let max = max(&clock, 10, 3);
        max.record(7.0);
        clock.add_millis(1_000_003);
        assert!(max.poll() == 0.0);
        max.record(3.0);
        assert!((max.poll() - 3.0).abs() < f64::EPSILON);
        // The ring realigned on whole sub-windows, 3.0 lives for three more.
        clock.add_millis(20);
        assert!((max.poll() - 3.0).abs() < f64::EPSILON);
        clock.add_millis(10);
        assert!(max.poll() == 0.0);
    }

    #[test]
    fn concurrent_records_keep_the_largest() {
        let clock = MockClock::new();
        let max = Arc::new(max(&clock, 10, 3));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let max = Arc::clone(&max);
                thread::spawn(move || {
                    for i in 0..1_000u32 {
                        max.record(f64::from(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!((max.poll() - 7_999.0).abs() < f64::EPSILON);
    }

    proptest! {
        // After a full retention with no records the max is always zero.
        #[test]
        fn fully_decays(
            sub_window in 1u64..1_000,
            buffer_length in 1usize..8,
            records in collection::vec((0.0f64..1e9, 0u64..2_000), 0..50),
        ) {
            let clock = MockClock::new();
            let max = max(&clock, sub_window, buffer_length);
            for (value, advance) in records {
                max.record(value);
                clock.add_millis(advance);
            }
            clock.add_millis(sub_window * buffer_length as u64);
            prop_assert!(max.poll() == 0.0);
        }

        // Within one sub-window the max is the largest value recorded.
        #[test]
        fn max_within_sub_window(values in collection::vec(0.0f64..1e12, 1..100)) {
            let clock = MockClock::new();
            let max = max(&clock, 1_000, 3);
            for value in &values {
                max.record(*value);
            }
            let expected = values.iter().copied().fold(0.0, f64::max);
            prop_assert!(max.poll() == expected);
        }
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use std::num::{NonZeroU64, NonZeroUsize};

    use loom::{sync::Arc, thread};
    use stepwise_clock::MockClock;

    use super::TimeWindowMax;

    // A record racing a decay pass is retained: the boundary is one sub-window
    // past construction, so neither the old nor the new slot has expired.
    #[test]
    fn record_racing_rotate() {
        loom::model(|| {
            let clock = MockClock::new();
            let max = Arc::new(TimeWindowMax::new(
                clock.clone(),
                NonZeroU64::new(10).unwrap(),
                NonZeroUsize::new(2).unwrap(),
            ));
            clock.add_millis(10);
            let writer = {
                let max = Arc::clone(&max);
                thread::spawn(move || max.record(5.0))
            };
            let _ = max.poll();
            writer.join().unwrap();
            assert!((max.poll() - 5.0).abs() < f64::EPSILON);
        });
    }
}
