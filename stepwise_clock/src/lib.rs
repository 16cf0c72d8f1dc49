//! Clocks for step-based meters
//!
//! Every step meter reads two notions of time. Wall time aligns reporting
//! steps to multiples of the step duration counted from the UNIX epoch, so
//! that two processes with the same step agree on window boundaries.
//! Monotonic time measures elapsed durations and is immune to wall clock
//! corrections. [`SystemClock`] serves both from the operating system,
//! [`MockClock`] serves both from a counter that only moves when a test
//! moves it.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// The `Clock` used by every step meter
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the UNIX epoch.
    fn wall_time(&self) -> u64;
    /// Nanoseconds elapsed since an arbitrary, fixed origin. Never decreases
    /// between two calls on the same instance.
    fn monotonic_time(&self) -> u64;
}

impl<C> Clock for &C
where
    C: Clock + ?Sized,
{
    fn wall_time(&self) -> u64 {
        (**self).wall_time()
    }

    fn monotonic_time(&self) -> u64 {
        (**self).monotonic_time()
    }
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn wall_time(&self) -> u64 {
        (**self).wall_time()
    }

    fn monotonic_time(&self) -> u64 {
        (**self).monotonic_time()
    }
}

#[derive(Clone)]
/// A clock that operates with respect to real-clock time.
pub struct SystemClock {
    inner: quanta::Clock,
    start: quanta::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        let inner = quanta::Clock::new();
        let start = inner.now();
        Self { inner, start }
    }
}

impl fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemClock")
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

impl Clock for SystemClock {
    /// A wall clock set before the epoch reads as the epoch itself.
    #[allow(clippy::cast_possible_truncation)]
    fn wall_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_millis() as u64)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn monotonic_time(&self) -> u64 {
        // 584 years of uptime fit in a u64 of nanoseconds.
        self.inner.now().duration_since(self.start).as_nanos() as u64
    }
}

/// A manually advanced clock for deterministic tests.
///
/// Clones share the same time source, so a single `MockClock` handed to many
/// meters moves all of them at once. Monotonic time starts at one nanosecond
/// and wall time is derived from it, starting at the epoch.
#[derive(Debug, Clone)]
pub struct MockClock {
    nanos: Arc<AtomicU64>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl MockClock {
    /// Create a new `MockClock` at the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `duration`, returning the new monotonic time.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add(&self, duration: Duration) -> u64 {
        let nanos = duration.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.nanos.fetch_add(nanos, Ordering::SeqCst) + nanos
    }

    /// Advance the clock by `millis` milliseconds.
    pub fn add_millis(&self, millis: u64) -> u64 {
        self.add(Duration::from_millis(millis))
    }

    /// Advance the clock by `seconds` seconds.
    pub fn add_seconds(&self, seconds: u64) -> u64 {
        self.add(Duration::from_secs(seconds))
    }
}

impl Clock for MockClock {
    fn wall_time(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst) / NANOS_PER_MILLI
    }

    fn monotonic_time(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use proptest::{collection, prelude::*};

    use super::{Clock, MockClock, SystemClock};

    #[test]
    fn mock_starts_at_epoch() {
        let clock = MockClock::new();
        assert_eq!(clock.wall_time(), 0);
        assert_eq!(clock.monotonic_time(), 1);
    }

    #[test]
    fn mock_clones_share_time() {
        let clock = MockClock::new();
        let other = clock.clone();
        clock.add_millis(10);
        assert_eq!(other.wall_time(), 10);
        assert_eq!(other.monotonic_time(), 10_000_001);
    }

    #[test]
    fn mock_through_arc_and_ref() {
        let clock = Arc::new(MockClock::new());
        clock.add_seconds(2);
        let by_ref: &dyn Clock = &clock;
        assert_eq!(by_ref.wall_time(), 2_000);
        assert_eq!((&*clock).wall_time(), 2_000);
    }

    #[test]
    fn system_monotonic_never_decreases() {
        let clock = SystemClock::default();
        let mut last = clock.monotonic_time();
        for _ in 0..1_000 {
            let now = clock.monotonic_time();
            assert!(now >= last);
            last = now;
        }
        assert!(clock.wall_time() > 0);
    }

    proptest! {
        #[test]
        fn mock_monotonic_never_decreases(advances in collection::vec(0u64..1_000_000_000, 1..100)) {
            let clock = MockClock::new();
            let mut last = clock.monotonic_time();
            let mut last_wall = clock.wall_time();
            for nanos in advances {
                clock.add(Duration::from_nanos(nanos));
                prop_assert!(clock.monotonic_time() >= last);
                prop_assert!(clock.wall_time() >= last_wall);
                last = clock.monotonic_time();
                last_wall = clock.wall_time();
            }
        }
    }
}
