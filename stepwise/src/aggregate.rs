//! Unwindowed count, total, minimum and maximum
//!
//! Unlike the step primitives a [`MetricAggregator`] has no clock: it
//! accumulates until someone calls [`MetricAggregator::snapshot_and_reset`].
//! An aggregator that saw nothing yields `None`, never a zero minimum that
//! would be indistinguishable from a recorded `0.0`.
//!
//! Records land in one cell of four atomics. A reset publishes a fresh cell
//! and then waits for writers still holding the old one before reading it, so
//! every record is wholly inside exactly one aggregate.

use std::{
    fmt,
    sync::{Arc, atomic::fence},
};

use arc_swap::ArcSwap;

use crate::{
    adder::{F64Adder, U64Adder},
    sync::{AtomicU64, Ordering, spin},
};

/// What a [`MetricAggregator`] saw between two resets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    /// Number of values recorded.
    pub count: u64,
    /// Sum of the values recorded.
    pub total: f64,
    /// Smallest value recorded.
    pub min: f64,
    /// Largest value recorded.
    pub max: f64,
}

impl Aggregate {
    /// The arithmetic mean of the values recorded.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

struct Cell {
    count: U64Adder,
    total: F64Adder,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            count: U64Adder::default(),
            total: F64Adder::default(),
            min: AtomicU64::new(f64::INFINITY.to_bits()),
            max: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
        }
    }
}

impl Cell {
    fn record(&self, value: f64) {
        update(&self.min, |current| value < current, value);
        update(&self.max, |current| value > current, value);
        self.total.add(value);
        self.count.add(1);
    }

    fn aggregate(&self) -> Option<Aggregate> {
        let count = self.count.sum();
        if count == 0 {
            return None;
        }
        Some(Aggregate {
            count,
            total: self.total.sum(),
            min: f64::from_bits(self.min.load(Ordering::Acquire)),
            max: f64::from_bits(self.max.load(Ordering::Acquire)),
        })
    }
}

/// Accumulates count, total, minimum and maximum until reset.
///
/// Recording never waits. A reset waits for records already in flight.
pub struct MetricAggregator {
    cell: ArcSwap<Cell>,
}

impl fmt::Debug for MetricAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricAggregator")
            .field("current", &self.cell.load().aggregate())
            .finish()
    }
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self {
            cell: ArcSwap::from_pointee(Cell::default()),
        }
    }
}

impl MetricAggregator {
    /// Create a new, empty `MetricAggregator`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`. NaN is ignored.
    pub fn record(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.cell.load_full().record(value);
    }

    /// What was recorded since the last reset, or `None` if nothing was.
    pub fn snapshot_and_reset(&self) -> Option<Aggregate> {
        let old = self.cell.swap(Arc::new(Cell::default()));
        while Arc::strong_count(&old) > 1 {
            spin();
        }
        fence(Ordering::Acquire);
        old.aggregate()
    }
}

fn update<F>(slot: &AtomicU64, replaces: F, value: f64)
where
    F: Fn(f64) -> bool,
{
    let mut bits = slot.load(Ordering::Acquire);
    while replaces(f64::from_bits(bits)) {
        match slot.compare_exchange_weak(bits, value.to_bits(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return,
            Err(actual) => bits = actual,
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::{sync::Arc, thread};

    use proptest::{collection, prelude::*};

    use super::{Aggregate, MetricAggregator};

    #[test]
    fn empty_is_none() {
        let aggregator = MetricAggregator::new();
        assert_eq!(aggregator.snapshot_and_reset(), None);
        aggregator.record(f64::NAN);
        assert_eq!(aggregator.snapshot_and_reset(), None);
    }

    #[test]
    fn zero_is_data() {
        let aggregator = MetricAggregator::new();
        aggregator.record(0.0);
        assert_eq!(
            aggregator.snapshot_and_reset(),
            Some(Aggregate {
                count: 1,
                total: 0.0,
                min: 0.0,
                max: 0.0,
            })
        );
        assert_eq!(aggregator.snapshot_and_reset(), None);
    }

    #[test]
    fn negative_values_kept() {
        let aggregator = MetricAggregator::new();
        aggregator.record(-3.0);
        aggregator.record(5.0);
        let aggregate = aggregator.snapshot_and_reset().unwrap();
        assert_eq!(aggregate.count, 2);
        assert!((aggregate.min + 3.0).abs() < f64::EPSILON);
        assert!((aggregate.max - 5.0).abs() < f64::EPSILON);
        assert!((aggregate.mean() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn concurrent_records_counted() {
        let aggregator = Arc::new(MetricAggregator::new());
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for i in 0..1_000u32 {
                        aggregator.record(f64::from(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let aggregate = aggregator.snapshot_and_reset().unwrap();
        assert_eq!(aggregate.count, 4_000);
        assert!(aggregate.min == 0.0);
        assert!((aggregate.max - 3_999.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_racing_records_keeps_them_whole() {
        const WRITERS: u64 = 4;
        const RECORDS: u64 = 20_000;

        let aggregator = Arc::new(MetricAggregator::new());
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for _ in 0..RECORDS {
                        aggregator.record(1.0);
                    }
                })
            })
            .collect();
        let mut seen = 0;
        let check = |aggregate: Aggregate| {
            assert!(aggregate.min == 1.0, "{aggregate:?}");
            assert!(aggregate.max == 1.0, "{aggregate:?}");
            assert!((aggregate.total - aggregate.count as f64).abs() < f64::EPSILON);
            aggregate.count
        };
        while handles.iter().any(|handle| !handle.is_finished()) {
            if let Some(aggregate) = aggregator.snapshot_and_reset() {
                seen += check(aggregate);
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        if let Some(aggregate) = aggregator.snapshot_and_reset() {
            seen += check(aggregate);
        }
        assert_eq!(seen, WRITERS * RECORDS);
    }

    proptest! {
        #[test]
        fn matches_sequential_fold(values in collection::vec(-1e6f64..1e6, 1..100)) {
            let aggregator = MetricAggregator::new();
            for value in &values {
                aggregator.record(*value);
            }
            let aggregate = aggregator.snapshot_and_reset().unwrap();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let total: f64 = values.iter().sum();
            prop_assert_eq!(aggregate.count, values.len() as u64);
            prop_assert!(aggregate.min == min);
            prop_assert!(aggregate.max == max);
            prop_assert!((aggregate.total - total).abs() < 1e-3);
        }
    }
}
