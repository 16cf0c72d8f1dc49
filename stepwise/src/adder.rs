//! Lock-free running totals
//!
//! Step windows close by taking the running total and resetting it to zero
//! in one atomic exchange. A read followed by a separate store would lose
//! any `add` landing between the two; an exchange cannot, every concurrent
//! `add` lands either before the exchange (and is taken) or after it (and
//! stays for the next window).

use std::fmt;

use crate::sync::{AtomicU64, Ordering};

/// A running total that a step window can take and reset atomically.
pub trait StepAccumulator: Default + Send + Sync {
    /// The type of value accumulated.
    type Value: Copy + PartialEq + fmt::Debug + Send + Sync;

    /// The value of an accumulator with nothing in it.
    const IDENTITY: Self::Value;

    /// Add `delta` to the running total.
    fn add(&self, delta: Self::Value);
    /// Read the running total without resetting it.
    fn peek(&self) -> Self::Value;
    /// Exchange the running total for the identity, returning the total.
    fn take(&self) -> Self::Value;
    /// Overwrite the running total.
    fn set(&self, value: Self::Value);
}

/// An unsigned integer total.
#[derive(Default)]
pub struct U64Adder {
    inner: AtomicU64,
}

impl fmt::Debug for U64Adder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("U64Adder").field(&self.sum()).finish()
    }
}

impl U64Adder {
    /// Create a new `U64Adder` holding `value`.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self {
            inner: AtomicU64::new(value),
        }
    }

    /// Add `delta`, wrapping at `u64::MAX`.
    #[inline]
    pub fn add(&self, delta: u64) {
        self.inner.fetch_add(delta, Ordering::AcqRel);
    }

    /// The running total.
    #[inline]
    pub fn sum(&self) -> u64 {
        self.inner.load(Ordering::Acquire)
    }

    /// Take the running total, leaving zero behind.
    #[inline]
    pub fn sum_then_reset(&self) -> u64 {
        self.inner.swap(0, Ordering::AcqRel)
    }

    /// Overwrite the running total.
    #[inline]
    pub fn set(&self, value: u64) {
        self.inner.store(value, Ordering::Release);
    }
}

impl StepAccumulator for U64Adder {
    type Value = u64;
    const IDENTITY: u64 = 0;

    fn add(&self, delta: u64) {
        U64Adder::add(self, delta);
    }

    fn peek(&self) -> u64 {
        self.sum()
    }

    fn take(&self) -> u64 {
        self.sum_then_reset()
    }

    fn set(&self, value: u64) {
        U64Adder::set(self, value);
    }
}

/// A floating point total.
///
/// The `f64` lives as its bit pattern in an `AtomicU64`. Zero's bit pattern
/// is zero, so `Default` is a total of `0.0`.
#[derive(Default)]
pub struct F64Adder {
    bits: AtomicU64,
}

impl fmt::Debug for F64Adder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("F64Adder").field(&self.sum()).finish()
    }
}

impl F64Adder {
    /// Create a new `F64Adder` holding `value`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    /// Add `delta`.
    #[inline]
    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// The running total.
    #[inline]
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Take the running total, leaving `0.0` behind.
    #[inline]
    pub fn sum_then_reset(&self) -> f64 {
        self.swap(0.0)
    }

    /// Exchange the running total for `value`, returning the old total.
    #[inline]
    pub fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.bits.swap(value.to_bits(), Ordering::AcqRel))
    }

    /// Overwrite the running total.
    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

impl StepAccumulator for F64Adder {
    type Value = f64;
    const IDENTITY: f64 = 0.0;

    fn add(&self, delta: f64) {
        F64Adder::add(self, delta);
    }

    fn peek(&self) -> f64 {
        self.sum()
    }

    fn take(&self) -> f64 {
        self.sum_then_reset()
    }

    fn set(&self, value: f64) {
        F64Adder::set(self, value);
    }
}
