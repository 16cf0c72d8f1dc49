//! Atomics, swapped for loom's when modelling.

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Back off inside a wait loop.
#[cfg(not(loom))]
#[inline]
pub(crate) fn spin() {
    std::thread::yield_now();
}

#[cfg(loom)]
pub(crate) fn spin() {
    loom::thread::yield_now();
}
