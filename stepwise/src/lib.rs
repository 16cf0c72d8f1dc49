//! Step aggregation for meters.
//!
//! A step meter accumulates observations from any number of threads into the
//! window that is open 'now' and reports only the window that closed most
//! recently. Windows are aligned to multiples of the step duration counted
//! from the epoch, not to when a reporter happens to poll, and a reporter that
//! polls many times inside one window always sees the same frozen value. The
//! pieces, leaves first:
//!
//! * [`adder`]: lock-free running totals with an atomic take-and-reset.
//! * [`step`]: the windowed accumulator and its co-rotating tuple form.
//! * [`max`]: a decaying maximum over a ring of sub-windows.
//! * [`measurement`]: turns an external absolute counter into per-step deltas.
//! * [`meter`]: timers, counters and summaries composed from the above.
//!
//! Nothing here blocks, allocates per observation or returns an error from a
//! recording or polling call. Invalid configuration is rejected in
//! [`config`] before any meter exists.

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
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod adder;
pub mod aggregate;
pub mod config;
pub mod export;
pub mod max;
pub mod measurement;
pub mod meter;
pub mod pause;
pub mod step;
pub(crate) mod sync;
pub mod time;

pub use stepwise_clock::{Clock, MockClock, SystemClock};
