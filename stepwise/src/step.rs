//! Windowed step accumulation
//!
//! A step is a half-open interval `[k * step, (k + 1) * step)` of wall time,
//! counted from the epoch. Writes land in the step that is open when they
//! happen. Reads return the step that closed most recently, frozen, and
//! trigger the freeze themselves the first time they notice a boundary has
//! passed. There is no background thread.
//!
//! The freeze is guarded by [`Rollover`]: one atomic window index that every
//! reader attempts to move forward with a compare-and-set. The winner of the
//! compare-and-set takes the running totals and publishes them as the
//! previous step. Losers wait until the winner has published before they
//! read, so every poll after a boundary sees the step that just closed and
//! no step is frozen twice. Only polls wait, adds never do.
//!
//! # Idle steps
//!
//! If no reader polls across several boundaries, the steps in between were
//! never frozen. Their writes are indistinguishable from one another at that
//! point, so the whole open total is discarded and the previous step reads as
//! the identity: the step that just closed saw no poll-visible activity of
//! its own.
//!
//! # Closing
//!
//! [`Rollover::close`] pins the rollover so no later poll freezes again. Step
//! meters use it to publish a partial final step on shutdown: freeze
//! whatever is open, then report it on every following poll. A close racing
//! a rollover waits for the rollover to publish, so the partial step is
//! always the last thing published.

use std::{fmt, num::NonZeroU64};

use stepwise_clock::Clock;
use tracing::trace;

use crate::sync::{AtomicU64, Ordering, spin};

pub mod tuple;
pub mod value;

pub use tuple::{StepTuple, StepTuple2, StepTuple3};
pub use value::{StepDouble, StepLong, StepValue};

const CLOSED: u64 = u64::MAX;

/// The outcome of a won rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Roll {
    /// Exactly one boundary passed since the last rollover. The open totals
    /// belong to the step that just closed.
    Adjacent,
    /// More than one boundary passed. The open totals span several steps and
    /// the step that just closed reads as the identity.
    Skipped {
        /// The number of boundaries crossed.
        steps: u64,
    },
}

/// The single compare-and-set guard shared by every stream of a step.
pub struct Rollover<C> {
    clock: C,
    step_millis: NonZeroU64,
    /// The index of the step most recently opened, or `CLOSED`.
    last_init_pos: AtomicU64,
    /// Trails `last_init_pos` while a freeze is in flight.
    published_pos: AtomicU64,
}

impl<C> fmt::Debug for Rollover<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rollover")
            .field("step_millis", &self.step_millis)
            .field("last_init_pos", &self.last_init_pos.load(Ordering::Relaxed))
            .field("published_pos", &self.published_pos.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C> Rollover<C>
where
    C: Clock,
{
    /// Create a new `Rollover` whose open step is the one containing 'now'.
    pub fn new(clock: C, step_millis: NonZeroU64) -> Self {
        let pos = clock.wall_time() / step_millis.get();
        Self {
            clock,
            step_millis,
            last_init_pos: AtomicU64::new(pos),
            published_pos: AtomicU64::new(pos),
        }
    }

    /// The step duration in milliseconds.
    #[must_use]
    pub fn step_millis(&self) -> NonZeroU64 {
        self.step_millis
    }

    /// The clock this rollover reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The index of the step containing 'now'.
    pub fn step_index(&self) -> u64 {
        self.clock.wall_time() / self.step_millis.get()
    }

    /// Attempt to move the open step forward to 'now'.
    ///
    /// Returns `Some` to exactly one caller per boundary crossing. Everyone
    /// else, and every call after [`Rollover::close`], gets `None`. Freeze
    /// through [`Rollover::roll_with`] so that losers wait for it.
    pub fn roll(&self) -> Option<Roll> {
        self.roll_with(|_| ())
    }

    /// Attempt to move the open step forward to 'now', running `freeze` in
    /// the single winning caller.
    ///
    /// Every caller, winner or not, returns only once the freeze of the step
    /// it observed has been published.
    pub fn roll_with<F>(&self, freeze: F) -> Option<Roll>
    where
        F: FnOnce(Roll),
    {
        let now = self.step_index();
        let last = self.last_init_pos.load(Ordering::Acquire);
        self.await_published(last);
        if last >= now {
            return None;
        }
        match self
            .last_init_pos
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let steps = now - last;
                let roll = if steps == 1 {
                    Roll::Adjacent
                } else {
                    trace!(from = last, to = now, "rolling over idle steps");
                    Roll::Skipped { steps }
                };
                freeze(roll);
                self.published_pos.store(now, Ordering::Release);
                Some(roll)
            }
            Err(actual) => {
                self.await_published(actual);
                None
            }
        }
    }

    /// Pin the rollover so that no later [`Rollover::roll`] succeeds. Returns
    /// true only for the caller that closed it.
    pub fn close(&self) -> bool {
        self.close_with(|| ())
    }

    /// Pin the rollover, running `freeze` in the single closing caller after
    /// any rollover in flight has published. Returns true only for that
    /// caller.
    pub fn close_with<F>(&self, freeze: F) -> bool
    where
        F: FnOnce(),
    {
        loop {
            let last = self.last_init_pos.load(Ordering::Acquire);
            self.await_published(last);
            if last == CLOSED {
                return false;
            }
            if self
                .last_init_pos
                .compare_exchange(last, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                freeze();
                self.published_pos.store(CLOSED, Ordering::Release);
                return true;
            }
        }
    }

    fn await_published(&self, pos: u64) {
        while self.published_pos.load(Ordering::Acquire) < pos {
            spin();
        }
    }

    /// Whether [`Rollover::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.last_init_pos.load(Ordering::Acquire) == CLOSED
    }
}
