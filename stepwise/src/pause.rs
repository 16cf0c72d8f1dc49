//! Pause detection
//!
//! When the process stalls (a stop-the-world collector in a neighbour, a
//! descheduled VM, a swap storm) the operations that would have been timed
//! during the stall never start, and a timer under-reports exactly the
//! latency users felt. A [`PauseDetector`] notices stalls and tells its
//! [`PauseListener`]s how long they lasted so timers can back-fill the
//! observations they missed.
//!
//! This is advisory. A timer without a detector works exactly as before.

use std::{
    fmt, io,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use once_cell::race::OnceBox;
use stepwise_clock::Clock;
use tracing::{debug, info};

use crate::time::duration_nanos;

/// Receives pause notifications.
pub trait PauseListener: Send + Sync {
    /// A pause of `pause_nanos` ended at monotonic time `pause_end_nanos`.
    fn on_pause(&self, pause_nanos: u64, pause_end_nanos: u64);
}

/// Detects pauses and notifies listeners.
pub trait PauseDetector: Send + Sync + fmt::Debug {
    /// Subscribe `listener`. Listeners that have been dropped are forgotten.
    fn add_listener(&self, listener: Weak<dyn PauseListener>);
}

/// A detector that never reports a pause.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPauseDetector;

impl PauseDetector for NoPauseDetector {
    fn add_listener(&self, _listener: Weak<dyn PauseListener>) {}
}

static NO_PAUSE_DETECTOR: OnceBox<Arc<NoPauseDetector>> = OnceBox::new();

/// The process-wide [`NoPauseDetector`].
///
/// Racing first callers may each build one, exactly one is published.
#[must_use]
pub fn no_pause_detector() -> Arc<dyn PauseDetector> {
    let detector: Arc<NoPauseDetector> =
        Arc::clone(NO_PAUSE_DETECTOR.get_or_init(|| Box::new(Arc::new(NoPauseDetector))));
    detector
}

#[derive(Default)]
struct Listeners {
    inner: Mutex<Vec<Weak<dyn PauseListener>>>,
}

impl Listeners {
    fn add(&self, listener: Weak<dyn PauseListener>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, pause_nanos: u64, pause_end_nanos: u64) {
        let live: Vec<Arc<dyn PauseListener>> = {
            let mut listeners = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_pause(pause_nanos, pause_end_nanos);
        }
    }
}

struct Shared {
    listeners: Listeners,
    running: AtomicBool,
    sleep_interval: Duration,
    pause_threshold: Duration,
}

/// Detects pauses by sleeping a background thread and measuring how badly it
/// oversleeps.
pub struct ClockDriftPauseDetector {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ClockDriftPauseDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockDriftPauseDetector")
            .field("sleep_interval", &self.shared.sleep_interval)
            .field("pause_threshold", &self.shared.pause_threshold)
            .field("listeners", &self.shared.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ClockDriftPauseDetector {
    /// Start the detector thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to spawn the thread.
    pub fn spawn<C>(clock: C, sleep_interval: Duration, pause_threshold: Duration) -> io::Result<Self>
    where
        C: Clock + 'static,
    {
        let shared = Arc::new(Shared {
            listeners: Listeners::default(),
            running: AtomicBool::new(true),
            sleep_interval,
            pause_threshold,
        });
        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("stepwise-pause-detector".to_string())
                .spawn(move || detect(&shared, &clock))?
        };
        info!(?sleep_interval, ?pause_threshold, "clock drift pause detector started");
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }
}

impl PauseDetector for ClockDriftPauseDetector {
    fn add_listener(&self, listener: Weak<dyn PauseListener>) {
        self.shared.listeners.add(listener);
    }
}

impl Drop for ClockDriftPauseDetector {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            // The thread wakes within one sleep interval.
            if handle.join().is_err() {
                debug!("pause detector thread panicked");
            }
        }
    }
}

fn detect<C>(shared: &Shared, clock: &C)
where
    C: Clock,
{
    let interval = duration_nanos(shared.sleep_interval);
    let threshold = duration_nanos(shared.pause_threshold);
    while shared.running.load(Ordering::Acquire) {
        let before = clock.monotonic_time();
        thread::sleep(shared.sleep_interval);
        let after = clock.monotonic_time();
        if let Some(pause) = oversleep(before, after, interval, threshold) {
            debug!(pause_nanos = pause, "pause detected");
            shared.listeners.notify(pause, after);
        }
    }
}

/// How far beyond `interval` a sleep from `before` to `after` ran, if that
/// exceeds `threshold`.
fn oversleep(before: u64, after: u64, interval: u64, threshold: u64) -> Option<u64> {
    let over = after.saturating_sub(before).saturating_sub(interval);
    (over > threshold).then_some(over)
}

/// Estimates the expected interval between recordings from recent ones.
///
/// A ring of the most recent recording timestamps, averaged. Recordings
/// older than the time cap make the estimate unavailable rather than
/// stretching it.
pub struct IntervalEstimator {
    timestamps: Box<[AtomicU64]>,
    recorded: AtomicU64,
    time_cap_nanos: u64,
}

impl fmt::Debug for IntervalEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalEstimator")
            .field("window", &self.timestamps.len())
            .field("recorded", &self.recorded.load(Ordering::Relaxed))
            .field("time_cap_nanos", &self.time_cap_nanos)
            .finish()
    }
}

impl Default for IntervalEstimator {
    fn default() -> Self {
        Self::new(128, Duration::from_secs(15))
    }
}

impl IntervalEstimator {
    /// Create a new `IntervalEstimator` averaging up to `window` recordings no
    /// older than `time_cap`. A window smaller than two is raised to two.
    #[must_use]
    pub fn new(window: usize, time_cap: Duration) -> Self {
        let timestamps = (0..window.max(2))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            timestamps,
            recorded: AtomicU64::new(0),
            time_cap_nanos: duration_nanos(time_cap),
        }
    }

    /// Note a recording at monotonic time `now`.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn record_interval(&self, now: u64) {
        let n = self.recorded.fetch_add(1, Ordering::AcqRel);
        let len = self.timestamps.len() as u64;
        self.timestamps[(n % len) as usize].store(now, Ordering::Release);
    }

    /// The expected interval between recordings at monotonic time `now`, if
    /// enough recent recordings exist.
    #[allow(clippy::cast_possible_truncation)]
    pub fn estimate(&self, now: u64) -> Option<u64> {
        let recorded = self.recorded.load(Ordering::Acquire);
        let len = self.timestamps.len() as u64;
        let window = recorded.min(len);
        if window < 2 {
            return None;
        }
        let newest = self.timestamps[((recorded - 1) % len) as usize].load(Ordering::Acquire);
        let oldest = self.timestamps[((recorded - window) % len) as usize].load(Ordering::Acquire);
        if now.saturating_sub(oldest) > self.time_cap_nanos {
            return None;
        }
        let interval = newest.saturating_sub(oldest) / (window - 1);
        (interval > 0).then_some(interval)
    }
}
