//! Leading-edge debouncing.
//!
//! A database write usually touches the file several times in a few
//! milliseconds (page writes, journal commit, size change). Browsers only
//! need to hear about it once. The gate lets the first event of a burst
//! through and drops everything else until `interval` has passed since the
//! last event it accepted.
//!
//! There is no queue and no trailing flush. Dropped events are gone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sentinel for "no event accepted yet".
const NEVER: u64 = u64::MAX;

/// Source of monotonic timestamps, in nanoseconds from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Real clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(NEVER - 1)
    }
}

/// Hand-driven clock for tests and simulations.
///
/// Starts at zero and only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jumps to an absolute offset from the origin.
    pub fn set(&self, at: Duration) {
        self.ticks.store(to_ticks(at), Ordering::SeqCst);
    }

    /// Moves forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.ticks.fetch_add(to_ticks(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

fn to_ticks(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(NEVER - 1)
}

/// Thread-safe gate that forwards at most one event per interval.
///
/// Holds a single atomic timestamp: the time of the most recently accepted
/// event. It is only ever replaced by a newer value, through a
/// compare-and-swap, so two overlapping callers can never both pass on the
/// same stale reading.
pub struct DebounceGate {
    last_accepted: AtomicU64,
    interval: u64,
    clock: Arc<dyn Clock>,
}

impl DebounceGate {
    /// Creates a gate driven by the real monotonic clock.
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(MonotonicClock::new()))
    }

    /// Creates a gate driven by an injected clock.
    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            last_accepted: AtomicU64::new(NEVER),
            interval: to_ticks(interval),
            clock,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval)
    }

    /// Offers one event to the gate. Returns `true` if it should be forwarded.
    pub fn try_pass(&self) -> bool {
        let now = self.clock.now();
        let mut previous = self.last_accepted.load(Ordering::Acquire);

        loop {
            if previous != NEVER && (now < previous || now - previous < self.interval) {
                return false;
            }

            match self.last_accepted.compare_exchange_weak(
                previous,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                // Someone else moved the timestamp; judge against their value.
                Err(observed) => previous = observed,
            }
        }
    }

    /// Timestamp of the last accepted event, if any.
    pub fn last_accepted(&self) -> Option<Duration> {
        match self.last_accepted.load(Ordering::Acquire) {
            NEVER => None,
            ticks => Some(Duration::from_nanos(ticks)),
        }
    }
}

impl std::fmt::Debug for DebounceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceGate")
            .field("interval", &self.interval())
            .field("last_accepted", &self.last_accepted())
            .finish()
    }
}
