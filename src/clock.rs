//! Clocks used to timestamp spans.
//!
//! Reading the wall clock is comparatively expensive, and wall clocks may
//! jump backwards when the host's time is adjusted mid-trace. To keep span
//! timestamps cheap and mutually consistent, only the first span in a local
//! subtree samples the wall clock; that sample is paired with a monotonic
//! baseline in a [`TickClock`], which every descendant span then shares.
//! Later reads are a monotonic delta added to the original sample, so they
//! never go backwards even if the system clock does.

use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of wall-clock time, in microseconds since the UNIX epoch.
///
/// Implementations must be cheap enough to call on the request path, and are
/// shared across every thread that creates spans.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current epoch time in microseconds.
    fn current_time_micros(&self) -> u64;
}

/// The default [`Clock`], backed by [`SystemTime`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

/// A clock derived from one wall-clock sample and a monotonic baseline.
///
/// Queries return the original sample plus the monotonic time elapsed since
/// the baseline, so results are non-decreasing regardless of wall-clock
/// adjustments. One `TickClock` is created per local trace root and shared
/// (cheaply cloned) by the whole subtree.
#[derive(Clone, Copy)]
pub struct TickClock {
    base_epoch_micros: u64,
    base_tick: Instant,
}

// === impl SystemClock ===

impl Clock for SystemClock {
    fn current_time_micros(&self) -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => since_epoch.as_micros() as u64,
            // A system clock set before 1970 reads as the epoch itself.
            Err(_) => 0,
        }
    }
}

// === impl TickClock ===

impl TickClock {
    /// Pairs a wall-clock sample with the monotonic instant it was taken at.
    pub(crate) fn new(base_epoch_micros: u64, base_tick: Instant) -> Self {
        TickClock {
            base_epoch_micros,
            base_tick,
        }
    }

    /// Returns the derived epoch time, in microseconds, at `now`.
    pub(crate) fn time_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.base_tick);
        self.base_epoch_micros + (elapsed.as_nanos() / 1000) as u64
    }
}

impl Clock for TickClock {
    fn current_time_micros(&self) -> u64 {
        self.time_at(Instant::now())
    }
}

impl fmt::Debug for TickClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickClock")
            .field("base_epoch_micros", &self.base_epoch_micros)
            .finish()
    }
}
