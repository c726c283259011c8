//! A wall clock that only moves when told to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spanline::Clock;

/// A controllable [`Clock`] for tests.
///
/// Clones share one time source, so a clone given to the registry stays
/// steerable from the test. Reads are counted, which lets tests assert that
/// a code path did or did not sample the wall clock.
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    now: AtomicU64,
    reads: AtomicU64,
}

impl MockClock {
    /// A clock frozen at `now` microseconds.
    pub fn at(now: u64) -> Self {
        let clock = MockClock::default();
        clock.set(now);
        clock
    }

    pub fn set(&self, now: u64) {
        self.inner.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, micros: u64) {
        self.inner.now.fetch_add(micros, Ordering::SeqCst);
    }

    /// How many times [`Clock::current_time_micros`] was called.
    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::SeqCst)
    }
}

impl Clock for MockClock {
    fn current_time_micros(&self) -> u64 {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.now.load(Ordering::SeqCst)
    }
}
