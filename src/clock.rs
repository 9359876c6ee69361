//! Time sources.
//!
//! Wall-clock time drives sleep deadlines; the monotonic nanosecond reading
//! drives the bandwidth-sampling CAS in the checkpoint metrics. Both go
//! through [`Clock`] so tests can substitute a manual source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic nanoseconds since an arbitrary fixed origin. Never goes
    /// backwards.
    fn monotonic_nanos(&self) -> u64;
}

/// Production clock backed by `Utc::now` and `Instant`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Deterministic clock for tests; advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicU64,
    epoch: DateTime<Utc>,
}

impl ManualClock {
    /// Start at the given wall-clock epoch with the monotonic reading at 0.
    #[must_use]
    pub fn starting_at(epoch: DateTime<Utc>) -> Self {
        Self {
            nanos: AtomicU64::new(0),
            epoch,
        }
    }

    /// Advance both readings by `nanos`.
    pub fn advance_nanos(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Advance both readings by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance_nanos(secs * 1_000_000_000);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let nanos = self.nanos.load(Ordering::SeqCst);
        self.epoch
            + ChronoDuration::nanoseconds(i64::try_from(nanos).unwrap_or(i64::MAX))
    }

    fn monotonic_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_readings() {
        let clock = ManualClock::starting_at(Utc::now());
        let t0 = clock.now();
        clock.advance_secs(2);
        assert_eq!(clock.monotonic_nanos(), 2_000_000_000);
        assert_eq!((clock.now() - t0).num_seconds(), 2);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_nanos();
        let b = clock.monotonic_nanos();
        assert!(b >= a);
    }
}
