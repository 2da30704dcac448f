//! Time utilities for the transport protocols.
//!
//! Provides a monotonic clock for interest timestamps and RTT measurement,
//! and the recurring deadlines the protocol loops schedule around (stats
//! summaries, RTC rounds, probe cadence).

use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// Monotonic timestamp
///
/// The transport uses monotonic timestamps for PIT deadlines, RTT samples
/// and round boundaries. This type wraps `std::time::Instant` and provides
/// conversions to the millisecond and microsecond offsets carried in
/// packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    /// Get the current timestamp
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    /// Get the underlying instant
    #[inline]
    pub fn as_instant(&self) -> Instant {
        self.0
    }

    /// Calculate duration since another timestamp
    ///
    /// Returns zero if `earlier` is in fact later than `self`.
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    /// Calculate elapsed time since this timestamp
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Milliseconds elapsed since a reference timestamp
    pub fn as_millis_since(&self, reference: Timestamp) -> u64 {
        self.duration_since(reference)
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    /// Microseconds elapsed since a reference timestamp
    pub fn as_micros_since(&self, reference: Timestamp) -> u64 {
        self.duration_since(reference)
            .as_micros()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 - duration)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.0.saturating_duration_since(other.0)
    }
}

/// A recurring protocol deadline.
///
/// Stats summaries, RTC round boundaries and probe emission all fire on a
/// fixed wall-clock cadence, and the protocol loops derive their poll
/// timeout from whichever deadline is nearest. Deadlines are absolute:
/// when a firing is observed late (the loop was busy in a poll), the next
/// deadline is advanced from the missed one rather than from "now", so
/// the long-run cadence does not drift with poll jitter. Periods missed
/// entirely are skipped instead of fired in a burst.
pub struct PeriodicDeadline {
    period: Duration,
    next_deadline: Timestamp,
}

impl PeriodicDeadline {
    /// Schedule the first deadline one period from now.
    pub fn new(period: Duration) -> Self {
        PeriodicDeadline {
            period,
            next_deadline: Timestamp::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the current deadline has been reached.
    pub fn is_due(&self) -> bool {
        Timestamp::now() >= self.next_deadline
    }

    /// Time left until the deadline; zero once due. Feeds the protocol
    /// loop's poll timeout.
    pub fn remaining(&self) -> Duration {
        self.next_deadline.duration_since(Timestamp::now())
    }

    /// Consume a due deadline, returning true if one fired. The next
    /// deadline advances from the one that was due, keeping the cadence
    /// anchored; deadlines the loop slept through entirely are dropped.
    pub fn fire_due(&mut self) -> bool {
        let now = Timestamp::now();
        if now < self.next_deadline {
            return false;
        }
        while self.next_deadline <= now {
            self.next_deadline = self.next_deadline + self.period;
        }
        true
    }

    /// Push the next deadline a full period away from now, abandoning the
    /// current cadence anchor (used when a flow restarts).
    pub fn restart(&mut self) {
        self.next_deadline = Timestamp::now() + self.period;
    }
}
