//! Audio clock time points and durations.
//!
//! Hardware callbacks stamp every buffer with a [`Time`]; ring buffers and the
//! stream aligner compare those stamps to detect drift. Values are integer
//! nanoseconds so that repeated frame-count arithmetic stays exact: advancing
//! a read position by `n` frames always adds exactly
//! `TimeDelta::from_frames(n, rate)`, never a re-derived wall-clock reading.

use std::ops::{Add, AddAssign, Neg, Sub};
use std::time::Instant;

/// A point on the audio clock, in nanoseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time {
    ns: i64,
}

impl Time {
    /// The clock epoch.
    pub const ZERO: Time = Time { ns: 0 };

    /// Build a time point from raw nanoseconds.
    pub const fn from_nanos(ns: i64) -> Self {
        Self { ns }
    }

    /// Raw nanoseconds since the epoch.
    pub const fn as_nanos(self) -> i64 {
        self.ns
    }

    /// Current time on the process-wide monotonic clock.
    ///
    /// Backends that cannot provide a stream clock stamp buffers with this.
    pub fn now() -> Self {
        use std::sync::OnceLock;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = *EPOCH.get_or_init(Instant::now);
        Self {
            ns: epoch.elapsed().as_nanos() as i64,
        }
    }
}

/// A signed span between two [`Time`] points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeDelta {
    ns: i64,
}

impl TimeDelta {
    /// The empty span.
    pub const ZERO: TimeDelta = TimeDelta { ns: 0 };

    /// Build a span from raw nanoseconds.
    pub const fn from_nanos(ns: i64) -> Self {
        Self { ns }
    }

    /// Build a span from milliseconds.
    pub const fn from_millis(ms: i64) -> Self {
        Self {
            ns: ms * 1_000_000,
        }
    }

    /// The exact duration of `frames` frames at `rate` Hz.
    ///
    /// Computed in 128-bit intermediate precision; the sub-nanosecond
    /// remainder is truncated, which is the only rounding in the clock.
    pub fn from_frames(frames: u64, rate: u32) -> Self {
        debug_assert!(rate > 0, "sample rate must be positive");
        Self {
            ns: (i128::from(frames) * 1_000_000_000 / i128::from(rate)) as i64,
        }
    }

    /// The duration of one frame at `rate` Hz.
    pub fn sample_period(rate: u32) -> Self {
        Self::from_frames(1, rate)
    }

    /// Raw nanoseconds.
    pub const fn as_nanos(self) -> i64 {
        self.ns
    }

    /// Absolute value of the span.
    pub const fn abs(self) -> Self {
        Self { ns: self.ns.abs() }
    }

    /// How many whole frames at `rate` Hz fit in this span.
    ///
    /// Negative spans yield zero.
    pub fn whole_frames(self, rate: u32) -> u64 {
        if self.ns <= 0 {
            return 0;
        }
        (i128::from(self.ns) * i128::from(rate) / 1_000_000_000) as u64
    }
}

impl Add<TimeDelta> for Time {
    type Output = Time;
    fn add(self, rhs: TimeDelta) -> Time {
        Time { ns: self.ns + rhs.ns }
    }
}

impl AddAssign<TimeDelta> for Time {
    fn add_assign(&mut self, rhs: TimeDelta) {
        self.ns += rhs.ns;
    }
}

impl Sub<TimeDelta> for Time {
    type Output = Time;
    fn sub(self, rhs: TimeDelta) -> Time {
        Time { ns: self.ns - rhs.ns }
    }
}

impl Sub for Time {
    type Output = TimeDelta;
    fn sub(self, rhs: Time) -> TimeDelta {
        TimeDelta { ns: self.ns - rhs.ns }
    }
}

impl Add for TimeDelta {
    type Output = TimeDelta;
    fn add(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta { ns: self.ns + rhs.ns }
    }
}

impl Sub for TimeDelta {
    type Output = TimeDelta;
    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta { ns: self.ns - rhs.ns }
    }
}

impl Neg for TimeDelta {
    type Output = TimeDelta;
    fn neg(self) -> TimeDelta {
        TimeDelta { ns: -self.ns }
    }
}
