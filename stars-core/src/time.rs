//! Simulation/wall-clock time, in microseconds.
//!
//! Mirrors the original `Time` class (`include/Time.hpp`) — an opaque,
//! totally-ordered scalar rather than a bare integer, so deadlines and
//! durations can't be mixed up with raw byte counts or ids at the type
//! level.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point in time, in microseconds since an arbitrary epoch agreed by all
/// peers (wall-clock `UNIX_EPOCH` in production, an arbitrary zero in
/// simulation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time(pub u64);

/// A span of time, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Duration(pub u64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub fn from_micros(us: u64) -> Self {
        Time(us)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Saturating duration until `later` — `0` if `later` is not after `self`.
    pub fn until(&self, later: Time) -> Duration {
        Duration(later.0.saturating_sub(self.0))
    }
}

impl Duration {
    pub fn from_micros(us: u64) -> Self {
        Duration(us)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

impl Add<Duration> for Time {
    type Output = Time;
    fn add(self, rhs: Duration) -> Time {
        Time(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Duration> for Time {
    type Output = Time;
    fn sub(self, rhs: Duration) -> Time {
        Time(self.0.saturating_sub(rhs.0))
    }
}

impl Sub<Time> for Time {
    type Output = Duration;
    fn sub(self, rhs: Time) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}
