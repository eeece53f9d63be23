//! Fixed-point model time.
//!
//! Time is counted in integer ticks of one nanosecond. The two extreme `i64`
//! values are reserved as the infinity sentinels used by the dependency
//! algebra: adding anything to `POSITIVE_INFINITY` stays at positive
//! infinity, and finite arithmetic saturates instead of wrapping.

use core::fmt;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of ticks in one second.
pub const TICKS_PER_SECOND: i64 = 1_000_000_000;

/// A point in (or span of) model time, in nanosecond ticks.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    pub const ZERO: Time = Time(0);
    pub const POSITIVE_INFINITY: Time = Time(i64::MAX);
    pub const NEGATIVE_INFINITY: Time = Time(i64::MIN);

    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(TICKS_PER_SECOND))
    }

    /// Converts seconds to ticks, rounding to the nearest nanosecond.
    ///
    /// Infinite inputs map to the sentinels; NaN maps to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() {
            return Self::ZERO;
        }
        // `as` saturates at the i64 bounds, which are exactly the sentinels.
        Self((secs * TICKS_PER_SECOND as f64).round() as i64)
    }

    pub fn as_secs_f64(self) -> f64 {
        match self {
            Self::POSITIVE_INFINITY => f64::INFINITY,
            Self::NEGATIVE_INFINITY => f64::NEG_INFINITY,
            Self(ticks) => ticks as f64 / TICKS_PER_SECOND as f64,
        }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }

    /// Converts a non-negative finite time to a `Duration`.
    pub fn to_duration(self) -> Option<Duration> {
        if self.is_finite() && self.0 >= 0 {
            Some(Duration::from_nanos(self.0 as u64))
        } else {
            None
        }
    }

    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX && self.0 != i64::MIN
    }

    pub const fn is_infinite(self) -> bool {
        !self.is_finite()
    }

    /// Infinity-aware saturating addition.
    ///
    /// `+inf` absorbs every operand, `-inf` absorbs every finite operand.
    pub const fn saturating_add(self, rhs: Time) -> Time {
        if self.0 == i64::MAX || rhs.0 == i64::MAX {
            Self::POSITIVE_INFINITY
        } else if self.0 == i64::MIN || rhs.0 == i64::MIN {
            Self::NEGATIVE_INFINITY
        } else {
            Self(self.0.saturating_add(rhs.0))
        }
    }

    pub const fn saturating_sub(self, rhs: Time) -> Time {
        self.saturating_add(rhs.negate())
    }

    const fn negate(self) -> Time {
        match self.0 {
            i64::MAX => Self::NEGATIVE_INFINITY,
            i64::MIN => Self::POSITIVE_INFINITY,
            ticks => Self(-ticks),
        }
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        *self = *self + rhs;
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for Time {
    fn sub_assign(&mut self, rhs: Time) {
        *self = *self - rhs;
    }
}

impl Neg for Time {
    type Output = Time;

    fn neg(self) -> Time {
        self.negate()
    }
}

impl From<Duration> for Time {
    fn from(value: Duration) -> Self {
        Self::from_duration(value)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::POSITIVE_INFINITY => write!(f, "+inf"),
            Self::NEGATIVE_INFINITY => write!(f, "-inf"),
            _ => write!(f, "{}s", self.as_secs_f64()),
        }
    }
}
