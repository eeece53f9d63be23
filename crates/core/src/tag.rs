//! Tags: the logical instant of an event.

use core::cmp::Ordering;
use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::time::Time;

/// `(timestamp, microstep)` pair ordered lexicographically.
///
/// The derived ordering compares the timestamp first and the microstep
/// second, which is the superdense time order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub timestamp: Time,
    pub microstep: u32,
}

impl Tag {
    pub const ZERO: Tag = Tag::new(Time::ZERO, 0);
    /// A tag later than any finite one.
    pub const NEVER: Tag = Tag::new(Time::POSITIVE_INFINITY, 0);

    pub const fn new(timestamp: Time, microstep: u32) -> Self {
        Self {
            timestamp,
            microstep,
        }
    }

    /// Tag at `timestamp` with microstep zero.
    pub const fn at(timestamp: Time) -> Self {
        Self::new(timestamp, 0)
    }

    pub fn from_secs_f64(secs: f64, microstep: u32) -> Self {
        Self::new(Time::from_secs_f64(secs), microstep)
    }

    /// Next tag a producer may use after `self` when its clock reads `time`.
    ///
    /// Moving to a strictly later timestamp resets the microstep to zero.
    /// Otherwise the microstep is bumped, so the result is never earlier than
    /// `self`.
    pub fn successor_at(self, time: Time) -> Tag {
        if time > self.timestamp {
            Tag::at(time)
        } else {
            Tag::new(self.timestamp, self.microstep.saturating_add(1))
        }
    }

    /// Shifts the tag by a model-time delay.
    ///
    /// A zero delay keeps the tag unchanged; a positive delay lands on
    /// microstep zero of the later timestamp.
    pub fn delayed_by(self, delay: Time) -> Tag {
        if delay == Time::ZERO {
            self
        } else {
            Tag::at(self.timestamp + delay)
        }
    }
}

/// Three-way comparison of two tags.
pub fn compare(a: &Tag, b: &Tag) -> Ordering {
    a.cmp(b)
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.timestamp, self.microstep)
    }
}
