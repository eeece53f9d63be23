//! Dependency values: the semiring the causality analysis computes in.
//!
//! `oplus` merges alternative paths (keep the better one), `otimes` chains
//! two hops. The `oplus` identity means "no dependency"; the `otimes`
//! identity means "dependent with zero delay".

use core::cmp::Ordering;
use core::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::time::Time;

pub trait Dependency: Clone + Debug + PartialEq + Send + Sync + 'static {
    fn oplus_identity() -> Self;
    fn otimes_identity() -> Self;
    fn oplus(&self, other: &Self) -> Self;
    fn otimes(&self, other: &Self) -> Self;

    /// Lifts a declared model-time delay into this algebra.
    fn from_delay(delay: Time) -> Self;

    /// Smallest model-time delay this value guarantees.
    fn as_time(&self) -> Time;

    fn is_dependent(&self) -> bool {
        *self != Self::oplus_identity()
    }
}

/// Real-valued delays under (min, +).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RealDependency(pub Time);

impl RealDependency {
    pub fn delay(self) -> Time {
        self.0
    }
}

impl Dependency for RealDependency {
    fn oplus_identity() -> Self {
        Self(Time::POSITIVE_INFINITY)
    }

    fn otimes_identity() -> Self {
        Self(Time::ZERO)
    }

    fn oplus(&self, other: &Self) -> Self {
        Self(self.0.min(other.0))
    }

    fn otimes(&self, other: &Self) -> Self {
        Self(self.0 + other.0)
    }

    fn from_delay(delay: Time) -> Self {
        Self(delay)
    }

    fn as_time(&self) -> Time {
        self.0
    }
}

/// Logical dependence only: every dependency has zero delay.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BooleanDependency(pub bool);

impl Dependency for BooleanDependency {
    fn oplus_identity() -> Self {
        Self(false)
    }

    fn otimes_identity() -> Self {
        Self(true)
    }

    fn oplus(&self, other: &Self) -> Self {
        Self(self.0 || other.0)
    }

    fn otimes(&self, other: &Self) -> Self {
        Self(self.0 && other.0)
    }

    fn from_delay(delay: Time) -> Self {
        Self(delay != Time::POSITIVE_INFINITY)
    }

    fn as_time(&self) -> Time {
        if self.0 {
            Time::ZERO
        } else {
            Time::POSITIVE_INFINITY
        }
    }
}

/// Delay in superdense time: a model-time part and a microstep index.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuperdenseDependency {
    pub time: Time,
    pub index: u32,
}

impl SuperdenseDependency {
    pub const fn new(time: Time, index: u32) -> Self {
        Self { time, index }
    }
}

impl PartialOrd for SuperdenseDependency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SuperdenseDependency {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then(self.index.cmp(&other.index))
    }
}

impl Dependency for SuperdenseDependency {
    fn oplus_identity() -> Self {
        Self::new(Time::POSITIVE_INFINITY, 0)
    }

    fn otimes_identity() -> Self {
        Self::new(Time::ZERO, 0)
    }

    fn oplus(&self, other: &Self) -> Self {
        *self.min(other)
    }

    fn otimes(&self, other: &Self) -> Self {
        let time = self.time + other.time;
        if time == Time::POSITIVE_INFINITY {
            return Self::oplus_identity();
        }
        Self::new(time, self.index.saturating_add(other.index))
    }

    fn from_delay(delay: Time) -> Self {
        Self::new(delay, 0)
    }

    fn as_time(&self) -> Time {
        self.time
    }
}
