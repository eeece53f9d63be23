//! Physical clock sources.

use std::time::Instant;

use crate::error::InvariantViolation;
use crate::sync::Mutex;
use crate::tag::Tag;
use crate::time::Time;

/// Source of physical time readings.
pub trait PhysicalClock: Send + Sync {
    fn now(&self) -> Tag;

    /// Blocks (or jumps) until the clock reads at least `time`.
    ///
    /// Returns `false` when the clock cannot be made to wait, in which case
    /// the caller should give up on the pending work for now.
    fn sleep_until(&self, time: Time) -> bool {
        let _ = time;
        false
    }
}

/// Manually driven clock for tests and simulations.
///
/// The clock never moves backward. [`sleep_until`](PhysicalClock::sleep_until)
/// jumps straight to the requested time.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    current: Mutex<Tag>,
}

impl SimulatedClock {
    pub fn new(start: Tag) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn set(&self, tag: Tag) -> Result<(), InvariantViolation> {
        let mut current = self.current.lock();
        if tag < *current {
            return Err(InvariantViolation::TimeMovedBackward {
                current: *current,
                requested: tag,
            });
        }
        *current = tag;
        Ok(())
    }

    pub fn set_time(&self, time: Time) -> Result<(), InvariantViolation> {
        self.set(Tag::at(time))
    }

    /// Moves the clock forward by `delta` and returns the new reading.
    pub fn advance(&self, delta: Time) -> Tag {
        let mut current = self.current.lock();
        if delta > Time::ZERO {
            *current = Tag::at(current.timestamp + delta);
        }
        *current
    }
}

impl PhysicalClock for SimulatedClock {
    fn now(&self) -> Tag {
        *self.current.lock()
    }

    fn sleep_until(&self, time: Time) -> bool {
        let mut current = self.current.lock();
        if current.timestamp < time {
            *current = Tag::at(time);
        }
        true
    }
}

/// Wall clock measured from construction.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalClock for SystemClock {
    fn now(&self) -> Tag {
        Tag::at(Time::from_duration(self.epoch.elapsed()))
    }

    fn sleep_until(&self, time: Time) -> bool {
        if let Some(wait) = (time - self.now().timestamp).to_duration() {
            std::thread::sleep(wait);
        }
        true
    }
}
