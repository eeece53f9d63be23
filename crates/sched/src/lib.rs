//! Preemptive dispatch for PTIDES platforms.
//!
//! [`Platform`] drives one platform: it drains producer messages, asks the
//! safe-to-process oracle which events may start, runs them on an
//! [`ExecutionStack`] under a [`PreemptionPolicy`], and hands finished
//! firings to the host.

mod error;
mod firing;
mod platform;
mod policy;
mod producer;
mod scheduler;

pub use error::{HandlerError, PlatformError};
pub use firing::{Emission, Firing, FiringContext, FiringHandler};
pub use platform::{Platform, PlatformBuilder, Step};
pub use policy::{policy_for, Candidate, EdfPolicy, NonPreemptive, PreemptionPolicy, TimestampPolicy};
pub use producer::Producer;
pub use scheduler::{ExecutionStack, Frame, StackState};
