//! Platform configuration.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::causality::Boundary;
use crate::error::ConfigurationError;
use crate::queue::{TieBreak, TieBreakKind};
use crate::safe::SafetyMargins;
use crate::time::Time;

/// Preemption test applied while a frame is executing.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Earlier tags and pure events preempt.
    #[default]
    Timestamp,
    /// Earlier absolute deadlines and pure events preempt.
    Edf,
    /// Frames always run to completion.
    NonPreemptive,
}

/// Configuration for one platform.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub name: String,
    pub sync_error: Time,
    pub network_delay: Time,
    pub boundary: Boundary,
    pub queue_capacity: Option<usize>,
    pub receiver_capacity: Option<usize>,
    pub tie_break: TieBreakKind,
    pub policy: PolicyKind,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub idle_callback: Option<fn()>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "platform".to_string(),
            sync_error: Time::ZERO,
            network_delay: Time::ZERO,
            boundary: Boundary::ZeroDelay,
            queue_capacity: None,
            receiver_capacity: None,
            tie_break: TieBreakKind::InsertionOrder,
            policy: PolicyKind::Timestamp,
            idle_callback: None,
        }
    }
}

impl PlatformConfig {
    /// Creates a new platform configuration builder.
    pub fn builder() -> PlatformConfigBuilder {
        PlatformConfigBuilder::default()
    }

    pub fn margins(&self) -> SafetyMargins {
        SafetyMargins {
            sync_error: self.sync_error,
            network_delay: self.network_delay,
        }
    }

    pub fn tie_break_strategy(&self) -> Arc<dyn TieBreak> {
        self.tie_break.strategy()
    }

    /// Checks that the error bounds are usable in the clock test.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("sync_error", self.sync_error),
            ("network_delay", self.network_delay),
        ] {
            if value < Time::ZERO || value.is_infinite() {
                return Err(ConfigurationError::InvalidBound { name, value });
            }
        }
        Ok(())
    }
}

/// Builder for ergonomic platform configuration construction.
#[derive(Debug, Clone, Default)]
pub struct PlatformConfigBuilder {
    config: PlatformConfig,
}

impl PlatformConfigBuilder {
    /// Sets the platform name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the bound on clock synchronization error.
    pub fn sync_error(mut self, bound: Time) -> Self {
        self.config.sync_error = bound;
        self
    }

    /// Sets the network delay bound applied to network input ports.
    pub fn network_delay(mut self, bound: Time) -> Self {
        self.config.network_delay = bound;
        self
    }

    /// Sets the causality value of ports with no upstream producer.
    pub fn boundary(mut self, boundary: Boundary) -> Self {
        self.config.boundary = boundary;
        self
    }

    /// Bounds the global event queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Bounds each per-destination receiver.
    pub fn receiver_capacity(mut self, capacity: usize) -> Self {
        self.config.receiver_capacity = Some(capacity);
        self
    }

    pub fn tie_break(mut self, kind: TieBreakKind) -> Self {
        self.config.tie_break = kind;
        self
    }

    pub fn policy(mut self, policy: PolicyKind) -> Self {
        self.config.policy = policy;
        self
    }

    /// Sets the callback invoked whenever the dispatch loop runs dry.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Builds the platform configuration.
    pub fn build(self) -> PlatformConfig {
        self.config
    }
}
