use ptides_core::{
    CapacityExceeded, ConfigurationError, CoreError, EventId, InvariantViolation, NodeId, Tag,
};
use thiserror::Error;

/// Error raised by a firing handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("platform inbox is disconnected")]
    Disconnected,
    #[error("node {node} produced an event at {requested}, before its firing at {current}")]
    ScheduledInPast {
        node: NodeId,
        current: Tag,
        requested: Tag,
    },
    #[error("handler failed on firing {firing}: {source}")]
    Handler {
        firing: EventId,
        #[source]
        source: HandlerError,
    },
}

impl PlatformError {
    /// Whether the caller may back off and retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Core(err) => err.is_recoverable(),
            _ => false,
        }
    }
}

impl From<ConfigurationError> for PlatformError {
    fn from(err: ConfigurationError) -> Self {
        Self::Core(err.into())
    }
}

impl From<InvariantViolation> for PlatformError {
    fn from(err: InvariantViolation) -> Self {
        Self::Core(err.into())
    }
}

impl From<CapacityExceeded> for PlatformError {
    fn from(err: CapacityExceeded) -> Self {
        Self::Core(err.into())
    }
}
