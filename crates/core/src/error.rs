//! Error taxonomy of the scheduling core.
//!
//! "Nothing ready" and "nothing safe yet" are not errors; they surface as
//! `Option::None` or a waiting verdict.

use thiserror::Error;

use crate::event::{Destination, EventId};
use crate::graph::{NodeId, PortId};
use crate::tag::Tag;
use crate::time::Time;

/// Malformed graph or a query that does not fit the graph. Fatal at setup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("unknown port {0}")]
    UnknownPort(PortId),
    #[error("port {port} is neither owned by node {node} nor by one of its children")]
    InvalidCausalityQuery { node: NodeId, port: PortId },
    #[error("ports {input} and {output} do not belong to the same node")]
    DependencyAcrossNodes { input: PortId, output: PortId },
    #[error("port {0} is not an input port")]
    NotAnInput(PortId),
    #[error("port {0} is not an output port")]
    NotAnOutput(PortId),
    #[error("cannot connect {from} to {to}")]
    InvalidConnection { from: PortId, to: PortId },
    #[error("node {0} is nested inside itself")]
    ContainmentCycle(NodeId),
    #[error("equivalence group mixes ports of different nodes")]
    MixedEquivalenceGroup,
    #[error("node {0} is composite and only relays events")]
    CompositeDestination(NodeId),
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidBound { name: &'static str, value: Time },
    #[error("port {0} declares a sensor latency but is fed over the network")]
    LatencyOnNetworkPort(PortId),
}

/// Internal bookkeeping fell out of sync. Fatal for the current run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("index of {destination} expected {expected} for {event}, found {found:?}")]
    IndexDesync {
        destination: Destination,
        event: EventId,
        expected: Tag,
        found: Option<Tag>,
    },
    #[error("clock moved backward from {current} to {requested}")]
    TimeMovedBackward { current: Tag, requested: Tag },
    #[error("port {port} consumed {tag} after {previous}")]
    OutOfOrderConsumption { port: PortId, previous: Tag, tag: Tag },
    #[error("event {0} is not queued")]
    NotQueued(EventId),
    #[error("firing {0} is not the executing frame")]
    NotExecuting(EventId),
    #[error("missed deadline at actuator {port}: event at {tag} produced at physical time {now}")]
    MissedActuation { port: PortId, tag: Tag, now: Time },
    #[error("missed transfer at sensor {port}: event at {tag} arrived at physical time {now}")]
    MissedSensor { port: PortId, tag: Tag, now: Time },
}

/// A bounded queue refused an event. Recoverable: back off and retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("capacity of {} exceeded (limit {limit})", where_label(.destination))]
pub struct CapacityExceeded {
    pub destination: Option<Destination>,
    pub limit: usize,
}

fn where_label(destination: &Option<Destination>) -> String {
    match destination {
        Some(destination) => format!("receiver {destination}"),
        None => "event queue".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Capacity(#[from] CapacityExceeded),
}

impl CoreError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Capacity(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
