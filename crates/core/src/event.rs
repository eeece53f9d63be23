//! Time-stamped events and their payloads.
//!
//! An [`Event`] is immutable once created. Data events travel to a port and
//! carry a [`Payload`]; pure events carry nothing and target a node, standing
//! for that node's self-scheduled future firing.

use core::fmt;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::graph::{NodeId, PortId};
use crate::tag::Tag;
use crate::time::Time;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique event identity.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    fn allocate() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Handle returned to producers.
pub type EventHandle = EventId;

/// Where an event is delivered.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Destination {
    Port(PortId),
    Node(NodeId),
}

impl Destination {
    pub fn port(self) -> Option<PortId> {
        match self {
            Self::Port(port) => Some(port),
            Self::Node(_) => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(port) => write!(f, "{port}"),
            Self::Node(node) => write!(f, "{node}"),
        }
    }
}

/// Value carried by a data event.
#[derive(Clone)]
pub enum Payload {
    Int(i64),
    Double(f64),
    Boolean(bool),
    Text(Arc<str>),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }

    pub fn text(value: impl Into<Arc<str>>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Double(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => f.debug_tuple("Int").field(value).finish(),
            Self::Double(value) => f.debug_tuple("Double").field(value).finish(),
            Self::Boolean(value) => f.debug_tuple("Boolean").field(value).finish(),
            Self::Text(value) => f.debug_tuple("Text").field(value).finish(),
            Self::Opaque(value) => write!(f, "Opaque({:p})", Arc::as_ptr(value)),
        }
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

/// A time-stamped event.
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    tag: Tag,
    destination: Destination,
    payload: Option<Payload>,
    source: Option<NodeId>,
    priority: i32,
    deadline: Option<Time>,
}

impl Event {
    /// Data event for an input (or actuator output) port.
    pub fn data(port: PortId, tag: Tag, payload: Payload) -> Self {
        Self::with_parts(tag, Destination::Port(port), Some(payload))
    }

    /// Pure event asking `node` to fire again at `tag`.
    pub fn pure(node: NodeId, tag: Tag) -> Self {
        Self::with_parts(tag, Destination::Node(node), None)
    }

    fn with_parts(tag: Tag, destination: Destination, payload: Option<Payload>) -> Self {
        Self {
            id: EventId::allocate(),
            tag,
            destination,
            payload,
            source: None,
            priority: 0,
            deadline: None,
        }
    }

    pub fn with_source(mut self, node: NodeId) -> Self {
        self.source = Some(node);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: Time) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn port(&self) -> Option<PortId> {
        self.destination.port()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Absolute deadline carried by the event itself (pure events).
    pub fn deadline(&self) -> Option<Time> {
        self.deadline
    }

    pub fn is_pure(&self) -> bool {
        self.payload.is_none()
    }
}

/// Two events are the same occurrence when tag, destination and payload
/// agree. The identity assigned at creation is not part of the comparison.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.destination == other.destination
            && self.payload == other.payload
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pure() {
            write!(f, "{} pure@{} -> {}", self.id, self.tag, self.destination)
        } else {
            write!(f, "{}@{} -> {}", self.id, self.tag, self.destination)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(secs: i64) -> Tag {
        Tag::at(Time::from_secs(secs))
    }

    #[test]
    fn equal_tags_at_different_ports_are_different_events() {
        let a = Event::data(PortId::new(1), tag(3), Payload::Int(1));
        let b = Event::data(PortId::new(2), tag(3), Payload::Int(1));
        let c = Event::data(PortId::new(1), tag(3), Payload::Int(1));
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn opaque_payloads_compare_by_identity() {
        let shared = Payload::opaque(vec![1u8, 2, 3]);
        let same = shared.clone();
        let other = Payload::opaque(vec![1u8, 2, 3]);
        assert_eq!(shared, same);
        assert_ne!(shared, other);
        assert_eq!(shared.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn pure_events_have_no_payload() {
        let event = Event::pure(NodeId::new(4), tag(1)).with_deadline(Time::from_secs(2));
        assert!(event.is_pure());
        assert_eq!(event.port(), None);
        assert_eq!(event.deadline(), Some(Time::from_secs(2)));
    }
}
