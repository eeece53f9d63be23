//! What a host sees of one firing, and what it hands back.

use ptides_core::{Event, EventId, NodeId, Payload, PortId, Tag, Time};

use crate::error::HandlerError;

/// A batch of same-tag events whose execution has completed.
#[derive(Debug, Clone)]
pub struct Firing {
    pub id: EventId,
    pub node: NodeId,
    pub tag: Tag,
    /// Earliest absolute deadline among `events`.
    pub deadline: Time,
    pub events: Vec<Event>,
    pub pure: bool,
    /// The events sit on an output port with nothing downstream.
    pub actuation: bool,
}

impl Firing {
    pub fn events_at(&self, port: PortId) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter(move |event| event.port() == Some(port))
    }

    /// First payload delivered to `port`.
    pub fn payload(&self, port: PortId) -> Option<&Payload> {
        self.events_at(port).find_map(Event::payload)
    }
}

#[derive(Debug, Clone)]
pub struct Emission {
    pub port: PortId,
    pub tag: Tag,
    pub payload: Payload,
}

/// Outputs and self-schedules collected while a firing runs.
#[derive(Debug)]
pub struct FiringContext {
    node: NodeId,
    tag: Tag,
    emissions: Vec<Emission>,
    schedules: Vec<Tag>,
}

impl FiringContext {
    pub fn new(firing: &Firing) -> Self {
        Self {
            node: firing.node,
            tag: firing.tag,
            emissions: Vec::new(),
            schedules: Vec::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Writes `payload` to an output of the firing node at the firing tag.
    pub fn emit(&mut self, port: PortId, payload: impl Into<Payload>) {
        self.emit_at(port, self.tag, payload);
    }

    pub fn emit_after(&mut self, port: PortId, delay: Time, payload: impl Into<Payload>) {
        self.emit_at(port, self.tag.delayed_by(delay), payload);
    }

    pub fn emit_at(&mut self, port: PortId, tag: Tag, payload: impl Into<Payload>) {
        self.emissions.push(Emission {
            port,
            tag,
            payload: payload.into(),
        });
    }

    /// Asks for the firing node to fire again at `tag`.
    pub fn schedule_at(&mut self, tag: Tag) {
        self.schedules.push(tag);
    }

    pub fn schedule_after(&mut self, delay: Time) {
        self.schedules.push(self.tag.delayed_by(delay));
    }

    pub fn emissions(&self) -> &[Emission] {
        &self.emissions
    }

    pub fn schedules(&self) -> &[Tag] {
        &self.schedules
    }

    pub(crate) fn into_parts(self) -> (Vec<Emission>, Vec<Tag>) {
        (self.emissions, self.schedules)
    }
}

/// Host code run for each completed firing.
pub trait FiringHandler {
    fn fire(&mut self, firing: &Firing, ctx: &mut FiringContext) -> Result<(), HandlerError>;
}

impl<F> FiringHandler for F
where
    F: FnMut(&Firing, &mut FiringContext) -> Result<(), HandlerError>,
{
    fn fire(&mut self, firing: &Firing, ctx: &mut FiringContext) -> Result<(), HandlerError> {
        self(firing, ctx)
    }
}
