//! Cross-thread handle feeding a platform's inbox.

use crossbeam_channel::Sender;
use ptides_core::{Event, EventHandle, EventId, NodeId, Payload, PortId, Tag};

use crate::error::PlatformError;

#[derive(Debug)]
pub(crate) enum Message {
    Produce(Event),
    Cancel(EventId),
}

/// Cloneable sender side of a platform.
///
/// Events are queued by the dispatch loop the next time it steps; the
/// returned handle is valid immediately.
#[derive(Debug, Clone)]
pub struct Producer {
    sender: Sender<Message>,
}

impl Producer {
    pub(crate) fn new(sender: Sender<Message>) -> Self {
        Self { sender }
    }

    pub fn produce(
        &self,
        port: PortId,
        tag: Tag,
        payload: impl Into<Payload>,
    ) -> Result<EventHandle, PlatformError> {
        self.send_event(Event::data(port, tag, payload.into()))
    }

    pub fn schedule_pure(&self, node: NodeId, tag: Tag) -> Result<EventHandle, PlatformError> {
        self.send_event(Event::pure(node, tag))
    }

    /// Sends a prepared event, e.g. one carrying a priority or deadline.
    pub fn send_event(&self, event: Event) -> Result<EventHandle, PlatformError> {
        let id = event.id();
        self.send(Message::Produce(event))?;
        Ok(id)
    }

    /// Asks the platform to withdraw a pending pure event.
    pub fn cancel(&self, id: EventHandle) -> Result<(), PlatformError> {
        self.send(Message::Cancel(id))
    }

    fn send(&self, message: Message) -> Result<(), PlatformError> {
        self.sender
            .send(message)
            .map_err(|_| PlatformError::Disconnected)
    }
}
