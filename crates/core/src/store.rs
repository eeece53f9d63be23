//! Event storage: the global queue plus the per-destination index.
//!
//! All mutations go through [`EventStore`] so the two views never disagree
//! about which events are pending.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{CapacityExceeded, InvariantViolation};
use crate::event::{Destination, Event, EventId};
use crate::graph::PortId;
use crate::queue::{EventQueue, TieBreak};
use crate::receiver::ReceiverTable;
use crate::tag::Tag;
use crate::trace::{self, records, TraceHook};

pub struct EventStore {
    queue: EventQueue,
    receivers: ReceiverTable,
    consumed: HashMap<PortId, Tag>,
    trace: Option<TraceHook>,
}

impl EventStore {
    pub fn new(
        tie_break: Arc<dyn TieBreak>,
        queue_capacity: Option<usize>,
        receiver_capacity: Option<usize>,
    ) -> Self {
        Self {
            queue: EventQueue::with_tie_break(tie_break).with_capacity_limit(queue_capacity),
            receivers: ReceiverTable::new(receiver_capacity),
            consumed: HashMap::new(),
            trace: None,
        }
    }

    pub fn set_trace_hook(&mut self, trace: Option<TraceHook>) {
        self.trace = trace;
    }

    pub fn insert(&mut self, event: Event) -> Result<EventId, CapacityExceeded> {
        let destination = event.destination();
        let payload = trace::event_payload(&event);
        let (id, tag) = (event.id(), event.tag());

        let admitted = self
            .receivers
            .check_room(destination)
            .and_then(|()| self.queue.insert(event));
        if let Err(err) = admitted {
            log::warn!("refusing event {id} for {destination}: {err}");
            trace::emit(&self.trace, records::queue::FULL, &payload, true);
            return Err(err);
        }

        self.receivers.push(destination, tag, id);
        log::trace!("queued {id} at {tag} for {destination}");
        trace::emit(&self.trace, records::queue::INSERT, &payload, true);
        Ok(id)
    }

    /// Fails unless every event of `destinations` fits at once.
    pub fn check_room(&self, destinations: &[Destination]) -> Result<(), CapacityExceeded> {
        self.queue.check_room_for(destinations.len())?;
        let mut counts: BTreeMap<Destination, usize> = BTreeMap::new();
        for &destination in destinations {
            *counts.entry(destination).or_default() += 1;
        }
        for (destination, count) in counts {
            self.receivers.check_room_for(destination, count)?;
        }
        Ok(())
    }

    /// Withdraws a pending pure event. Data events cannot be withdrawn.
    pub fn withdraw(&mut self, id: EventId) -> Option<Event> {
        match self.queue.get(id) {
            Some(event) if event.is_pure() => {}
            Some(_) => {
                log::warn!("refusing to withdraw data event {id}");
                return None;
            }
            None => return None,
        }
        let event = self.queue.remove(id)?;
        self.receivers
            .remove(event.destination(), event.tag(), event.id());
        trace::emit(
            &self.trace,
            records::queue::WITHDRAW,
            &trace::event_payload(&event),
            true,
        );
        Some(event)
    }

    /// Removes a selected event from both views.
    ///
    /// The index entry must carry the same tag as the queued event.
    pub fn take(&mut self, id: EventId) -> Result<Event, InvariantViolation> {
        let event = self.queue.remove(id).ok_or(InvariantViolation::NotQueued(id))?;
        let destination = event.destination();
        if !self.receivers.remove(destination, event.tag(), id) {
            let found = self
                .receivers
                .get(destination)
                .and_then(|receiver| receiver.tag_of(id));
            return Err(InvariantViolation::IndexDesync {
                destination,
                event: id,
                expected: event.tag(),
                found,
            });
        }
        trace::emit(
            &self.trace,
            records::queue::TAKE,
            &trace::event_payload(&event),
            true,
        );
        Ok(event)
    }

    /// Records that `port` consumed `tag`; tags must strictly increase.
    pub fn record_consumption(&mut self, port: PortId, tag: Tag) -> Result<(), InvariantViolation> {
        if let Some(&previous) = self.consumed.get(&port) {
            if tag <= previous {
                return Err(InvariantViolation::OutOfOrderConsumption {
                    port,
                    previous,
                    tag,
                });
            }
        }
        self.consumed.insert(port, tag);
        Ok(())
    }

    pub fn last_consumed(&self, port: PortId) -> Option<Tag> {
        self.consumed.get(&port).copied()
    }

    pub fn reset_consumption(&mut self) {
        self.consumed.clear();
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn receivers(&self) -> &ReceiverTable {
        &self.receivers
    }

    pub fn min_tag(&self, destination: Destination) -> Option<Tag> {
        self.receivers.min_tag(destination)
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.queue.get(id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.receivers.clear();
        self.consumed.clear();
    }

    #[cfg(test)]
    pub(crate) fn receivers_mut(&mut self) -> &mut ReceiverTable {
        &mut self.receivers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use crate::graph::NodeId;
    use crate::queue::InsertionOrder;
    use crate::time::Time;

    fn store() -> EventStore {
        EventStore::new(Arc::new(InsertionOrder), None, None)
    }

    #[test]
    fn take_keeps_views_consistent() {
        let mut store = store();
        let port = PortId::new(1);
        let id = store
            .insert(Event::data(port, Tag::at(Time::from_secs(1)), Payload::Int(4)))
            .unwrap();
        assert_eq!(store.min_tag(Destination::Port(port)), Some(Tag::at(Time::from_secs(1))));

        let event = store.take(id).unwrap();
        assert_eq!(event.payload(), Some(&Payload::Int(4)));
        assert!(store.is_empty());
        assert_eq!(store.min_tag(Destination::Port(port)), None);
        assert_eq!(store.take(id), Err(InvariantViolation::NotQueued(id)));
    }

    #[test]
    fn only_pure_events_can_be_withdrawn() {
        let mut store = store();
        let data = store
            .insert(Event::data(PortId::new(0), Tag::ZERO, Payload::Int(1)))
            .unwrap();
        let pure = store
            .insert(Event::pure(NodeId::new(0), Tag::at(Time::from_secs(2))))
            .unwrap();

        assert!(store.withdraw(data).is_none());
        assert_eq!(store.withdraw(pure).map(|e| e.id()), Some(pure));
        assert!(store.withdraw(pure).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn desynchronized_index_is_an_invariant_violation() {
        let mut store = store();
        let port = PortId::new(2);
        let event = Event::data(port, Tag::at(Time::from_secs(3)), Payload::Int(0));
        let (id, tag) = (event.id(), event.tag());
        store.insert(event).unwrap();
        let stale = Tag::at(Time::from_secs(1));
        store.receivers_mut().remove(Destination::Port(port), tag, id);
        store.receivers_mut().push(Destination::Port(port), stale, id);

        assert_eq!(
            store.take(id),
            Err(InvariantViolation::IndexDesync {
                destination: Destination::Port(port),
                event: id,
                expected: tag,
                found: Some(stale),
            })
        );
    }

    #[test]
    fn room_is_checked_for_the_whole_batch() {
        let mut store = EventStore::new(Arc::new(InsertionOrder), Some(3), Some(1));
        let (a, b) = (Destination::Port(PortId::new(0)), Destination::Port(PortId::new(1)));
        assert!(store.check_room(&[a, b]).is_ok());
        assert_eq!(
            store.check_room(&[a, a]),
            Err(CapacityExceeded {
                destination: Some(a),
                limit: 1,
            })
        );

        store
            .insert(Event::data(PortId::new(2), Tag::ZERO, Payload::Int(0)))
            .unwrap();
        store.insert(Event::pure(NodeId::new(0), Tag::ZERO)).unwrap();
        assert_eq!(
            store.check_room(&[a, b]),
            Err(CapacityExceeded {
                destination: None,
                limit: 3,
            })
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn consumption_must_advance() {
        let mut store = store();
        let port = PortId::new(0);
        store.record_consumption(port, Tag::at(Time::from_secs(1))).unwrap();
        store.record_consumption(port, Tag::new(Time::from_secs(1), 1)).unwrap();
        let err = store
            .record_consumption(port, Tag::at(Time::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, InvariantViolation::OutOfOrderConsumption { .. }));
    }
}
