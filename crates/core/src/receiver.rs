//! Per-destination timed index of queued events.
//!
//! The global queue owns the events; each destination keeps only the
//! `(tag, id)` pairs of events waiting for it, so the smallest pending tag at
//! a port is a cheap lookup for the safe-to-process test.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CapacityExceeded;
use crate::event::{Destination, EventId};
use crate::tag::Tag;

#[derive(Debug, Default, Clone)]
pub struct TimedReceiver {
    entries: BTreeSet<(Tag, EventId)>,
    latest: Option<Tag>,
    capacity: Option<usize>,
}

impl TimedReceiver {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: BTreeSet::new(),
            latest: None,
            capacity,
        }
    }

    /// Whether another entry fits.
    pub fn has_room(&self) -> bool {
        self.capacity.map_or(true, |limit| self.entries.len() < limit)
    }

    pub fn push(&mut self, tag: Tag, id: EventId) {
        self.entries.insert((tag, id));
        self.latest = Some(self.latest.map_or(tag, |latest| latest.max(tag)));
    }

    pub fn remove(&mut self, tag: Tag, id: EventId) -> bool {
        self.entries.remove(&(tag, id))
    }

    pub fn head(&self) -> Option<(Tag, EventId)> {
        self.entries.first().copied()
    }

    pub fn min_tag(&self) -> Option<Tag> {
        self.head().map(|(tag, _)| tag)
    }

    /// Tag of the entry with `id`, if still indexed.
    ///
    /// Linear in the receiver size; only desync reports call it.
    pub fn tag_of(&self, id: EventId) -> Option<Tag> {
        self.entries
            .iter()
            .find(|(_, entry)| *entry == id)
            .map(|(tag, _)| *tag)
    }

    /// Latest tag ever queued here.
    pub fn latest_tag(&self) -> Option<Tag> {
        self.latest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All receivers of a platform, created lazily per destination.
#[derive(Debug, Default)]
pub struct ReceiverTable {
    receivers: BTreeMap<Destination, TimedReceiver>,
    capacity: Option<usize>,
}

impl ReceiverTable {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            receivers: BTreeMap::new(),
            capacity,
        }
    }

    pub fn check_room(&self, destination: Destination) -> Result<(), CapacityExceeded> {
        self.check_room_for(destination, 1)
    }

    /// Whether `count` more entries fit at `destination`.
    pub fn check_room_for(&self, destination: Destination, count: usize) -> Result<(), CapacityExceeded> {
        let Some(limit) = self.capacity else {
            return Ok(());
        };
        let queued = self.receivers.get(&destination).map_or(0, TimedReceiver::len);
        if queued + count > limit {
            return Err(CapacityExceeded {
                destination: Some(destination),
                limit,
            });
        }
        Ok(())
    }

    pub fn push(&mut self, destination: Destination, tag: Tag, id: EventId) {
        let capacity = self.capacity;
        self.receivers
            .entry(destination)
            .or_insert_with(|| TimedReceiver::new(capacity))
            .push(tag, id);
    }

    pub fn remove(&mut self, destination: Destination, tag: Tag, id: EventId) -> bool {
        self.receivers
            .get_mut(&destination)
            .map_or(false, |receiver| receiver.remove(tag, id))
    }

    pub fn get(&self, destination: Destination) -> Option<&TimedReceiver> {
        self.receivers.get(&destination)
    }

    pub fn min_tag(&self, destination: Destination) -> Option<Tag> {
        self.get(destination).and_then(TimedReceiver::min_tag)
    }

    pub fn clear(&mut self) {
        self.receivers.clear();
    }
}
