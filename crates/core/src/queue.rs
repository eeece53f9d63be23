//! Global event queue in tag order.
//!
//! Entries are keyed by `(tag, tie key, insertion sequence)`. The tie key
//! comes from a pluggable [`TieBreak`] strategy; the sequence number makes
//! the key unique and keeps equal-keyed events in insertion order, so the
//! order is total whatever the strategy returns.

use core::cmp::Ordering;
use core::fmt;
use core::iter::FusedIterator;
use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::CapacityExceeded;
use crate::event::{Event, EventId, Payload};
use crate::tag::Tag;

/// Numeric payload value with a total order.
///
/// Values compare by magnitude first; an `Int` and a `Double` of equal
/// magnitude order `Int` first, and large integers that share an `f64`
/// image fall back to exact comparison.
#[derive(Debug, Clone, Copy)]
pub struct NumericKey {
    approx: f64,
    exact: Option<i64>,
}

impl NumericKey {
    pub fn of(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Int(value) => Some(Self {
                approx: *value as f64,
                exact: Some(*value),
            }),
            Payload::Double(value) => Some(Self {
                approx: *value,
                exact: None,
            }),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        if self.exact.is_some() {
            0
        } else {
            1
        }
    }
}

impl PartialEq for NumericKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NumericKey {}

impl PartialOrd for NumericKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumericKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.approx
            .total_cmp(&other.approx)
            .then(self.rank().cmp(&other.rank()))
            .then(self.exact.cmp(&other.exact))
    }
}

/// Secondary ordering among events with equal tags.
///
/// Variants order as declared: every `Numeric` key precedes every `Rank`
/// key, which precede `Unordered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TieKey {
    Numeric(NumericKey),
    Rank(i64),
    Unordered,
}

/// Strategy producing the tie key of an event.
pub trait TieBreak: Send + Sync + fmt::Debug {
    fn key(&self, event: &Event) -> TieKey;
}

/// Equal tags leave in insertion order.
#[derive(Debug, Default, Clone, Copy)]
pub struct InsertionOrder;

impl TieBreak for InsertionOrder {
    fn key(&self, _event: &Event) -> TieKey {
        TieKey::Unordered
    }
}

/// Equal tags order by numeric payload value.
///
/// Only `Int` and `Double` payloads take part; every other event at the same
/// tag follows the numeric ones in insertion order.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericPayload;

impl TieBreak for NumericPayload {
    fn key(&self, event: &Event) -> TieKey {
        event
            .payload()
            .and_then(NumericKey::of)
            .map_or(TieKey::Unordered, TieKey::Numeric)
    }
}

/// Equal tags order by event priority, smaller values first.
#[derive(Debug, Default, Clone, Copy)]
pub struct Priority;

impl TieBreak for Priority {
    fn key(&self, event: &Event) -> TieKey {
        TieKey::Rank(i64::from(event.priority()))
    }
}

/// Serializable selector for the built-in strategies.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakKind {
    #[default]
    InsertionOrder,
    NumericPayload,
    Priority,
}

impl TieBreakKind {
    pub fn strategy(self) -> Arc<dyn TieBreak> {
        match self {
            Self::InsertionOrder => Arc::new(InsertionOrder),
            Self::NumericPayload => Arc::new(NumericPayload),
            Self::Priority => Arc::new(Priority),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    tag: Tag,
    tie: TieKey,
    seq: u64,
}

/// Ordered event queue supporting interior removal.
pub struct EventQueue {
    entries: BTreeMap<QueueKey, Event>,
    index: HashMap<EventId, QueueKey>,
    tie_break: Arc<dyn TieBreak>,
    capacity: Option<usize>,
    next_seq: u64,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.entries.len())
            .field("tie_break", &self.tie_break)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_tie_break(Arc::new(InsertionOrder))
    }

    pub fn with_tie_break(tie_break: Arc<dyn TieBreak>) -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            tie_break,
            capacity: None,
            next_seq: 0,
        }
    }

    pub fn with_capacity_limit(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Whether `count` more events fit.
    pub fn check_room_for(&self, count: usize) -> Result<(), CapacityExceeded> {
        match self.capacity {
            Some(limit) if self.entries.len() + count > limit => Err(CapacityExceeded {
                destination: None,
                limit,
            }),
            _ => Ok(()),
        }
    }

    pub fn insert(&mut self, event: Event) -> Result<(), CapacityExceeded> {
        self.check_room_for(1)?;
        let key = QueueKey {
            tag: event.tag(),
            tie: self.tie_break.key(&event),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(event.id(), key);
        self.entries.insert(key, event);
        Ok(())
    }

    pub fn peek_min(&self) -> Option<&Event> {
        self.entries.values().next()
    }

    pub fn remove_min(&mut self) -> Option<Event> {
        let (_, event) = self.entries.pop_first()?;
        self.index.remove(&event.id());
        Some(event)
    }

    /// Removes the `index`-th event in queue order.
    pub fn remove_at(&mut self, index: usize) -> Option<Event> {
        let key = *self.entries.keys().nth(index)?;
        let event = self.entries.remove(&key)?;
        self.index.remove(&event.id());
        Some(event)
    }

    /// Removes an event by identity, leaving the order of the rest intact.
    pub fn remove(&mut self, id: EventId) -> Option<Event> {
        let key = self.index.remove(&id)?;
        self.entries.remove(&key)
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.index.get(&id).and_then(|key| self.entries.get(key))
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Single pass over the queue in ascending order.
    pub fn snapshot_ordered(&self) -> Snapshot<'_> {
        Snapshot {
            inner: self.entries.values(),
        }
    }

    /// Events sharing `tag`, in queue order.
    pub fn at_tag(&self, tag: Tag) -> impl Iterator<Item = &Event> + '_ {
        self.entries
            .values()
            .skip_while(move |e| e.tag() < tag)
            .take_while(move |e| e.tag() == tag)
    }
}

/// Lazy ordered view over an [`EventQueue`].
pub struct Snapshot<'a> {
    inner: btree_map::Values<'a, QueueKey, Event>,
}

impl<'a> Iterator for Snapshot<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<&'a Event> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl FusedIterator for Snapshot<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PortId;
    use crate::time::Time;

    fn tag(secs: i64, micro: u32) -> Tag {
        Tag::new(Time::from_secs(secs), micro)
    }

    fn data(port: u32, tag: Tag, value: Payload) -> Event {
        Event::data(PortId::new(port), tag, value)
    }

    #[test]
    fn drains_in_tag_order() {
        let mut queue = EventQueue::new();
        for t in [tag(5, 0), tag(3, 0), tag(3, 1)] {
            queue.insert(data(0, t, Payload::Int(0))).unwrap();
        }
        let drained: Vec<Tag> = std::iter::from_fn(|| queue.remove_min())
            .map(|e| e.tag())
            .collect();
        assert_eq!(drained, vec![tag(3, 0), tag(3, 1), tag(5, 0)]);
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let mut queue = EventQueue::new();
        let first = data(0, tag(1, 0), Payload::Int(9));
        let second = data(1, tag(1, 0), Payload::Int(1));
        let (a, b) = (first.id(), second.id());
        queue.insert(first).unwrap();
        queue.insert(second).unwrap();
        assert_eq!(queue.remove_min().unwrap().id(), a);
        assert_eq!(queue.remove_min().unwrap().id(), b);
    }

    #[test]
    fn numeric_tie_break_orders_by_value() {
        let mut queue = EventQueue::with_tie_break(Arc::new(NumericPayload));
        queue.insert(data(0, tag(1, 0), Payload::text("x"))).unwrap();
        queue.insert(data(0, tag(1, 0), Payload::Double(2.5))).unwrap();
        queue.insert(data(0, tag(1, 0), Payload::Int(2))).unwrap();
        queue.insert(data(0, tag(0, 0), Payload::Int(100))).unwrap();

        let order: Vec<Option<Payload>> = queue
            .snapshot_ordered()
            .map(|e| e.payload().cloned())
            .collect();
        assert_eq!(
            order,
            vec![
                Some(Payload::Int(100)),
                Some(Payload::Int(2)),
                Some(Payload::Double(2.5)),
                Some(Payload::text("x")),
            ]
        );
    }

    #[test]
    fn priority_tie_break_prefers_smaller_values() {
        let mut queue = EventQueue::with_tie_break(TieBreakKind::Priority.strategy());
        let low = data(0, tag(1, 0), Payload::Int(0)).with_priority(5);
        let high = data(1, tag(1, 0), Payload::Int(0)).with_priority(-1);
        let high_id = high.id();
        queue.insert(low).unwrap();
        queue.insert(high).unwrap();
        assert_eq!(queue.peek_min().unwrap().id(), high_id);
    }

    #[test]
    fn interior_removal_keeps_order() {
        let mut queue = EventQueue::new();
        let events: Vec<Event> = (0..4)
            .map(|i| data(0, tag(i, 0), Payload::Int(i)))
            .collect();
        let ids: Vec<EventId> = events.iter().map(Event::id).collect();
        for event in events {
            queue.insert(event).unwrap();
        }

        assert_eq!(queue.remove(ids[2]).unwrap().id(), ids[2]);
        assert!(queue.remove(ids[2]).is_none());
        assert_eq!(queue.remove_at(1).unwrap().id(), ids[1]);
        let rest: Vec<EventId> = queue.snapshot_ordered().map(Event::id).collect();
        assert_eq!(rest, vec![ids[0], ids[3]]);
    }

    #[test]
    fn capacity_limit_is_recoverable() {
        let mut queue = EventQueue::new().with_capacity_limit(Some(1));
        queue.insert(data(0, tag(1, 0), Payload::Int(1))).unwrap();
        let err = queue
            .insert(data(0, tag(2, 0), Payload::Int(2)))
            .unwrap_err();
        assert_eq!(err.limit, 1);
        queue.remove_min();
        queue.insert(data(0, tag(2, 0), Payload::Int(2))).unwrap();
        assert_eq!(queue.len(), 1);
    }
}
