//! Safe-to-process decisions.
//!
//! An event with tag `T` at input `P` is safe once no event with a tag at or
//! before `T` can still show up at `P` or at any port presented together with
//! `P`. A port `Q` of that group is *cleared* when
//!
//! - something at or after `T` is already queued at `Q` (an equal tag is
//!   delivered in the same batch), or
//! - the physical clock shows `C >= T - delay(Q) + sync_error`, plus the
//!   network delay bound when `Q` is fed from another platform. `delay(Q)`
//!   is the causality minimum delay into `Q`.
//!
//! `P` itself always needs the clock test. A pure event for node `N` needs
//! every input of `N` cleared; an input holding data at exactly `T` joins the
//! pure event's batch and so needs the clock test as well. While such a pure
//! event is queued, data for `N` at `T` waits for it, so `N` fires once per
//! tag. A node without inputs may always fire its own pure events.
//!
//! Events for output ports leave the platform at their timestamp: they are
//! held until the clock reaches it.

use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::causality::CausalityAnalysis;
use crate::dependency::{Dependency, RealDependency};
use crate::error::{CoreError, InvariantViolation};
use crate::event::{Destination, Event, EventId};
use crate::graph::{Graph, GraphDescription, PortId, PortKind};
use crate::store::EventStore;
use crate::tag::Tag;
use crate::time::Time;
use crate::trace::{self, records, RecordBuilder, TraceHook};

/// Platform-wide error bounds folded into the clock test.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SafetyMargins {
    /// Bound on the clock synchronization error between platforms.
    pub sync_error: Time,
    /// Bound on network delay for ports marked as network inputs.
    pub network_delay: Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    /// Not safe yet. `wake_at` is the physical time at which the clock test
    /// will pass; `None` when an earlier queued event has to go first.
    Blocked { wake_at: Option<Time> },
}

impl Verdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }
}

/// Outcome of one pass over the queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scan {
    /// Safe events in queue order.
    pub safe: Vec<EventId>,
    /// Earliest physical time at which a blocked event may become safe.
    pub wake_at: Option<Time>,
    /// Events inspected but found unsafe.
    pub blocked: usize,
}

pub struct Oracle<D: Dependency = RealDependency> {
    causality: CausalityAnalysis<D>,
    margins: SafetyMargins,
    trace: Option<TraceHook>,
}

impl<D: Dependency> Oracle<D> {
    pub fn new(causality: CausalityAnalysis<D>, margins: SafetyMargins) -> Self {
        Self {
            causality,
            margins,
            trace: None,
        }
    }

    pub fn set_trace_hook(&mut self, trace: Option<TraceHook>) {
        self.causality.set_trace_hook(trace.clone());
        self.trace = trace;
    }

    pub fn causality(&self) -> &CausalityAnalysis<D> {
        &self.causality
    }

    pub fn graph(&self) -> &Graph {
        self.causality.graph()
    }

    pub fn margins(&self) -> SafetyMargins {
        self.margins
    }

    /// Decides whether `event` may be processed at physical time `now`.
    pub fn check(&self, store: &EventStore, event: &Event, now: Tag) -> Result<Verdict, CoreError> {
        let tag = event.tag();
        match event.destination() {
            Destination::Port(port) => {
                let data = self.graph().port(port)?;
                if data.kind == PortKind::Output {
                    return Ok(if now.timestamp >= tag.timestamp {
                        Verdict::Safe
                    } else {
                        Verdict::Blocked {
                            wake_at: Some(tag.timestamp),
                        }
                    });
                }
                if store.min_tag(Destination::Port(port)) != Some(tag) {
                    return Ok(Verdict::Blocked { wake_at: None });
                }
                // a pure event at this tag takes the data along
                if store.min_tag(Destination::Node(data.node)) == Some(tag) {
                    return Ok(Verdict::Blocked { wake_at: None });
                }
                let group = self.graph().equivalent_inputs(port)?;
                self.clear_all(store, &group, Some(port), tag, now)
            }
            Destination::Node(node) => {
                let inputs = self.graph().inputs(node)?;
                if inputs.is_empty() {
                    return Ok(Verdict::Safe);
                }
                self.clear_all(store, inputs, None, tag, now)
            }
        }
    }

    fn clear_all(
        &self,
        store: &EventStore,
        ports: &[PortId],
        own: Option<PortId>,
        tag: Tag,
        now: Tag,
    ) -> Result<Verdict, CoreError> {
        let mut wake_at: Option<Time> = None;
        let mut behind_queued = false;
        for &port in ports {
            if Some(port) != own {
                match store.min_tag(Destination::Port(port)) {
                    Some(queued) if queued > tag => continue,
                    // equal-tag data joins a data batch as is, a pure batch
                    // only behind the clock test
                    Some(queued) if queued == tag && own.is_some() => continue,
                    Some(queued) if queued < tag => {
                        behind_queued = true;
                        continue;
                    }
                    _ => {}
                }
            }
            let threshold = self.threshold(port, tag)?;
            if now.timestamp < threshold {
                wake_at = Some(wake_at.map_or(threshold, |w| w.max(threshold)));
            }
        }
        Ok(match (behind_queued, wake_at) {
            (true, _) => Verdict::Blocked { wake_at: None },
            (false, Some(wake_at)) => Verdict::Blocked {
                wake_at: Some(wake_at),
            },
            (false, None) => Verdict::Safe,
        })
    }

    /// Physical time from which no event earlier than `tag` can reach `port`.
    pub fn threshold(&self, port: PortId, tag: Tag) -> Result<Time, CoreError> {
        let delay = self.causality.minimum_delay(port)?.as_time();
        let mut threshold = tag.timestamp - delay + self.margins.sync_error;
        if self.graph().port(port)?.network {
            threshold += self.margins.network_delay;
        }
        Ok(threshold)
    }

    /// Checks every queued event not rejected by `skip`.
    pub fn scan<F>(&self, store: &EventStore, now: Tag, mut skip: F) -> Result<Scan, CoreError>
    where
        F: FnMut(&Event) -> bool,
    {
        let mut scan = Scan::default();
        for event in store.queue().snapshot_ordered() {
            if skip(event) {
                continue;
            }
            match self.check(store, event, now)? {
                Verdict::Safe => scan.safe.push(event.id()),
                Verdict::Blocked { wake_at } => {
                    scan.blocked += 1;
                    if let Some(at) = wake_at {
                        scan.wake_at = Some(scan.wake_at.map_or(at, |w| w.min(at)));
                    }
                }
            }
        }
        if scan.safe.is_empty() && scan.blocked > 0 {
            let payload = RecordBuilder::new()
                .u32(scan.blocked as u32)
                .i64(scan.wake_at.unwrap_or(Time::POSITIVE_INFINITY).ticks())
                .finish();
            trace::emit(&self.trace, records::safe::BLOCKED, &payload, true);
        }
        Ok(scan)
    }

    /// First safe event in queue order.
    pub fn first_safe(&self, store: &EventStore, now: Tag) -> Result<Option<EventId>, CoreError> {
        for event in store.queue().snapshot_ordered() {
            if self.check(store, event, now)?.is_safe() {
                return Ok(Some(event.id()));
            }
        }
        Ok(None)
    }

    /// Removes the selected event together with every queued event that
    /// shares its tag and its equivalence group. A pure event takes the
    /// same-tag data at every input of its node. The selected event comes
    /// first.
    ///
    /// Consumed data tags are recorded per port and must strictly increase.
    pub fn take_batch(&self, store: &mut EventStore, id: EventId) -> Result<Vec<Event>, CoreError> {
        let selected = store.get(id).ok_or(InvariantViolation::NotQueued(id))?;
        let tag = selected.tag();
        let destination = selected.destination();
        trace::emit(
            &self.trace,
            records::safe::SAFE,
            &trace::event_payload(selected),
            true,
        );

        let group: BTreeSet<PortId> = match destination {
            Destination::Port(port) => {
                if self.graph().is_input(port)? {
                    self.graph().equivalent_inputs(port)?.into_iter().collect()
                } else {
                    [port].into_iter().collect()
                }
            }
            Destination::Node(node) => self.graph().inputs(node)?.iter().copied().collect(),
        };
        let mut ids: Vec<EventId> = store
            .queue()
            .at_tag(tag)
            .filter(|event| {
                event.id() == id
                    || match (destination, event.destination()) {
                        (Destination::Node(a), Destination::Node(b)) => a == b,
                        (_, Destination::Port(p)) => group.contains(&p),
                        (Destination::Port(_), Destination::Node(_)) => false,
                    }
            })
            .map(Event::id)
            .collect();
        ids.sort_by_key(|&next| next != id);

        let mut batch = Vec::with_capacity(ids.len());
        let mut seen = BTreeSet::new();
        for next in ids {
            let event = store.take(next)?;
            if let (false, Some(port)) = (event.is_pure(), event.port()) {
                if seen.insert(port) {
                    store.record_consumption(port, tag)?;
                }
            }
            batch.push(event);
        }

        log::debug!("batch of {} event(s) at {tag} for {destination}", batch.len());
        let payload = trace::tag_fields(RecordBuilder::new().u32(batch.len() as u32), tag).finish();
        trace::emit(&self.trace, records::safe::BATCH, &payload, true);
        Ok(batch)
    }
}
